//! Loading the UnRAR shared library.
//!
//! The library is opened at run time, so this crate builds and its pure parts
//! work without `libunrar` installed.

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use libloading::Library;
use tracing::debug;

use crate::error::LibraryError;
use crate::ffi;

/// Environment variable naming an explicit library path.
pub const LIBRARY_ENV_VAR: &str = "UNRAR_LIBRARY";

#[cfg(target_os = "windows")]
const DEFAULT_NAMES: &[&str] = &["UnRAR64.dll", "unrar.dll"];
#[cfg(target_os = "macos")]
const DEFAULT_NAMES: &[&str] = &["libunrar.dylib", "libunrar.so"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const DEFAULT_NAMES: &[&str] = &[
    "libunrar.so",
    "libunrar.so.7",
    "libunrar.so.6",
    "libunrar.so.5",
];

/// Where to find the native library.
#[derive(Debug, Clone, Default)]
pub struct LibraryConfig {
    /// Explicit path; platform default names are tried when unset
    pub path: Option<PathBuf>,
}

impl LibraryConfig {
    /// Configuration from the `UNRAR_LIBRARY` environment variable.
    pub fn from_env() -> Self {
        Self {
            path: env::var_os(LIBRARY_ENV_VAR)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Entry points resolved from the native library.
#[derive(Clone, Copy)]
pub(crate) struct NativeApi {
    pub(crate) open: ffi::OpenArchiveFn,
    pub(crate) close: ffi::CloseArchiveFn,
    pub(crate) read_header: ffi::ReadHeaderFn,
    pub(crate) process_file: ffi::ProcessFileFn,
    pub(crate) dll_version: ffi::GetDllVersionFn,
}

/// A loaded UnRAR library.
///
/// Handles keep the library alive through an `Arc`, so it is never unloaded
/// while an archive is open.
pub struct UnrarLibrary {
    api: NativeApi,
    path: Option<PathBuf>,
    _library: Option<Library>,
}

static GLOBAL: OnceLock<Result<Arc<UnrarLibrary>, LibraryError>> = OnceLock::new();

impl UnrarLibrary {
    /// The process-wide library, loaded on first use from
    /// [`LibraryConfig::from_env`]. A failed load is remembered.
    pub fn global() -> Result<Arc<UnrarLibrary>, LibraryError> {
        GLOBAL
            .get_or_init(|| Self::load(&LibraryConfig::from_env()).map(Arc::new))
            .clone()
    }

    /// Load an independent instance of the library.
    pub fn load(config: &LibraryConfig) -> Result<UnrarLibrary, LibraryError> {
        if let Some(path) = &config.path {
            // SAFETY: loading runs the library's initializers; UnRAR has none
            // with preconditions.
            let library = unsafe { Library::new(path) }.map_err(|e| LibraryError::Load {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            return Self::from_library(library, path.clone());
        }

        for name in DEFAULT_NAMES {
            // SAFETY: as above.
            match unsafe { Library::new(*name) } {
                Ok(library) => return Self::from_library(library, PathBuf::from(name)),
                Err(e) => debug!(name, error = %e, "unrar library candidate not loadable"),
            }
        }

        Err(LibraryError::NotFound {
            candidates: DEFAULT_NAMES.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn from_library(library: Library, path: PathBuf) -> Result<UnrarLibrary, LibraryError> {
        // SAFETY: the declared signatures match dll.hpp, and the pointers stay
        // valid because the library is stored alongside them.
        let api = unsafe {
            NativeApi {
                open: *library
                    .get::<ffi::OpenArchiveFn>(b"RAROpenArchiveEx\0")
                    .map_err(missing("RAROpenArchiveEx"))?,
                close: *library
                    .get::<ffi::CloseArchiveFn>(b"RARCloseArchive\0")
                    .map_err(missing("RARCloseArchive"))?,
                read_header: *library
                    .get::<ffi::ReadHeaderFn>(b"RARReadHeaderEx\0")
                    .map_err(missing("RARReadHeaderEx"))?,
                process_file: *library
                    .get::<ffi::ProcessFileFn>(b"RARProcessFile\0")
                    .map_err(missing("RARProcessFile"))?,
                dll_version: *library
                    .get::<ffi::GetDllVersionFn>(b"RARGetDllVersion\0")
                    .map_err(missing("RARGetDllVersion"))?,
            }
        };
        let loaded = UnrarLibrary {
            api,
            path: Some(path),
            _library: Some(library),
        };
        debug!(
            path = ?loaded.path,
            version = loaded.dll_version(),
            "unrar library loaded"
        );
        Ok(loaded)
    }

    /// Wrap entry points that are not backed by a loaded library.
    #[cfg(test)]
    pub(crate) fn from_api(api: NativeApi) -> UnrarLibrary {
        UnrarLibrary {
            api,
            path: None,
            _library: None,
        }
    }

    pub(crate) fn api(&self) -> &NativeApi {
        &self.api
    }

    /// Path or name the library was loaded from.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// API version of the loaded library (`RAR_DLL_VERSION`).
    pub fn dll_version(&self) -> i32 {
        // SAFETY: takes no arguments and has no preconditions.
        unsafe { (self.api.dll_version)() }
    }
}

fn missing(symbol: &'static str) -> impl FnOnce(libloading::Error) -> LibraryError {
    move |e| LibraryError::MissingSymbol {
        symbol,
        reason: e.to_string(),
    }
}
