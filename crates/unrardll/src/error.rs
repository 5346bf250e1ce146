//! Error types for the UnRAR bridge and the extraction helpers built on it.

use std::fmt;
use std::os::raw::c_int;
use std::path::PathBuf;
use thiserror::Error;

use crate::ffi;

/// Result type alias for the primitive archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Status codes returned by the native library.
///
/// Translation from the raw integer is total: codes the bridge does not know
/// about are kept as [`NativeStatus::Unrecognized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeStatus {
    Success,
    /// No more entries. Callers treat this as a terminal state, not a failure.
    EndArchive,
    NoMemory,
    BadData,
    BadArchive,
    UnknownFormat,
    OpenFailed,
    CreateFailed,
    CloseFailed,
    ReadFailed,
    WriteFailed,
    SmallBuffer,
    Unknown,
    MissingPassword,
    BadReference,
    BadPassword,
    Unrecognized(i32),
}

impl NativeStatus {
    /// Translate a raw status code.
    pub fn from_code(code: c_int) -> Self {
        match code {
            ffi::ERAR_SUCCESS => NativeStatus::Success,
            ffi::ERAR_END_ARCHIVE => NativeStatus::EndArchive,
            ffi::ERAR_NO_MEMORY => NativeStatus::NoMemory,
            ffi::ERAR_BAD_DATA => NativeStatus::BadData,
            ffi::ERAR_BAD_ARCHIVE => NativeStatus::BadArchive,
            ffi::ERAR_UNKNOWN_FORMAT => NativeStatus::UnknownFormat,
            ffi::ERAR_EOPEN => NativeStatus::OpenFailed,
            ffi::ERAR_ECREATE => NativeStatus::CreateFailed,
            ffi::ERAR_ECLOSE => NativeStatus::CloseFailed,
            ffi::ERAR_EREAD => NativeStatus::ReadFailed,
            ffi::ERAR_EWRITE => NativeStatus::WriteFailed,
            ffi::ERAR_SMALL_BUF => NativeStatus::SmallBuffer,
            ffi::ERAR_UNKNOWN => NativeStatus::Unknown,
            ffi::ERAR_MISSING_PASSWORD => NativeStatus::MissingPassword,
            ffi::ERAR_EREFERENCE => NativeStatus::BadReference,
            ffi::ERAR_BAD_PASSWORD => NativeStatus::BadPassword,
            other => NativeStatus::Unrecognized(other),
        }
    }

    /// The raw status code.
    pub fn code(self) -> i32 {
        match self {
            NativeStatus::Success => ffi::ERAR_SUCCESS,
            NativeStatus::EndArchive => ffi::ERAR_END_ARCHIVE,
            NativeStatus::NoMemory => ffi::ERAR_NO_MEMORY,
            NativeStatus::BadData => ffi::ERAR_BAD_DATA,
            NativeStatus::BadArchive => ffi::ERAR_BAD_ARCHIVE,
            NativeStatus::UnknownFormat => ffi::ERAR_UNKNOWN_FORMAT,
            NativeStatus::OpenFailed => ffi::ERAR_EOPEN,
            NativeStatus::CreateFailed => ffi::ERAR_ECREATE,
            NativeStatus::CloseFailed => ffi::ERAR_ECLOSE,
            NativeStatus::ReadFailed => ffi::ERAR_EREAD,
            NativeStatus::WriteFailed => ffi::ERAR_EWRITE,
            NativeStatus::SmallBuffer => ffi::ERAR_SMALL_BUF,
            NativeStatus::Unknown => ffi::ERAR_UNKNOWN,
            NativeStatus::MissingPassword => ffi::ERAR_MISSING_PASSWORD,
            NativeStatus::BadReference => ffi::ERAR_EREFERENCE,
            NativeStatus::BadPassword => ffi::ERAR_BAD_PASSWORD,
            NativeStatus::Unrecognized(code) => code,
        }
    }

    /// The symbolic name used by the native headers, e.g. `ERAR_BAD_DATA`.
    pub fn name(self) -> &'static str {
        match self {
            NativeStatus::Success => "ERAR_SUCCESS",
            NativeStatus::EndArchive => "ERAR_END_ARCHIVE",
            NativeStatus::NoMemory => "ERAR_NO_MEMORY",
            NativeStatus::BadData => "ERAR_BAD_DATA",
            NativeStatus::BadArchive => "ERAR_BAD_ARCHIVE",
            NativeStatus::UnknownFormat => "ERAR_UNKNOWN_FORMAT",
            NativeStatus::OpenFailed => "ERAR_EOPEN",
            NativeStatus::CreateFailed => "ERAR_ECREATE",
            NativeStatus::CloseFailed => "ERAR_ECLOSE",
            NativeStatus::ReadFailed => "ERAR_EREAD",
            NativeStatus::WriteFailed => "ERAR_EWRITE",
            NativeStatus::SmallBuffer => "ERAR_SMALL_BUF",
            NativeStatus::Unknown => "ERAR_UNKNOWN",
            NativeStatus::MissingPassword => "ERAR_MISSING_PASSWORD",
            NativeStatus::BadReference => "ERAR_EREFERENCE",
            NativeStatus::BadPassword => "ERAR_BAD_PASSWORD",
            NativeStatus::Unrecognized(_) => "ERAR_UNRECOGNIZED",
        }
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NativeStatus::Success => "Unexpected success status",
            NativeStatus::EndArchive => "End of archive",
            NativeStatus::NoMemory => "Not enough memory",
            NativeStatus::BadData => "Archive data is corrupt",
            NativeStatus::BadArchive => "Not a valid RAR archive",
            NativeStatus::UnknownFormat => "Unknown archive format",
            NativeStatus::OpenFailed => "Failed to open archive or volume",
            NativeStatus::CreateFailed => "Failed to create output file",
            NativeStatus::CloseFailed => "Failed to close file",
            NativeStatus::ReadFailed => "Read error",
            NativeStatus::WriteFailed => "Write error",
            NativeStatus::SmallBuffer => "Buffer too small",
            NativeStatus::Unknown => "Unknown error",
            NativeStatus::MissingPassword => "A password is required",
            NativeStatus::BadReference => "Cannot open reference file",
            NativeStatus::BadPassword => "Incorrect password",
            NativeStatus::Unrecognized(code) => return write!(f, "Unknown error (code: {})", code),
        };
        f.write_str(text)
    }
}

/// Archive-specific failures: the category callers catch separately from
/// value and memory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RarError {
    /// The native library reported a failure status.
    #[error("{}: {}", .0.name(), .0)]
    Status(NativeStatus),

    /// A failure captured inside the callback bridge while a native call was
    /// in progress.
    #[error("{0}")]
    Callback(String),
}

/// Failures converting values to or from their native representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// The value is not valid Unicode text.
    #[error("The value must be unicode text: {0}")]
    NotText(String),

    /// Text with an embedded NUL cannot cross the boundary intact.
    #[error("Text contains an embedded NUL character")]
    InteriorNul,

    /// The destination buffer is too small.
    #[error("Text needs {needed} wide characters but only {capacity} fit")]
    Truncated {
        /// Wide characters required, including the terminator
        needed: usize,
        /// Capacity of the destination buffer
        capacity: usize,
    },
}

/// Failures loading the native library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    /// An explicitly configured library could not be loaded.
    #[error("Failed to load {path}: {reason}")]
    Load {
        /// Path that was tried
        path: PathBuf,
        /// Loader message
        reason: String,
    },

    /// None of the platform default names could be loaded.
    #[error("Could not find the unrar library (tried: {})", .candidates.join(", "))]
    NotFound {
        /// Every name that was tried
        candidates: Vec<String>,
    },

    /// The library loaded but lacks a required export.
    #[error("Missing symbol {symbol} in the unrar library: {reason}")]
    MissingSymbol {
        /// Name of the export
        symbol: &'static str,
        /// Loader message
        reason: String,
    },
}

/// Error type for the primitive operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Archive-specific failure.
    #[error(transparent)]
    Rar(#[from] RarError),

    /// A value could not be marshaled.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// The native library ran out of memory.
    #[error("Out of memory in the unrar library")]
    OutOfMemory,

    /// The handle was already closed.
    #[error("Not a valid RARFileHandle: the archive has been closed")]
    Closed,

    /// The native library could not be loaded.
    #[error(transparent)]
    Library(#[from] LibraryError),

    /// An I/O error outside the native library.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Translate a native status code into the error it represents.
    pub fn from_status(code: c_int) -> Self {
        match NativeStatus::from_code(code) {
            NativeStatus::NoMemory => Error::OutOfMemory,
            status => Error::Rar(RarError::Status(status)),
        }
    }

    /// The native status behind this error, if there is one.
    pub fn status(&self) -> Option<NativeStatus> {
        match self {
            Error::Rar(RarError::Status(status)) => Some(*status),
            Error::OutOfMemory => Some(NativeStatus::NoMemory),
            _ => None,
        }
    }
}

/// Error type returned by [`ArchiveCallback`](crate::ArchiveCallback) methods.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by [`ArchiveCallback`](crate::ArchiveCallback) methods.
pub type CallbackResult<T> = std::result::Result<T, BoxError>;

/// Errors raised by the bridge's own callback implementations.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The callback does not provide the requested capability.
    #[error("The callback object has no {0} method")]
    NotImplemented(&'static str),
}

/// Error type for the listing and extraction helpers.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive could not be opened.
    #[error("Failed to open archive at {path} with underlying unrar error: {source}")]
    OpenFailed {
        /// Archive path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: Error,
    },

    /// The archive requires a password but none was provided.
    #[error("A password is required for: {0}")]
    PasswordRequired(PathBuf),

    /// The provided password is incorrect.
    #[error("The specified password is incorrect for: {0}")]
    BadPassword(PathBuf),

    /// Extracted data does not match the checksum recorded in the archive.
    #[error("The CRC for {name} does not match. Expected: {expected} Got {actual}")]
    FileCorrupt {
        /// Entry name
        name: String,
        /// CRC recorded in the header
        expected: u32,
        /// CRC of the extracted data
        actual: u32,
    },

    /// A security violation was detected during extraction.
    #[error("Security violation: {0}")]
    Security(#[from] SecurityError),

    /// Any other failure from the primitive operations.
    #[error(transparent)]
    Unrar(#[from] Error),

    /// An I/O error occurred during extraction.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The extraction was cancelled by the user.
    #[error("Cancelled by user")]
    Cancelled,
}

/// Security-related errors during extraction.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Entry path resolves outside the extraction directory.
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),

    /// Link target resolves outside the extraction directory.
    #[error("Unsafe symlink target: {0}")]
    UnsafeSymlink(String),
}
