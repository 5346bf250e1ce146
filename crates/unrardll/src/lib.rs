//! # unrardll
//!
//! Safe bindings to the UnRAR shared library.
//!
//! The library does the decompression; this crate owns the native archive
//! handle, translates status codes into typed errors, converts strings and
//! split 64-bit values across the boundary, and bridges the C callback the
//! library uses to ask for passwords and hand over decompressed data.
//!
//! ## Primitives
//!
//! [`open_archive`], [`read_next_header`], [`process_file`] and
//! [`close_archive`] map one-to-one onto the native calls. The archive is
//! walked by reading a header and then processing (skipping, testing or
//! extracting) that entry, repeatedly.
//!
//! ```rust,no_run
//! use unrardll::{open_archive, process_file, read_next_header, OpenMode, Operation};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut handle, _) = open_archive(Path::new("archive.rar"), None, OpenMode::List, false)?;
//! while let Some(header) = read_next_header(&mut handle)? {
//!     println!("{} ({} bytes)", header.filename, header.unpack_size);
//!     process_file(&mut handle, Operation::Skip, None)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Helpers
//!
//! [`probe`] and [`extract`] build listing, comment reading and safe
//! extraction on top of the primitives.
//!
//! ```rust,no_run
//! use unrardll::{extract, ExtractOptions, UnrarLibrary};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let library = UnrarLibrary::global()?;
//! let options = ExtractOptions::default();
//! let cancel_flag = Arc::new(AtomicBool::new(false));
//! let progress_cb = |file: &str, bytes: u64, _total: Option<u64>| {
//!     println!("Extracting: {} ({} bytes)", file, bytes);
//!     true // Continue extraction
//! };
//!
//! let stats = extract(
//!     &library,
//!     Path::new("archive.rar"),
//!     Path::new("output"),
//!     &options,
//!     &progress_cb,
//!     cancel_flag,
//! )?;
//! println!("Extracted {} files ({} bytes)", stats.files_extracted, stats.bytes_written);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod callback;
pub mod error;
pub mod extract;
pub mod ffi;
pub mod host;
pub mod library;
pub mod marshal;
pub mod probe;
pub mod safety;
mod session;
#[cfg(test)]
mod testing;
pub mod types;

// Re-export main types
pub use archive::ArchiveHandle;
pub use callback::ArchiveCallback;
pub use error::{
    BoxError, CallbackError, CallbackResult, Error, ExtractError, LibraryError, MarshalError,
    NativeStatus, RarError, Result, SecurityError,
};
pub use host::HostGuard;
pub use library::{LibraryConfig, UnrarLibrary};
pub use types::{EntryHeader, ExtractOptions, ExtractStats, OpenMode, Operation};

use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Type alias for progress callback functions.
///
/// The callback receives:
/// - `file`: The entry that was just extracted
/// - `bytes_written`: Number of bytes written so far
/// - `total_bytes`: Size of the entry, as recorded in the archive
///
/// Returns `true` to continue extraction, `false` to cancel.
pub type ProgressCallback = dyn Fn(&str, u64, Option<u64>) -> bool + Send + Sync;

/// Open an archive with the process-wide library.
///
/// See [`ArchiveHandle::open`].
pub fn open_archive(
    path: &Path,
    callback: Option<Box<dyn ArchiveCallback>>,
    mode: OpenMode,
    want_comment: bool,
) -> Result<(ArchiveHandle, Option<Vec<u8>>)> {
    let library = UnrarLibrary::global()?;
    let mut host = host::acquire();
    ArchiveHandle::open(library, &mut host, path, callback, mode, want_comment)
}

/// Close an archive. Closing twice is harmless.
pub fn close_archive(handle: &mut ArchiveHandle) {
    handle.close();
}

/// Read the next entry header, or `None` at the end of the archive.
pub fn read_next_header(handle: &mut ArchiveHandle) -> Result<Option<EntryHeader>> {
    let mut host = host::acquire();
    handle.read_next_header(&mut host)
}

/// Process the entry whose header was read last.
pub fn process_file(
    handle: &mut ArchiveHandle,
    operation: Operation,
    output: Option<&File>,
) -> Result<()> {
    let mut host = host::acquire();
    handle.process_file(&mut host, operation, output)
}

/// API version of the process-wide library.
pub fn dll_version() -> Result<i32> {
    Ok(UnrarLibrary::global()?.dll_version())
}

/// Extract an archive to the specified output directory.
///
/// See [`extract::extract_archive`].
pub fn extract(
    library: &Arc<UnrarLibrary>,
    archive_path: &Path,
    output_dir: &Path,
    options: &ExtractOptions,
    progress_cb: &ProgressCallback,
    cancel_flag: Arc<AtomicBool>,
) -> std::result::Result<ExtractStats, ExtractError> {
    extract::extract_archive(library, archive_path, output_dir, options, progress_cb, cancel_flag)
}
