//! The archive handle: open, read headers, process entries, close.

use std::fs::File;
use std::mem;
use std::os::raw::{c_char, c_int, c_uint};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::callback::{self, ArchiveCallback, OperationContext};
use crate::error::{Error, RarError, Result};
use crate::ffi::{self, LParam, WideChar};
use crate::host::{self, HostGuard};
use crate::library::UnrarLibrary;
use crate::marshal;
use crate::types::{EntryHeader, OpenMode, Operation};

/// Capacity of the comment buffer. The format limits comments to 256 KiB.
pub const COMMENT_CAPACITY: usize = 512 * 1024;

/// Capacity, in wide characters, of the buffer lent for redirection targets.
pub const REDIR_CAPACITY: usize = 4096;

/// An open archive.
///
/// Owns the native handle and the context the callback bridge works on.
/// Both are released exactly once, by [`close`](ArchiveHandle::close) or on
/// drop, whichever comes first. Every operation on a closed handle fails
/// with [`Error::Closed`].
pub struct ArchiveHandle {
    library: Arc<UnrarLibrary>,
    handle: ffi::Handle,
    ctx: *mut OperationContext,
    archive_flags: u32,
}

// SAFETY: the native handle is only used through `&mut self`, and the context
// holds only `Send` data.
unsafe impl Send for ArchiveHandle {}

impl ArchiveHandle {
    /// Open the archive at `path`.
    ///
    /// The callback (if any) answers password requests and receives data for
    /// the lifetime of the handle. When `want_comment` is set, the archive
    /// comment is returned as well; it is empty when the archive has none.
    pub fn open(
        library: Arc<UnrarLibrary>,
        host: &mut HostGuard,
        path: &Path,
        callback: Option<Box<dyn ArchiveCallback>>,
        mode: OpenMode,
        want_comment: bool,
    ) -> Result<(ArchiveHandle, Option<Vec<u8>>)> {
        let mut name = vec![0 as WideChar; marshal::PATH_CAPACITY];
        marshal::path_to_wide(path, &mut name)?;
        let mut comment = if want_comment {
            vec![0u8; COMMENT_CAPACITY]
        } else {
            Vec::new()
        };

        let ctx = Box::into_raw(Box::new(OperationContext::new(callback)));
        let mut data = ffi::RAROpenArchiveDataEx::zeroed();
        data.ArcNameW = name.as_mut_ptr();
        data.OpenMode = mode.as_raw();
        data.Callback = Some(callback::unrar_callback);
        data.UserData = ctx as LParam;
        if want_comment {
            data.CmtBuf = comment.as_mut_ptr() as *mut c_char;
            data.CmtBufSize = COMMENT_CAPACITY as c_uint;
        }

        let api = *library.api();
        // SAFETY: every buffer referenced by `data` outlives the call.
        let raw = host.allow_threads(|| unsafe { (api.open)(&mut data) });

        let status = data.OpenResult as c_int;
        if raw.is_null() || status != ffi::ERAR_SUCCESS {
            if !raw.is_null() {
                // SAFETY: the handle came from a failed open and is not used again.
                unsafe { (api.close)(raw) };
            }
            // SAFETY: the library no longer references the context.
            drop(unsafe { Box::from_raw(ctx) });
            debug!(path = %path.display(), status, "failed to open archive");
            let code = if status == ffi::ERAR_SUCCESS {
                ffi::ERAR_UNKNOWN
            } else {
                status
            };
            return Err(Error::from_status(code));
        }

        let comment = want_comment.then(|| {
            let len = (data.CmtSize as usize).saturating_sub(1).min(COMMENT_CAPACITY);
            comment.truncate(len);
            comment
        });

        debug!(path = %path.display(), ?mode, flags = data.Flags, "archive opened");
        let handle = ArchiveHandle {
            library,
            handle: raw,
            ctx,
            archive_flags: data.Flags,
        };
        Ok((handle, comment))
    }

    /// Release the native handle and the callback. Closing an already closed
    /// handle does nothing.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        // Dropping the callback runs caller code.
        let _host = host::acquire();

        let handle = mem::replace(&mut self.handle, ptr::null_mut());
        if !handle.is_null() {
            // SAFETY: the handle is live and is never used again.
            let status = unsafe { (self.library.api().close)(handle) };
            if status != ffi::ERAR_SUCCESS {
                warn!(status, "failed to close archive cleanly");
            }
        }

        let ctx = mem::replace(&mut self.ctx, ptr::null_mut());
        if !ctx.is_null() {
            // SAFETY: allocated in `open`; the native handle that referenced
            // it is gone.
            drop(unsafe { Box::from_raw(ctx) });
        }
        debug!("archive closed");
    }

    /// Whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.handle.is_null() && self.ctx.is_null()
    }

    /// `ROADF_*` flags the library reported when the archive was opened.
    pub fn archive_flags(&self) -> u32 {
        self.archive_flags
    }

    /// Whether the archive is part of a multi-volume set.
    pub fn is_volume(&self) -> bool {
        self.archive_flags & ffi::ROADF_VOLUME != 0
    }

    /// Advance to the next entry and return its header, or `None` once the
    /// end of the archive is reached. The end is sticky: further calls keep
    /// returning `None`.
    pub fn read_next_header(&mut self, host: &mut HostGuard) -> Result<Option<EntryHeader>> {
        let (handle, ctx) = self.live()?;
        // SAFETY: no native call is running, so nothing else touches the context.
        unsafe { (*ctx).pending.clear() };

        let mut header = ffi::RARHeaderDataEx::zeroed();
        let mut redir = vec![0 as WideChar; REDIR_CAPACITY];
        header.RedirName = redir.as_mut_ptr();
        header.RedirNameSize = REDIR_CAPACITY as c_uint;

        let api = *self.library.api();
        // SAFETY: the handle is live and both buffers outlive the call.
        let status = host.allow_threads(|| unsafe { (api.read_header)(handle, &mut *header) });

        match status {
            ffi::ERAR_END_ARCHIVE => {
                debug!("end of archive");
                Ok(None)
            }
            ffi::ERAR_SUCCESS => {
                let entry = decode_header(&header);
                debug!(filename = %entry.filename, size = entry.unpack_size, "read header");
                Ok(Some(entry))
            }
            code => Err(Error::from_status(code)),
        }
    }

    /// Process the entry whose header was read last.
    ///
    /// With `output` set, decompressed bytes are written to that file instead
    /// of being handed to the callback. A failure raised inside the callback
    /// is reported in place of the library's generic `ERAR_UNKNOWN`.
    pub fn process_file(
        &mut self,
        host: &mut HostGuard,
        operation: Operation,
        output: Option<&File>,
    ) -> Result<()> {
        let (handle, ctx) = self.live()?;
        let output = output.map(File::try_clone).transpose()?;
        // SAFETY: no native call is running, so nothing else touches the context.
        unsafe {
            (*ctx).pending.clear();
            (*ctx).output = output;
        }

        let api = *self.library.api();
        let op = operation.as_raw();
        // SAFETY: the handle is live; null destination paths are allowed.
        let status = host.allow_threads(|| unsafe {
            (api.process_file)(handle, op, ptr::null_mut(), ptr::null_mut())
        });

        // SAFETY: the native call has returned.
        let pending = unsafe {
            (*ctx).output = None;
            (*ctx).pending.take()
        };
        debug!(?operation, status, "processed entry");

        match (status, pending) {
            (ffi::ERAR_SUCCESS, _) => Ok(()),
            (ffi::ERAR_UNKNOWN, Some(message)) => Err(RarError::Callback(message).into()),
            (code, _) => Err(Error::from_status(code)),
        }
    }

    fn live(&self) -> Result<(ffi::Handle, *mut OperationContext)> {
        if self.handle.is_null() || self.ctx.is_null() {
            return Err(Error::Closed);
        }
        Ok((self.handle, self.ctx))
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("closed", &self.is_closed())
            .field("archive_flags", &self.archive_flags)
            .finish()
    }
}

fn decode_header(h: &ffi::RARHeaderDataEx) -> EntryHeader {
    let redir_len = (h.RedirNameSize as usize).min(REDIR_CAPACITY);
    let redir_name = if h.RedirType != 0 && redir_len > 0 {
        // SAFETY: `RedirName` is null or the buffer lent in `read_next_header`.
        unsafe { marshal::from_wide(h.RedirName, redir_len) }
            .map(|name| match name.find('\0') {
                Some(end) => name[..end].to_string(),
                None => name,
            })
            .filter(|name| !name.is_empty())
    } else {
        None
    };

    EntryHeader {
        filename: marshal::from_wide_nul(&h.FileNameW),
        flags: h.Flags,
        pack_size: marshal::combine(h.PackSizeHigh, h.PackSize),
        unpack_size: marshal::combine(h.UnpSizeHigh, h.UnpSize),
        host_os: h.HostOS,
        file_crc: h.FileCRC,
        file_time: h.FileTime,
        unpack_ver: h.UnpVer,
        method: h.Method,
        file_attr: h.FileAttr,
        is_dir: h.Flags & ffi::RHDF_DIRECTORY != 0,
        is_encrypted: h.Flags & ffi::RHDF_ENCRYPTED != 0,
        dict_size: h.DictSize,
        redir_type: h.RedirType,
        redir_name,
        mtime: marshal::combine(h.MtimeHigh, h.MtimeLow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallbackResult, NativeStatus};
    use crate::testing::{self, close_calls, fake_library};
    use std::io::{Read, Seek, SeekFrom};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Collect {
        password: Option<String>,
        accept: bool,
        chunks: Arc<AtomicUsize>,
        data: Arc<parking_lot::Mutex<Vec<u8>>>,
    }

    impl Collect {
        fn new(password: Option<&str>, accept: bool) -> Self {
            Collect {
                password: password.map(String::from),
                accept,
                chunks: Arc::default(),
                data: Arc::default(),
            }
        }
    }

    impl ArchiveCallback for Collect {
        fn get_password(&mut self) -> CallbackResult<Option<String>> {
            Ok(self.password.clone())
        }

        fn process_data(&mut self, data: &[u8]) -> CallbackResult<bool> {
            self.chunks.fetch_add(1, Ordering::SeqCst);
            self.data.lock().extend_from_slice(data);
            Ok(self.accept)
        }
    }

    fn open(
        name: &str,
        callback: Option<Box<dyn ArchiveCallback>>,
        mode: OpenMode,
    ) -> Result<ArchiveHandle> {
        let mut host = host::acquire();
        ArchiveHandle::open(fake_library(), &mut host, Path::new(name), callback, mode, false)
            .map(|(handle, _)| handle)
    }

    fn read_all(handle: &mut ArchiveHandle) -> Vec<EntryHeader> {
        let mut host = host::acquire();
        let mut headers = Vec::new();
        while let Some(h) = handle.read_next_header(&mut host).unwrap() {
            handle.process_file(&mut host, Operation::Skip, None).unwrap();
            headers.push(h);
        }
        headers
    }

    #[test]
    fn test_headers_in_native_order_then_sticky_end() {
        let mut handle = open("simple.rar", None, OpenMode::List).unwrap();
        let names: Vec<String> = read_all(&mut handle).into_iter().map(|h| h.filename).collect();
        assert_eq!(
            names,
            [
                "1/sub-one",
                "one.txt",
                "诶比屁.txt",
                "Füße.txt",
                "2/sub-two.txt",
                "symlink",
                "1",
                "2",
                "uncompressed",
                "max-compressed"
            ]
        );

        let mut host = host::acquire();
        assert!(handle.read_next_header(&mut host).unwrap().is_none());
        assert!(handle.read_next_header(&mut host).unwrap().is_none());
    }

    #[test]
    fn test_open_missing_archive_is_open_failure() {
        let err = open("does-not-exist.rar", None, OpenMode::List).unwrap_err();
        assert_eq!(err.status(), Some(NativeStatus::OpenFailed));
        assert!(matches!(err, Error::Rar(RarError::Status(_))));
    }

    #[test]
    fn test_open_failure_with_handle_still_closes_it() {
        let before = close_calls();
        let err = open("broken.rar", None, OpenMode::List).unwrap_err();
        assert_eq!(err.status(), Some(NativeStatus::BadArchive));
        assert_eq!(close_calls(), before + 1);
    }

    #[test]
    fn test_open_out_of_memory() {
        let err = open("nomem.rar", None, OpenMode::List).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory));
    }

    #[test]
    fn test_open_rejects_interior_nul() {
        let err = open("bad\0name.rar", None, OpenMode::List).unwrap_err();
        assert!(matches!(err, Error::Marshal(_)));
    }

    #[test]
    fn test_comment_is_trimmed() {
        let mut host = host::acquire();
        let (handle, comment) = ArchiveHandle::open(
            fake_library(),
            &mut host,
            Path::new("simple.rar"),
            None,
            OpenMode::List,
            true,
        )
        .unwrap();
        assert_eq!(comment.as_deref(), Some(&b"some comment\n"[..]));
        assert_ne!(handle.archive_flags() & ffi::ROADF_COMMENT, 0);

        let (_, comment) = ArchiveHandle::open(
            fake_library(),
            &mut host,
            Path::new("locked.rar"),
            None,
            OpenMode::List,
            true,
        )
        .unwrap();
        assert_eq!(comment, Some(Vec::new()));
    }

    #[test]
    fn test_close_twice_and_drop_release_once() {
        let before = close_calls();
        let mut handle = open("simple.rar", None, OpenMode::List).unwrap();
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        drop(handle);
        assert_eq!(close_calls(), before + 1);
    }

    #[test]
    fn test_drop_closes() {
        let before = close_calls();
        drop(open("simple.rar", None, OpenMode::List).unwrap());
        assert_eq!(close_calls(), before + 1);
    }

    #[test]
    fn test_operations_on_closed_handle() {
        let mut handle = open("simple.rar", None, OpenMode::List).unwrap();
        handle.close();
        let mut host = host::acquire();
        assert!(matches!(handle.read_next_header(&mut host), Err(Error::Closed)));
        assert!(matches!(
            handle.process_file(&mut host, Operation::Test, None),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_directory_and_redirection_decoding() {
        let mut handle = open("simple.rar", None, OpenMode::List).unwrap();
        let headers = read_all(&mut handle);

        let dir = headers.iter().find(|h| h.filename == "1").unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.redir_name, None);

        let link = headers.iter().find(|h| h.filename == "symlink").unwrap();
        assert!(!link.is_dir);
        assert_eq!(link.redir_type, 1);
        assert_eq!(link.redir_name.as_deref(), Some("2/sub-two.txt"));

        let one = headers.iter().find(|h| h.filename == "one.txt").unwrap();
        assert_eq!(one.unpack_size, 4);
        assert_eq!(one.file_crc, crc32fast::hash(b"one\n"));
        assert_eq!(one.redir_name, None);
        assert_eq!(
            one.modified(),
            Some(std::time::UNIX_EPOCH + std::time::Duration::from_secs(testing::ONE_TXT_MTIME))
        );
    }

    #[test]
    fn test_split_sizes_are_recombined() {
        let mut handle = open("large.rar", None, OpenMode::List).unwrap();
        let headers = read_all(&mut handle);
        assert_eq!(headers[0].unpack_size, (1 << 32) + 7);
        assert_eq!(headers[0].pack_size, 0xFFFF_FFFF);
    }

    #[test]
    fn test_test_operation_delivers_data_to_callback() {
        let callback = Collect::new(None, true);
        let data = callback.data.clone();
        let mut handle = open("simple.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        let mut host = host::acquire();
        let header = handle.read_next_header(&mut host).unwrap().unwrap();
        assert_eq!(header.filename, "1/sub-one");
        handle.process_file(&mut host, Operation::Test, None).unwrap();
        assert_eq!(&*data.lock(), b"sub-one\n");
    }

    #[test]
    fn test_cancel_on_first_chunk() {
        let callback = Collect::new(None, false);
        let chunks = callback.chunks.clone();
        let mut handle = open("simple.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        let mut host = host::acquire();
        handle.read_next_header(&mut host).unwrap();
        let err = handle.process_file(&mut host, Operation::Test, None).unwrap_err();
        assert_eq!(err.to_string(), "Processing canceled by the callback");
        assert!(matches!(err, Error::Rar(RarError::Callback(_))));
        assert_eq!(chunks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_error_does_not_leak_into_next_operation() {
        let callback = Collect::new(None, false);
        let mut handle = open("simple.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        let mut host = host::acquire();
        handle.read_next_header(&mut host).unwrap();
        assert!(handle.process_file(&mut host, Operation::Test, None).is_err());
        handle.read_next_header(&mut host).unwrap();
        handle.process_file(&mut host, Operation::Skip, None).unwrap();
    }

    #[test]
    fn test_skip_delivers_nothing() {
        let callback = Collect::new(None, true);
        let chunks = callback.chunks.clone();
        let mut handle = open("simple.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        read_all(&mut handle);
        assert_eq!(chunks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_password_provider_success_and_refusal() {
        let mut host = host::acquire();

        let callback = Collect::new(Some("example"), true);
        let data = callback.data.clone();
        let mut handle = open("locked.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        let header = handle.read_next_header(&mut host).unwrap().unwrap();
        assert!(header.is_encrypted);
        handle.process_file(&mut host, Operation::Test, None).unwrap();
        assert_eq!(&*data.lock(), b"top secret\n");

        let callback = Collect::new(None, true);
        let mut handle = open("locked.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        handle.read_next_header(&mut host).unwrap();
        let err = handle.process_file(&mut host, Operation::Test, None).unwrap_err();
        assert_eq!(err.status(), Some(NativeStatus::MissingPassword));

        let callback = Collect::new(Some("wrong"), true);
        let mut handle = open("locked.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        handle.read_next_header(&mut host).unwrap();
        let err = handle.process_file(&mut host, Operation::Test, None).unwrap_err();
        assert_eq!(err.status(), Some(NativeStatus::BadPassword));
    }

    #[test]
    fn test_output_file_receives_data() {
        let mut file = tempfile::tempfile().unwrap();
        let mut handle = open("simple.rar", None, OpenMode::Extract).unwrap();
        let mut host = host::acquire();
        handle.read_next_header(&mut host).unwrap();
        handle.read_next_header(&mut host).unwrap();
        handle.process_file(&mut host, Operation::Test, Some(&file)).unwrap();

        let mut written = String::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_string(&mut written).unwrap();
        assert_eq!(written, "one\n");
    }

    #[test]
    fn test_output_write_failure_is_surfaced() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let read_only = File::open(temp.path()).unwrap();
        let mut handle = open("simple.rar", None, OpenMode::Extract).unwrap();
        let mut host = host::acquire();
        handle.read_next_header(&mut host).unwrap();
        let err = handle
            .process_file(&mut host, Operation::Test, Some(&read_only))
            .unwrap_err();

        let Error::Rar(RarError::Callback(message)) = &err else {
            panic!("unexpected error: {}", err);
        };
        assert!(message.starts_with("Failed to write all bytes to output file. Error: "));
        assert!(message.contains("os error"), "{}", message);
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_missing_volume_surfaces_callback_error() {
        let mut handle = open(
            "split-broken.part1.rar",
            Some(Box::new(Collect::new(None, true))),
            OpenMode::Extract,
        )
        .unwrap();
        assert!(handle.is_volume());
        let mut host = host::acquire();
        handle.read_next_header(&mut host).unwrap();
        let err = handle.process_file(&mut host, Operation::Test, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not find next part of a multi-part archive"
        );
    }

    #[test]
    fn test_found_volume_continues() {
        let callback = Collect::new(None, true);
        let data = callback.data.clone();
        let mut handle = open("split.part1.rar", Some(Box::new(callback)), OpenMode::Extract).unwrap();
        let mut host = host::acquire();
        handle.read_next_header(&mut host).unwrap();
        handle.process_file(&mut host, Operation::Test, None).unwrap();
        assert_eq!(&*data.lock(), b"first volume data|second volume data");
    }

    #[test]
    fn test_callback_dropped_on_close() {
        struct Tracked(Arc<AtomicUsize>);
        impl ArchiveCallback for Tracked {}
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut handle = open(
            "simple.rar",
            Some(Box::new(Tracked(drops.clone()))),
            OpenMode::List,
        )
        .unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        handle.close();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_moves_across_threads() {
        let mut handle = open("simple.rar", None, OpenMode::List).unwrap();
        let count = std::thread::spawn(move || read_all(&mut handle).len())
            .join()
            .unwrap();
        assert_eq!(count, 10);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = PathBuf::from(OsStr::from_bytes(b"bad-\xff.rar"));
        let mut host = host::acquire();
        let err = ArchiveHandle::open(fake_library(), &mut host, &path, None, OpenMode::List, false)
            .unwrap_err();
        assert!(matches!(err, Error::Marshal(crate::error::MarshalError::NotText(_))));
    }
}
