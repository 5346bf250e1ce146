//! One open archive driven by the listing and extraction helpers.
//!
//! A [`Session`] holds host exclusivity for its whole lifetime and owns the
//! callback state shared with the bridge, so failures can be classified
//! with what the callback saw (whether a password was asked for, whether
//! the caller cancelled).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::archive::ArchiveHandle;
use crate::callback::{self, ArchiveCallback};
use crate::error::{CallbackResult, Error, ExtractError, NativeStatus, RarError};
use crate::host::{self, HostGuard};
use crate::library::UnrarLibrary;
use crate::types::{EntryHeader, OpenMode, Operation};

/// Where decompressed data delivered through the callback goes.
pub(crate) enum Sink {
    Discard,
    File(File),
    Memory(Vec<u8>),
}

pub(crate) struct CallbackState {
    password: Option<String>,
    password_requested: bool,
    verify_data: bool,
    cancel_flag: Option<Arc<AtomicBool>>,
    sink: Sink,
    written: u64,
    crc: u32,
}

impl CallbackState {
    /// Prepare for the next entry: forget the password request, start a new
    /// byte count and continue the CRC from `crc`.
    pub(crate) fn reset(&mut self, sink: Sink, crc: u32) {
        self.password_requested = false;
        self.sink = sink;
        self.written = 0;
        self.crc = crc;
    }

    pub(crate) fn set_sink(&mut self, sink: Sink) {
        self.sink = sink;
    }

    /// Take the sink out, leaving [`Sink::Discard`] behind.
    pub(crate) fn take_sink(&mut self) -> Sink {
        std::mem::replace(&mut self.sink, Sink::Discard)
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn crc(&self) -> u32 {
        self.crc
    }
}

struct SharedCallback(Arc<Mutex<CallbackState>>);

impl ArchiveCallback for SharedCallback {
    fn get_password(&mut self) -> CallbackResult<Option<String>> {
        let mut state = self.0.lock();
        state.password_requested = true;
        Ok(state.password.clone())
    }

    fn process_data(&mut self, data: &[u8]) -> CallbackResult<bool> {
        let mut state = self.0.lock();
        if state
            .cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return Ok(false);
        }
        match &mut state.sink {
            Sink::Discard => {}
            Sink::File(file) => callback::write_fully(file, data)?,
            Sink::Memory(buf) => buf.extend_from_slice(data),
        }
        state.written += data.len() as u64;
        if state.verify_data {
            let mut hasher = crc32fast::Hasher::new_with_initial(state.crc);
            hasher.update(data);
            state.crc = hasher.finalize();
        }
        Ok(true)
    }
}

pub(crate) struct Session {
    // Declared first so the handle is closed before the guard is released.
    handle: ArchiveHandle,
    host: HostGuard,
    state: Arc<Mutex<CallbackState>>,
    archive: PathBuf,
}

impl Session {
    pub(crate) fn open(
        library: &Arc<UnrarLibrary>,
        archive: &Path,
        password: Option<&str>,
        mode: OpenMode,
        verify_data: bool,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> Result<Session, ExtractError> {
        Self::open_inner(library, archive, password, mode, verify_data, cancel_flag, false)
            .map(|(session, _)| session)
    }

    /// Open the archive only to read its comment.
    pub(crate) fn comment(library: &Arc<UnrarLibrary>, archive: &Path) -> Result<Vec<u8>, ExtractError> {
        let (_, comment) =
            Self::open_inner(library, archive, None, OpenMode::List, false, None, true)?;
        Ok(comment.unwrap_or_default())
    }

    fn open_inner(
        library: &Arc<UnrarLibrary>,
        archive: &Path,
        password: Option<&str>,
        mode: OpenMode,
        verify_data: bool,
        cancel_flag: Option<Arc<AtomicBool>>,
        want_comment: bool,
    ) -> Result<(Session, Option<Vec<u8>>), ExtractError> {
        let state = Arc::new(Mutex::new(CallbackState {
            password: password.map(String::from),
            password_requested: false,
            verify_data,
            cancel_flag,
            sink: Sink::Discard,
            written: 0,
            crc: 0,
        }));
        let mut host = host::acquire();
        let (handle, comment) = ArchiveHandle::open(
            library.clone(),
            &mut host,
            archive,
            Some(Box::new(SharedCallback(state.clone()))),
            mode,
            want_comment,
        )
        .map_err(|source| ExtractError::OpenFailed {
            path: archive.to_path_buf(),
            source,
        })?;

        let session = Session {
            handle,
            host,
            state,
            archive: archive.to_path_buf(),
        };
        Ok((session, comment))
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, CallbackState> {
        self.state.lock()
    }

    pub(crate) fn next_header(&mut self) -> Result<Option<EntryHeader>, ExtractError> {
        self.handle
            .read_next_header(&mut self.host)
            .map_err(|e| self.classify(e))
    }

    pub(crate) fn process(
        &mut self,
        operation: Operation,
        output: Option<&File>,
    ) -> Result<(), ExtractError> {
        self.handle
            .process_file(&mut self.host, operation, output)
            .map_err(|e| self.classify(e))
    }

    /// Map a bridge failure to the error a caller of the helpers expects.
    fn classify(&self, err: Error) -> ExtractError {
        let state = self.state.lock();
        if state
            .cancel_flag
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            return ExtractError::Cancelled;
        }
        let archive = self.archive.clone();
        let from_callback = matches!(err, Error::Rar(RarError::Callback(_)));
        match err.status() {
            Some(NativeStatus::MissingPassword) => ExtractError::PasswordRequired(archive),
            Some(NativeStatus::BadPassword) => ExtractError::BadPassword(archive),
            Some(NativeStatus::BadData) if state.password_requested => {
                if state.password.is_some() {
                    ExtractError::BadPassword(archive)
                } else {
                    ExtractError::PasswordRequired(archive)
                }
            }
            None if from_callback && state.password_requested && state.password.is_none() => {
                ExtractError::PasswordRequired(archive)
            }
            _ => ExtractError::Unrar(err),
        }
    }
}
