//! The callback bridge.
//!
//! UnRAR reports volume changes, asks for passwords and hands over
//! decompressed data through a single C callback, invoked synchronously on
//! the stack of whichever native call is running. [`unrar_callback`] is that
//! function. It finds its [`OperationContext`] through the native user-data
//! slot, re-acquires the host lock for every call into caller code, and turns
//! every failure into a pending error plus an abort code: native code only
//! understands integers, so nothing else may cross back.

use std::fs::File;
use std::io::{self, Write};
use std::os::raw::{c_int, c_uint};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tracing::trace;

use crate::error::{BoxError, CallbackError, CallbackResult};
use crate::ffi::{self, LParam, WideChar};
use crate::host;
use crate::marshal;

/// Maximum length in bytes of a pending callback error message.
pub const CALLBACK_ERROR_LIMIT: usize = 256;

/// Caller-supplied handler for password requests and decompressed data.
///
/// Both methods are optional: the default implementations report that the
/// capability is missing, which the bridge treats like any other callback
/// failure. Methods run with the host lock held.
pub trait ArchiveCallback: Send {
    /// Supply the password for an encrypted archive or entry, or `None` to
    /// give up.
    fn get_password(&mut self) -> CallbackResult<Option<String>> {
        Err(CallbackError::NotImplemented("get_password").into())
    }

    /// Receive the next chunk of decompressed data. Return `false` to cancel
    /// processing.
    fn process_data(&mut self, data: &[u8]) -> CallbackResult<bool> {
        let _ = data;
        Err(CallbackError::NotImplemented("process_data").into())
    }
}

/// Single-slot store for an error raised while a native call was running.
#[derive(Debug, Default)]
pub(crate) struct PendingError {
    message: Option<String>,
}

impl PendingError {
    /// Record `message` unless an earlier error is already pending.
    pub(crate) fn set(&mut self, message: impl Into<String>) {
        if self.message.is_some() {
            return;
        }
        let mut message = message.into();
        if message.len() > CALLBACK_ERROR_LIMIT {
            let mut end = CALLBACK_ERROR_LIMIT;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        trace!(%message, "callback error recorded");
        self.message = Some(message);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.message.is_some()
    }

    pub(crate) fn take(&mut self) -> Option<String> {
        self.message.take()
    }

    pub(crate) fn clear(&mut self) {
        self.message = None;
    }
}

/// Per-handle state reachable from the native callback.
pub(crate) struct OperationContext {
    pub(crate) callback: Option<Box<dyn ArchiveCallback>>,
    pub(crate) pending: PendingError,
    /// Set only for the duration of a process-file call.
    pub(crate) output: Option<File>,
}

impl OperationContext {
    pub(crate) fn new(callback: Option<Box<dyn ArchiveCallback>>) -> Self {
        Self {
            callback,
            pending: PendingError::default(),
            output: None,
        }
    }

    fn dispatch(&mut self, msg: c_uint, p1: LParam, p2: LParam) -> c_int {
        match msg {
            ffi::UCM_CHANGEVOLUME | ffi::UCM_CHANGEVOLUMEW => self.change_volume(p2),
            // Wide password requests come first, so the ANSI one is never needed
            ffi::UCM_NEEDPASSWORD => ffi::CALLBACK_ABORT,
            ffi::UCM_NEEDPASSWORDW => self.need_password(p1, p2),
            ffi::UCM_PROCESSDATA => self.process_data(p1, p2),
            _ => ffi::CALLBACK_ABORT,
        }
    }

    fn change_volume(&mut self, p2: LParam) -> c_int {
        if p2 == ffi::RAR_VOL_NOTIFY {
            return ffi::CALLBACK_CONTINUE;
        }
        self.pending
            .set("Could not find next part of a multi-part archive");
        ffi::CALLBACK_ABORT
    }

    fn need_password(&mut self, p1: LParam, p2: LParam) -> c_int {
        if p2 <= 0 {
            self.pending.set(format!(
                "Invalid password buffer length sent to callback: {}",
                p2
            ));
            return ffi::CALLBACK_ABORT;
        }
        if p1 == 0 {
            self.pending.set("Null password buffer sent to callback");
            return ffi::CALLBACK_ABORT;
        }
        let Some(callback) = self.callback.as_mut() else {
            self.pending.set("No callback provided");
            return ffi::CALLBACK_ABORT;
        };

        let answer = {
            let _host = host::acquire();
            guarded(|| callback.get_password())
        };

        match answer {
            Ok(Some(password)) => {
                // SAFETY: the library lends a writable buffer of `p2` wide
                // characters for the duration of this call.
                let buf = unsafe {
                    std::slice::from_raw_parts_mut(p1 as *mut WideChar, low_length(p2))
                };
                match marshal::to_wide(&password, buf) {
                    Ok(_) => ffi::CALLBACK_CONTINUE,
                    Err(e) => {
                        self.pending.set(format!(
                            "The password callback handler returned an unusable password: {}",
                            e
                        ));
                        ffi::CALLBACK_ABORT
                    }
                }
            }
            Ok(None) => {
                self.pending
                    .set("The password callback handler did not provide a password");
                ffi::CALLBACK_ABORT
            }
            Err(e) => {
                self.pending.set(format!(
                    "An exception occurred in the password callback handler: {}",
                    e
                ));
                ffi::CALLBACK_ABORT
            }
        }
    }

    fn process_data(&mut self, p1: LParam, p2: LParam) -> c_int {
        if p2 < 0 {
            self.pending
                .set(format!("Invalid buffer length sent to callback: {}", p2));
            return ffi::CALLBACK_ABORT;
        }
        let data: &[u8] = if p1 == 0 || p2 == 0 {
            &[]
        } else {
            // SAFETY: the library hands over `p2` readable bytes at `p1` for
            // the duration of this call.
            unsafe { std::slice::from_raw_parts(p1 as *const u8, low_length(p2)) }
        };

        if let Some(output) = self.output.as_mut() {
            return match write_fully(output, data) {
                Ok(()) => ffi::CALLBACK_CONTINUE,
                Err(e) => {
                    self.pending.set(format!(
                        "Failed to write all bytes to output file. Error: {}",
                        e
                    ));
                    ffi::CALLBACK_ABORT
                }
            };
        }

        let Some(callback) = self.callback.as_mut() else {
            self.pending.set("No callback provided");
            return ffi::CALLBACK_ABORT;
        };

        let verdict = {
            let _host = host::acquire();
            guarded(|| callback.process_data(data))
        };

        match verdict {
            Ok(true) => ffi::CALLBACK_CONTINUE,
            Ok(false) => {
                self.pending.set("Processing canceled by the callback");
                ffi::CALLBACK_ABORT
            }
            Err(e) => {
                self.pending.set(format!(
                    "An exception occurred in the data callback handler: {}",
                    e
                ));
                ffi::CALLBACK_ABORT
            }
        }
    }
}

/// Only the low 32 bits of a length are meaningful: on LLP64 targets the
/// library widens a 32-bit value into `LPARAM`.
fn low_length(p2: LParam) -> usize {
    (p2 as u64 & 0xffff_ffff) as usize
}

/// Run caller code, turning a panic into an ordinary error so it never
/// unwinds into the native frame.
fn guarded<T>(f: impl FnOnce() -> CallbackResult<T>) -> CallbackResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".to_string());
            Err(BoxError::from(format!("callback panicked: {}", message)))
        }
    }
}

/// Write all of `data`, retrying writes that were interrupted or would block.
pub(crate) fn write_fully<W: Write + ?Sized>(out: &mut W, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match out.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!("write interrupted, retrying");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("write would block, retrying");
                thread::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// The function registered with the native library for every open handle.
pub(crate) extern "system" fn unrar_callback(
    msg: c_uint,
    user_data: LParam,
    p1: LParam,
    p2: LParam,
) -> c_int {
    if user_data == 0 {
        return ffi::CALLBACK_ABORT;
    }
    // SAFETY: `user_data` is the `OperationContext` registered at open. It
    // outlives the native handle, and no Rust reference to it is live while
    // a native call runs.
    let ctx = unsafe { &mut *(user_data as *mut OperationContext) };
    trace!(msg, p2, "unrar callback");
    ctx.dispatch(msg, p1, p2)
}
