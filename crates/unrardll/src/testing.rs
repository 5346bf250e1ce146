//! An in-process stand-in for the UnRAR library.
//!
//! The fake implements the five entry points the bridge resolves and drives
//! the registered callback the same way the native library does: password
//! requests with a lent wide buffer, volume change messages, and data handed
//! over in small chunks. Archives are selected by file name, so tests never
//! touch real RAR files.

use std::cell::Cell;
use std::os::raw::{c_char, c_int, c_uint};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use crate::ffi::{self, Handle, LParam, WideChar};
use crate::library::{NativeApi, UnrarLibrary};
use crate::marshal;

pub(crate) const FAKE_DLL_VERSION: c_int = 9;

/// Size of each data chunk delivered through `UCM_PROCESSDATA`.
pub(crate) const CHUNK: usize = 4;

/// Modification time of `one.txt` in `simple.rar`, in Unix seconds.
pub(crate) const ONE_TXT_MTIME: u64 = 1_098_472_879;

const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

thread_local! {
    static CLOSE_CALLS: Cell<usize> = const { Cell::new(0) };
}

/// Number of `RARCloseArchive` calls made on this thread.
pub(crate) fn close_calls() -> usize {
    CLOSE_CALLS.with(Cell::get)
}

/// A library whose entry points are the fake functions below.
pub(crate) fn fake_library() -> Arc<UnrarLibrary> {
    Arc::new(UnrarLibrary::from_api(NativeApi {
        open: fake_open,
        close: fake_close,
        read_header: fake_read_header,
        process_file: fake_process_file,
        dll_version: fake_version,
    }))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VolumeEvent {
    None,
    /// The next volume is found automatically
    Notify,
    /// The next volume is missing and has to be asked for
    Ask,
}

#[derive(Clone)]
struct Record {
    name: &'static str,
    data: &'static [u8],
    flags: c_uint,
    crc: u32,
    unpack_size: u64,
    pack_size: u64,
    redir: Option<&'static str>,
    mtime: u64,
    password: Option<&'static str>,
    wrong_password_status: c_int,
    volume: VolumeEvent,
}

impl Record {
    fn file(name: &'static str, data: &'static [u8]) -> Self {
        Record {
            name,
            data,
            flags: 0,
            crc: crc32fast::hash(data),
            unpack_size: data.len() as u64,
            pack_size: data.len() as u64,
            redir: None,
            mtime: 0,
            password: None,
            wrong_password_status: ffi::ERAR_BAD_PASSWORD,
            volume: VolumeEvent::None,
        }
    }

    fn dir(name: &'static str) -> Self {
        Record {
            flags: ffi::RHDF_DIRECTORY,
            ..Record::file(name, b"")
        }
    }

    fn symlink(name: &'static str, target: &'static str) -> Self {
        Record {
            redir: Some(target),
            ..Record::file(name, b"")
        }
    }

    fn locked(mut self, password: &'static str) -> Self {
        self.flags |= ffi::RHDF_ENCRYPTED;
        self.password = Some(password);
        self
    }
}

struct Fixture {
    records: Vec<Record>,
    comment: Option<&'static [u8]>,
    flags: c_uint,
}

fn fixture(name: &str, mode: c_uint) -> Result<Fixture, c_int> {
    let plain = |records| Fixture {
        records,
        comment: None,
        flags: 0,
    };
    let fixture = match name {
        "simple.rar" => Fixture {
            records: vec![
                Record::file("1/sub-one", b"sub-one\n"),
                Record {
                    mtime: (ONE_TXT_MTIME + FILETIME_UNIX_OFFSET_SECS) * 10_000_000,
                    ..Record::file("one.txt", b"one\n")
                },
                Record::file("诶比屁.txt", b"chinese unicode\n"),
                Record::file("Füße.txt", b"unicode\n"),
                Record::file("2/sub-two.txt", b"sub-two\n"),
                Record::symlink("symlink", "2/sub-two.txt"),
                Record::dir("1"),
                Record::dir("2"),
                Record::file("uncompressed", b"uncompressed\n"),
                Record::file("max-compressed", b"max\n"),
            ],
            comment: Some(b"some comment\n"),
            flags: ffi::ROADF_COMMENT | ffi::ROADF_SOLID,
        },
        "locked.rar" => plain(vec![
            Record::file("secret.txt", b"top secret\n").locked("example")
        ]),
        "legacy-locked.rar" => plain(vec![Record {
            wrong_password_status: ffi::ERAR_BAD_DATA,
            ..Record::file("secret.txt", b"top secret\n").locked("example")
        }]),
        "corrupt.rar" => plain(vec![Record {
            crc: 0xdead_beef,
            ..Record::file("one.txt", b"one\n")
        }]),
        "large.rar" => plain(vec![Record {
            unpack_size: (1 << 32) + 7,
            pack_size: 0xFFFF_FFFF,
            ..Record::file("huge.bin", b"")
        }]),
        "traversal.rar" => plain(vec![
            Record::file("../escape.txt", b"escaped\n"),
            Record::symlink("link", "../../outside"),
            Record::file("ok.txt", b"ok\n"),
        ]),
        "chain.rar" => plain(vec![
            Record::symlink("y", "."),
            Record::symlink("x", "y/.."),
            Record::file("x/evil.txt", b"evil\n"),
            Record::file("ok.txt", b"ok\n"),
        ]),
        "split.part1.rar" | "split-broken.part1.rar" => {
            let volume = if name.starts_with("split-broken") {
                VolumeEvent::Ask
            } else {
                VolumeEvent::Notify
            };
            let whole: &'static [u8] = b"first volume data|second volume data";
            let record = Record {
                volume,
                ..Record::file("movie.bin", whole)
            };
            let records = if mode == ffi::RAR_OM_LIST_INCSPLIT {
                vec![
                    Record {
                        flags: ffi::RHDF_SPLITAFTER,
                        crc: crc32fast::hash(&whole[..17]),
                        ..record.clone()
                    },
                    Record {
                        flags: ffi::RHDF_SPLITBEFORE,
                        ..record
                    },
                ]
            } else {
                vec![record]
            };
            Fixture {
                records,
                comment: None,
                flags: ffi::ROADF_VOLUME | ffi::ROADF_FIRSTVOLUME,
            }
        }
        "broken.rar" => return Err(ffi::ERAR_BAD_ARCHIVE),
        "nomem.rar" => return Err(ffi::ERAR_NO_MEMORY),
        _ => return Err(ffi::ERAR_EOPEN),
    };
    Ok(fixture)
}

struct FakeArchive {
    records: Vec<Record>,
    mode: c_uint,
    callback: ffi::UnrarCallback,
    user_data: LParam,
    /// Index of the next header to report
    cursor: usize,
    /// Record whose header was read but not yet processed
    current: Option<usize>,
}

impl FakeArchive {
    fn call(&self, msg: c_uint, p1: LParam, p2: LParam) -> c_int {
        match self.callback {
            Some(callback) => callback(msg, self.user_data, p1, p2),
            None => ffi::CALLBACK_CONTINUE,
        }
    }

    fn process(&mut self, operation: c_int) -> c_int {
        let Some(index) = self.current.take() else {
            return ffi::ERAR_BAD_ARCHIVE;
        };
        let record = self.records[index].clone();
        if operation == ffi::RAR_SKIP
            || self.mode != ffi::RAR_OM_EXTRACT
            || record.flags & ffi::RHDF_DIRECTORY != 0
            || record.redir.is_some()
        {
            return ffi::ERAR_SUCCESS;
        }

        if let Some(expected) = record.password {
            let mut buf = [0 as WideChar; 128];
            let ret = self.call(
                ffi::UCM_NEEDPASSWORDW,
                buf.as_mut_ptr() as LParam,
                buf.len() as LParam,
            );
            if ret == ffi::CALLBACK_ABORT {
                return ffi::ERAR_MISSING_PASSWORD;
            }
            if marshal::from_wide_nul(&buf) != expected {
                return record.wrong_password_status;
            }
        }

        let halfway = record.data.len() / 2;
        let mut switched = record.volume == VolumeEvent::None;
        for (n, chunk) in record.data.chunks(CHUNK).enumerate() {
            if !switched && n * CHUNK >= halfway {
                switched = true;
                let mut next = [0 as WideChar; 64];
                let _ = marshal::to_wide("split.part2.rar", &mut next);
                let kind = match record.volume {
                    VolumeEvent::Ask => ffi::RAR_VOL_ASK,
                    _ => ffi::RAR_VOL_NOTIFY,
                };
                if self.call(ffi::UCM_CHANGEVOLUMEW, next.as_mut_ptr() as LParam, kind)
                    == ffi::CALLBACK_ABORT
                {
                    return ffi::ERAR_UNKNOWN;
                }
            }
            let ret = self.call(
                ffi::UCM_PROCESSDATA,
                chunk.as_ptr() as LParam,
                chunk.len() as LParam,
            );
            if ret == ffi::CALLBACK_ABORT {
                return ffi::ERAR_UNKNOWN;
            }
        }
        ffi::ERAR_SUCCESS
    }
}

fn split(value: u64) -> (c_uint, c_uint) {
    ((value >> 32) as c_uint, value as c_uint)
}

/// # Safety
///
/// `ptr` must point to a NUL-terminated wide string.
unsafe fn wide_len(ptr: *const WideChar) -> usize {
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    len
}

unsafe extern "system" fn fake_open(data: *mut ffi::RAROpenArchiveDataEx) -> Handle {
    let data = &mut *data;
    let path = marshal::from_wide(data.ArcNameW, wide_len(data.ArcNameW)).unwrap_or_default();
    let name = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let fixture = match fixture(&name, data.OpenMode) {
        Ok(fixture) => fixture,
        Err(ffi::ERAR_BAD_ARCHIVE) => {
            // Like the native library, a handle exists even though open failed
            data.OpenResult = ffi::ERAR_BAD_ARCHIVE as c_uint;
            return new_handle(Vec::new(), data);
        }
        Err(code) => {
            data.OpenResult = code as c_uint;
            return ptr::null_mut();
        }
    };

    data.OpenResult = ffi::ERAR_SUCCESS as c_uint;
    data.Flags = fixture.flags;
    data.CmtSize = 0;
    data.CmtState = 0;
    if let Some(comment) = fixture.comment {
        if !data.CmtBuf.is_null() && data.CmtBufSize as usize > comment.len() {
            ptr::copy_nonoverlapping(comment.as_ptr() as *const c_char, data.CmtBuf, comment.len());
            *data.CmtBuf.add(comment.len()) = 0;
            data.CmtSize = comment.len() as c_uint + 1;
            data.CmtState = 1;
        }
    }
    new_handle(fixture.records, data)
}

fn new_handle(records: Vec<Record>, data: &ffi::RAROpenArchiveDataEx) -> Handle {
    Box::into_raw(Box::new(FakeArchive {
        records,
        mode: data.OpenMode,
        callback: data.Callback,
        user_data: data.UserData,
        cursor: 0,
        current: None,
    })) as Handle
}

unsafe extern "system" fn fake_close(handle: Handle) -> c_int {
    CLOSE_CALLS.with(|c| c.set(c.get() + 1));
    if handle.is_null() {
        return ffi::ERAR_ECLOSE;
    }
    drop(Box::from_raw(handle as *mut FakeArchive));
    ffi::ERAR_SUCCESS
}

unsafe extern "system" fn fake_read_header(handle: Handle, header: *mut ffi::RARHeaderDataEx) -> c_int {
    let archive = &mut *(handle as *mut FakeArchive);
    let header = &mut *header;
    let Some(record) = archive.records.get(archive.cursor) else {
        archive.current = None;
        return ffi::ERAR_END_ARCHIVE;
    };

    if marshal::to_wide(record.name, &mut header.FileNameW).is_err() {
        return ffi::ERAR_SMALL_BUF;
    }
    header.Flags = record.flags;
    (header.PackSizeHigh, header.PackSize) = split(record.pack_size);
    (header.UnpSizeHigh, header.UnpSize) = split(record.unpack_size);
    header.HostOS = 3;
    header.FileCRC = record.crc;
    header.UnpVer = 50;
    header.Method = 0x33;
    header.FileAttr = if record.flags & ffi::RHDF_DIRECTORY != 0 {
        0o040755
    } else {
        0o100644
    };
    header.DictSize = 4096;
    (header.MtimeHigh, header.MtimeLow) = split(record.mtime);

    match record.redir {
        Some(target) if !header.RedirName.is_null() && header.RedirNameSize > 0 => {
            let buf = std::slice::from_raw_parts_mut(header.RedirName, header.RedirNameSize as usize);
            match marshal::to_wide(target, buf) {
                Ok(len) => header.RedirNameSize = len as c_uint,
                Err(_) => return ffi::ERAR_SMALL_BUF,
            }
            header.RedirType = 1;
        }
        Some(_) => header.RedirType = 1,
        None => header.RedirNameSize = 0,
    }

    archive.current = Some(archive.cursor);
    archive.cursor += 1;
    ffi::ERAR_SUCCESS
}

unsafe extern "system" fn fake_process_file(
    handle: Handle,
    operation: c_int,
    _dest_path: *mut c_char,
    _dest_name: *mut c_char,
) -> c_int {
    let archive = &mut *(handle as *mut FakeArchive);
    archive.process(operation)
}

unsafe extern "system" fn fake_version() -> c_int {
    FAKE_DLL_VERSION
}
