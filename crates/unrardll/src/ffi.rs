//! Raw declarations mirroring the UnRAR `dll.hpp` interface.
//!
//! Only the parts the bridge uses are declared. Struct layouts match UnRAR 7;
//! older libraries read a prefix of them and ignore the rest, since trailing
//! fields sit where those versions keep zeroed reserved space.
#![allow(non_snake_case)]
#![allow(dead_code)]

use std::os::raw::{c_char, c_int, c_uint, c_void};

/// Native wide character (`wchar_t`): UTF-16 on Windows, UTF-32 elsewhere.
pub type WideChar = libc::wchar_t;

/// `LPARAM`: pointer-sized signed integer.
pub type LParam = isize;

/// Opaque archive handle.
pub type Handle = *mut c_void;

/// `UNRARCALLBACK`.
pub type UnrarCallback =
    Option<extern "system" fn(msg: c_uint, user_data: LParam, p1: LParam, p2: LParam) -> c_int>;

pub type OpenArchiveFn = unsafe extern "system" fn(data: *mut RAROpenArchiveDataEx) -> Handle;
pub type CloseArchiveFn = unsafe extern "system" fn(handle: Handle) -> c_int;
pub type ReadHeaderFn =
    unsafe extern "system" fn(handle: Handle, header: *mut RARHeaderDataEx) -> c_int;
pub type ProcessFileFn = unsafe extern "system" fn(
    handle: Handle,
    operation: c_int,
    dest_path: *mut c_char,
    dest_name: *mut c_char,
) -> c_int;
pub type GetDllVersionFn = unsafe extern "system" fn() -> c_int;

// Status codes
pub const ERAR_SUCCESS: c_int = 0;
pub const ERAR_END_ARCHIVE: c_int = 10;
pub const ERAR_NO_MEMORY: c_int = 11;
pub const ERAR_BAD_DATA: c_int = 12;
pub const ERAR_BAD_ARCHIVE: c_int = 13;
pub const ERAR_UNKNOWN_FORMAT: c_int = 14;
pub const ERAR_EOPEN: c_int = 15;
pub const ERAR_ECREATE: c_int = 16;
pub const ERAR_ECLOSE: c_int = 17;
pub const ERAR_EREAD: c_int = 18;
pub const ERAR_EWRITE: c_int = 19;
pub const ERAR_SMALL_BUF: c_int = 20;
pub const ERAR_UNKNOWN: c_int = 21;
pub const ERAR_MISSING_PASSWORD: c_int = 22;
pub const ERAR_EREFERENCE: c_int = 23;
pub const ERAR_BAD_PASSWORD: c_int = 24;

// Open modes
pub const RAR_OM_LIST: c_uint = 0;
pub const RAR_OM_EXTRACT: c_uint = 1;
pub const RAR_OM_LIST_INCSPLIT: c_uint = 2;

// Process operations
pub const RAR_SKIP: c_int = 0;
pub const RAR_TEST: c_int = 1;
pub const RAR_EXTRACT: c_int = 2;

// Volume change notifications
pub const RAR_VOL_ASK: LParam = 0;
pub const RAR_VOL_NOTIFY: LParam = 1;

// Callback messages
pub const UCM_CHANGEVOLUME: c_uint = 0;
pub const UCM_PROCESSDATA: c_uint = 1;
pub const UCM_NEEDPASSWORD: c_uint = 2;
pub const UCM_CHANGEVOLUMEW: c_uint = 3;
pub const UCM_NEEDPASSWORDW: c_uint = 4;

// Callback return values
pub const CALLBACK_CONTINUE: c_int = 0;
pub const CALLBACK_ABORT: c_int = -1;

// Entry header flags
pub const RHDF_SPLITBEFORE: c_uint = 0x01;
pub const RHDF_SPLITAFTER: c_uint = 0x02;
pub const RHDF_ENCRYPTED: c_uint = 0x04;
pub const RHDF_SOLID: c_uint = 0x10;
pub const RHDF_DIRECTORY: c_uint = 0x20;

// Archive flags reported by open
pub const ROADF_VOLUME: c_uint = 0x0001;
pub const ROADF_COMMENT: c_uint = 0x0002;
pub const ROADF_LOCK: c_uint = 0x0004;
pub const ROADF_SOLID: c_uint = 0x0008;
pub const ROADF_NEWNUMBERING: c_uint = 0x0010;
pub const ROADF_SIGNED: c_uint = 0x0020;
pub const ROADF_RECOVERY: c_uint = 0x0040;
pub const ROADF_ENCHEADERS: c_uint = 0x0080;
pub const ROADF_FIRSTVOLUME: c_uint = 0x0100;

#[repr(C)]
pub struct RAROpenArchiveDataEx {
    pub ArcName: *mut c_char,
    pub ArcNameW: *mut WideChar,
    pub OpenMode: c_uint,
    pub OpenResult: c_uint,
    pub CmtBuf: *mut c_char,
    pub CmtBufSize: c_uint,
    pub CmtSize: c_uint,
    pub CmtState: c_uint,
    pub Flags: c_uint,
    pub Callback: UnrarCallback,
    pub UserData: LParam,
    pub OpFlags: c_uint,
    pub CmtBufW: *mut WideChar,
    pub MarkOfTheWeb: *mut WideChar,
    pub Reserved: [c_uint; 23],
}

#[repr(C)]
pub struct RARHeaderDataEx {
    pub ArcName: [c_char; 1024],
    pub ArcNameW: [WideChar; 1024],
    pub FileName: [c_char; 1024],
    pub FileNameW: [WideChar; 1024],
    pub Flags: c_uint,
    pub PackSize: c_uint,
    pub PackSizeHigh: c_uint,
    pub UnpSize: c_uint,
    pub UnpSizeHigh: c_uint,
    pub HostOS: c_uint,
    pub FileCRC: c_uint,
    pub FileTime: c_uint,
    pub UnpVer: c_uint,
    pub Method: c_uint,
    pub FileAttr: c_uint,
    pub CmtBuf: *mut c_char,
    pub CmtBufSize: c_uint,
    pub CmtSize: c_uint,
    pub CmtState: c_uint,
    pub DictSize: c_uint,
    pub HashType: c_uint,
    pub Hash: [c_char; 32],
    pub RedirType: c_uint,
    pub RedirName: *mut WideChar,
    pub RedirNameSize: c_uint,
    pub DirTarget: c_uint,
    pub MtimeLow: c_uint,
    pub MtimeHigh: c_uint,
    pub CtimeLow: c_uint,
    pub CtimeHigh: c_uint,
    pub AtimeLow: c_uint,
    pub AtimeHigh: c_uint,
    pub ArcNameEx: *mut WideChar,
    pub ArcNameExSize: c_uint,
    pub FileNameEx: *mut WideChar,
    pub FileNameExSize: c_uint,
    pub Reserved: [c_uint; 982],
}

impl RAROpenArchiveDataEx {
    pub fn zeroed() -> Self {
        // SAFETY: every field is an integer, a raw pointer or an `Option` of a
        // function pointer, all of which are valid when zeroed.
        unsafe { std::mem::zeroed() }
    }
}

impl RARHeaderDataEx {
    pub fn zeroed() -> Box<Self> {
        // SAFETY: see `RAROpenArchiveDataEx::zeroed`.
        Box::new(unsafe { std::mem::zeroed() })
    }
}
