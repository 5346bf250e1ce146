//! Type definitions shared by the bridge and the extraction helpers.

use serde::{Deserialize, Serialize};
use std::os::raw::{c_int, c_uint};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::ffi;

/// How an archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read headers only
    #[default]
    List,
    /// Read headers and entry data
    Extract,
    /// Like `List`, but report every part of entries split across volumes
    ListIncludingSplitFiles,
}

impl OpenMode {
    /// The native `RAR_OM_*` value.
    pub fn as_raw(self) -> c_uint {
        match self {
            OpenMode::List => ffi::RAR_OM_LIST,
            OpenMode::Extract => ffi::RAR_OM_EXTRACT,
            OpenMode::ListIncludingSplitFiles => ffi::RAR_OM_LIST_INCSPLIT,
        }
    }

    /// Parse a native `RAR_OM_*` value.
    pub fn from_raw(raw: c_uint) -> Option<Self> {
        match raw {
            ffi::RAR_OM_LIST => Some(OpenMode::List),
            ffi::RAR_OM_EXTRACT => Some(OpenMode::Extract),
            ffi::RAR_OM_LIST_INCSPLIT => Some(OpenMode::ListIncludingSplitFiles),
            _ => None,
        }
    }
}

/// What to do with the entry the cursor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Move past the entry without decompressing it
    Skip,
    /// Decompress the entry, delivering its bytes to the output file or the
    /// data callback
    #[default]
    Test,
    /// Decompress the entry; the native library also writes it below the
    /// current directory
    Extract,
}

impl Operation {
    /// The native `RAR_SKIP`/`RAR_TEST`/`RAR_EXTRACT` value.
    pub fn as_raw(self) -> c_int {
        match self {
            Operation::Skip => ffi::RAR_SKIP,
            Operation::Test => ffi::RAR_TEST,
            Operation::Extract => ffi::RAR_EXTRACT,
        }
    }

    /// Parse a native operation value.
    pub fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            ffi::RAR_SKIP => Some(Operation::Skip),
            ffi::RAR_TEST => Some(Operation::Test),
            ffi::RAR_EXTRACT => Some(Operation::Extract),
            _ => None,
        }
    }
}

/// Redirection type of a Unix symbolic link.
pub const REDIR_UNIX_SYMLINK: u32 = 1;

/// Metadata of one archive entry.
///
/// This is an owned copy of the native header; it stays valid after the
/// cursor moves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Path of the entry within the archive
    pub filename: String,

    /// Raw `RHDF_*` flags
    pub flags: u32,

    /// Compressed size in bytes
    pub pack_size: u64,

    /// Uncompressed size in bytes
    pub unpack_size: u64,

    /// Operating system that created the entry
    pub host_os: u32,

    /// CRC32 of the uncompressed data (of this part, for split entries)
    pub file_crc: u32,

    /// Modification time in MS-DOS format
    pub file_time: u32,

    /// Version of the format needed to unpack
    pub unpack_ver: u32,

    /// Compression method
    pub method: u32,

    /// Platform file attributes
    pub file_attr: u32,

    /// Whether this entry is a directory
    pub is_dir: bool,

    /// Whether the entry data is encrypted
    pub is_encrypted: bool,

    /// Dictionary size in KiB
    pub dict_size: u32,

    /// Redirection type; zero for regular entries
    pub redir_type: u32,

    /// Redirection target, present only for redirections that carry one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redir_name: Option<String>,

    /// Modification time as a Windows FILETIME (100 ns ticks since 1601),
    /// zero when the library does not report it
    pub mtime: u64,
}

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

impl EntryHeader {
    /// Whether the entry holds file data worth extracting (not a directory
    /// and not a redirection).
    pub fn is_useful(&self) -> bool {
        !(self.is_dir || self.redir_type != 0)
    }

    /// Whether the entry continues from a previous volume.
    pub fn is_split_before(&self) -> bool {
        self.flags & ffi::RHDF_SPLITBEFORE != 0
    }

    /// Whether the entry continues in the next volume.
    pub fn is_split_after(&self) -> bool {
        self.flags & ffi::RHDF_SPLITAFTER != 0
    }

    /// Modification time, from the FILETIME stamp when present and otherwise
    /// from the DOS time.
    pub fn modified(&self) -> Option<SystemTime> {
        if self.mtime != 0 {
            let secs = (self.mtime / 10_000_000).checked_sub(FILETIME_UNIX_OFFSET_SECS)?;
            let nanos = (self.mtime % 10_000_000) as u32 * 100;
            return Some(UNIX_EPOCH + Duration::new(secs, nanos));
        }
        dos_time_to_unix(self.file_time).map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Convert an MS-DOS date/time stamp (treated as UTC) to Unix seconds.
fn dos_time_to_unix(dos: u32) -> Option<u64> {
    if dos == 0 {
        return None;
    }
    let second = u64::from(dos & 0x1f) * 2;
    let minute = u64::from((dos >> 5) & 0x3f);
    let hour = u64::from((dos >> 11) & 0x1f);
    let day = i64::from((dos >> 16) & 0x1f);
    let month = i64::from((dos >> 21) & 0x0f);
    let year = i64::from(dos >> 25) + 1980;
    if !(1..=12).contains(&month) || day == 0 {
        return None;
    }

    // Days from civil, Howard Hinnant's algorithm
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = u64::try_from(era * 146_097 + doe - 719_468).ok()?;

    Some(days * 86_400 + hour * 3600 + minute * 60 + second)
}

/// Options for the extraction helpers.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Password for encrypted archives
    pub password: Option<String>,

    /// Route data through the callback to check CRCs after extraction
    pub verify_data: bool,
}

/// Statistics about a completed extraction operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractStats {
    /// Number of files successfully extracted
    pub files_extracted: u64,

    /// Total bytes written to disk
    pub bytes_written: u64,

    /// Duration of the extraction operation (in seconds)
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
