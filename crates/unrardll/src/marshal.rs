//! Conversions between Rust values and the native representations UnRAR
//! expects: NUL-terminated wide-character buffers and 64-bit quantities split
//! into two 32-bit halves.

use std::path::Path;

use crate::error::MarshalError;
use crate::ffi::WideChar;

/// Capacity, in wide characters, of the buffer used for archive paths.
pub const PATH_CAPACITY: usize = 4096;

/// Recombine a 64-bit value stored as separate high and low halves.
///
/// ```
/// use unrardll::marshal::combine;
///
/// assert_eq!(combine(1, 0), 1 << 32);
/// assert_eq!(combine(0, 0xFFFF_FFFF), 0xFFFF_FFFF);
/// ```
pub fn combine(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

#[cfg(windows)]
fn encode(text: &str) -> impl Iterator<Item = WideChar> + '_ {
    text.encode_utf16()
}

#[cfg(not(windows))]
fn encode(text: &str) -> impl Iterator<Item = WideChar> + '_ {
    text.chars().map(|c| c as u32 as WideChar)
}

#[cfg(windows)]
fn decode(units: &[WideChar]) -> String {
    String::from_utf16_lossy(units)
}

#[cfg(not(windows))]
fn decode(units: &[WideChar]) -> String {
    units
        .iter()
        .map(|&unit| char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Encode `text` into `buf` as a NUL-terminated wide string.
///
/// Returns the number of wide characters written, excluding the terminator.
/// Nothing is written when the text (plus terminator) does not fit.
pub fn to_wide(text: &str, buf: &mut [WideChar]) -> Result<usize, MarshalError> {
    if text.contains('\0') {
        return Err(MarshalError::InteriorNul);
    }

    let needed = encode(text).count() + 1;
    if needed > buf.len() {
        return Err(MarshalError::Truncated {
            needed,
            capacity: buf.len(),
        });
    }

    for (slot, unit) in buf.iter_mut().zip(encode(text)) {
        *slot = unit;
    }
    buf[needed - 1] = 0;
    Ok(needed - 1)
}

/// Encode a filesystem path, rejecting paths that are not valid Unicode.
pub fn path_to_wide(path: &Path, buf: &mut [WideChar]) -> Result<usize, MarshalError> {
    let text = path
        .to_str()
        .ok_or_else(|| MarshalError::NotText(path.to_string_lossy().into_owned()))?;
    to_wide(text, buf)
}

/// Decode exactly `len` wide characters starting at `ptr`.
///
/// Returns `None` for a null pointer.
///
/// # Safety
///
/// When non-null, `ptr` must be valid for reads of `len` wide characters.
pub unsafe fn from_wide(ptr: *const WideChar, len: usize) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(decode(std::slice::from_raw_parts(ptr, len)))
}

/// Decode a fixed-size native buffer up to its first NUL.
pub fn from_wide_nul(units: &[WideChar]) -> String {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    decode(&units[..end])
}
