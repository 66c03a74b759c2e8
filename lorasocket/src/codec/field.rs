//! Length-tagged string fields
//!
//! Strings inside chunk payloads are written as a big-endian `u16` length
//! followed by the UTF-8 bytes, e.g. `\x00\x04MQTT`.

use heapless::Vec;

use super::FormatError;

/// Append a length-tagged string to `buf`
pub fn put_str<const N: usize>(buf: &mut Vec<u8, N>, value: &str) -> Result<(), FormatError> {
    let bytes = value.as_bytes();
    let needed = buf.len() + 2 + bytes.len();
    let len = u16::try_from(bytes.len()).map_err(|_| FormatError::PayloadTooLarge(needed))?;
    // Checked up front so a failed put leaves `buf` untouched
    if needed > buf.capacity() {
        return Err(FormatError::PayloadTooLarge(needed));
    }
    buf.extend_from_slice(&len.to_be_bytes())
        .map_err(|_| FormatError::PayloadTooLarge(needed))?;
    buf.extend_from_slice(bytes)
        .map_err(|_| FormatError::PayloadTooLarge(needed))
}

/// Split a length-tagged string off the front of `bytes`
///
/// Returns the string and the remaining bytes.
pub fn take_str(bytes: &[u8]) -> Result<(&str, &[u8]), FormatError> {
    if bytes.len() < 2 {
        return Err(FormatError::Truncated);
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < len {
        return Err(FormatError::Truncated);
    }
    let value = core::str::from_utf8(&rest[..len]).map_err(|_| FormatError::InvalidUtf8)?;
    Ok((value, &rest[len..]))
}
