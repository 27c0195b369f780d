//! Field codecs for the File block.
//!
//! Each encoder here has a matching decoder:
//!
//! | Field            | Encoder                  | Decoder                   |
//! |------------------|--------------------------|---------------------------|
//! | File name        | [`encode_filename`]      | [`decode_filename`]       |
//! | DOS time         | [`encode_dos_time`]      | [`decode_dos_time`]       |
//! | Extended time    | [`ExtendedTime::encode`] | [`ExtendedTime::decode`]  |
//! | Large sizes      | [`encode_large_sizes`]   | [`decode_large_sizes`]    |
//!
//! The 8-bit name form is ISO-8859-1.  Names with characters outside it
//! cannot be represented and are rejected by the encoder.

pub mod filename;
pub mod time;

pub use filename::{decode_filename, decode_latin1, encode_filename, encode_latin1, split_unicode_field};
pub use time::{decode_dos_time, encode_dos_time, ExtendedTime, Timestamp};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("name {0:?} has characters outside ISO-8859-1")]
    NotLatin1(String),
    #[error("field truncated")]
    Truncated,
    #[error("Unicode name tail does not decode to valid UTF-16")]
    BadUnicode,
    #[error("Unicode name field has no zero separator")]
    MissingSeparator,
    #[error("DOS time 0x{0:08X} is not a valid date")]
    BadDosTime(u32),
    #[error("year {0} cannot be stored in a DOS time")]
    YearOutOfRange(i32),
    #[error("unsupported extended time flags 0x{0:04X}")]
    UnsupportedTime(u16),
    #[error("sub-second value {0} out of range")]
    BadFraction(u32),
}

/// Sizes above this need the 64-bit extension.
pub const LARGE_THRESHOLD: u64 = 1 << 31;
pub const LARGE_EXT_SIZE: usize = 8;

pub fn needs_large_sizes(packed: u64, unpacked: u64) -> bool {
    packed > LARGE_THRESHOLD || unpacked > LARGE_THRESHOLD
}

/// Upper halves of the packed and unpacked sizes, or `None` when both fit
/// the fixed header.
pub fn encode_large_sizes(packed: u64, unpacked: u64) -> Option<[u8; LARGE_EXT_SIZE]> {
    if !needs_large_sizes(packed, unpacked) {
        return None;
    }
    let mut out = [0u8; LARGE_EXT_SIZE];
    out[..4].copy_from_slice(&((packed >> 32) as u32).to_le_bytes());
    out[4..].copy_from_slice(&((unpacked >> 32) as u32).to_le_bytes());
    Some(out)
}

/// `(high_packed, high_unpacked)`
pub fn decode_large_sizes(bytes: &[u8]) -> Result<(u32, u32), FieldError> {
    if bytes.len() < LARGE_EXT_SIZE {
        return Err(FieldError::Truncated);
    }
    let high_packed   = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let high_unpacked = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok((high_packed, high_unpacked))
}
