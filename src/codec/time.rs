//! DOS timestamps and the optional extended-time field.
//!
//! DOS time packs `year-1980 (7) | month (4) | day (5) | hour (5) |
//! minute (6) | second/2 (5)` into 32 bits.  The extended field restores
//! the odd second and up to three bytes of sub-second precision in units
//! of 100 ns, for the modification-time slot only.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use super::FieldError;

const DOS_2SEC_BIT:  u32 = 0;
const DOS_MIN_BIT:   u32 = 5;
const DOS_HOUR_BIT:  u32 = 11;
const DOS_DAY_BIT:   u32 = 16;
const DOS_MONTH_BIT: u32 = 21;
const DOS_YEAR_BIT:  u32 = 25;
const DOS_EPOCH:     i32 = 1980;
const DOS_YEAR_MAX:  i32 = DOS_EPOCH + 0x7F;

/// Flags nibble of the modification time sits at bits 12..16.
const MTIME_SHIFT:     u32 = 3 * 4;
const TIME_VALID:      u16 = 0x8;
const TIME_ONE_SECOND: u16 = 0x4;
const TIME_SIZE_MASK:  u16 = 0x3;

/// Sub-second units per second (100 ns resolution).
pub const FRACTION_SCALE: u32 = 10_000_000;
pub const FRACTION_BYTES: usize = 3;

pub fn encode_dos_time(dt: &NaiveDateTime) -> Result<u32, FieldError> {
    let year = dt.year();
    if !(DOS_EPOCH..=DOS_YEAR_MAX).contains(&year) {
        return Err(FieldError::YearOutOfRange(year));
    }
    Ok(((year - DOS_EPOCH) as u32) << DOS_YEAR_BIT
        | dt.month() << DOS_MONTH_BIT
        | dt.day() << DOS_DAY_BIT
        | dt.hour() << DOS_HOUR_BIT
        | dt.minute() << DOS_MIN_BIT
        | dt.second() >> 1 << DOS_2SEC_BIT)
}

pub fn decode_dos_time(value: u32) -> Result<NaiveDateTime, FieldError> {
    let year  = DOS_EPOCH + (value >> DOS_YEAR_BIT & 0x7F) as i32;
    let month = value >> DOS_MONTH_BIT & 0x0F;
    let day   = value >> DOS_DAY_BIT & 0x1F;
    let hour  = value >> DOS_HOUR_BIT & 0x1F;
    let min   = value >> DOS_MIN_BIT & 0x3F;
    let sec   = (value >> DOS_2SEC_BIT & 0x1F) << 1;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, min, sec))
        .ok_or(FieldError::BadDosTime(value))
}

/// What the extended field adds on top of DOS resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedTime {
    pub one_second: bool,
    /// Sub-second part in units of 100 ns.
    pub fraction:   u32,
}

impl ExtendedTime {
    pub fn of(dt: &NaiveDateTime) -> Self {
        Self {
            one_second: dt.second() & 1 == 1,
            fraction:   dt.nanosecond() % 1_000_000_000 / 100,
        }
    }

    /// `(byte count, value shifted down past the dropped zero bytes)`
    fn stored(&self) -> (usize, u32) {
        let mut frac = self.fraction;
        let mut size = FRACTION_BYTES;
        while size > 0 && frac & 0xFF == 0 {
            frac >>= 8;
            size -= 1;
        }
        (size, frac)
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.stored().0
    }

    pub fn encode(&self) -> Vec<u8> {
        let (size, mut frac) = self.stored();
        let mut flags = TIME_VALID | size as u16;
        if self.one_second {
            flags |= TIME_ONE_SECOND;
        }

        let mut out = Vec::with_capacity(2 + size);
        out.extend_from_slice(&(flags << MTIME_SHIFT).to_le_bytes());
        for _ in 0..size {
            out.push(frac as u8);
            frac >>= 8;
        }
        out
    }

    /// Returns the decoded value and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FieldError> {
        if bytes.len() < 2 {
            return Err(FieldError::Truncated);
        }
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        if word & !((TIME_ONE_SECOND | TIME_SIZE_MASK) << MTIME_SHIFT) != TIME_VALID << MTIME_SHIFT {
            return Err(FieldError::UnsupportedTime(word));
        }

        let flags = word >> MTIME_SHIFT;
        let size = usize::from(flags & TIME_SIZE_MASK);
        let stored = bytes.get(2..2 + size).ok_or(FieldError::Truncated)?;

        let mut fraction = 0u32;
        for (byte, place) in stored.iter().zip(FRACTION_BYTES - size..FRACTION_BYTES) {
            fraction |= u32::from(*byte) << (8 * place);
        }
        if fraction >= FRACTION_SCALE {
            return Err(FieldError::BadFraction(fraction));
        }

        let time = Self { one_second: flags & TIME_ONE_SECOND != 0, fraction };
        Ok((time, 2 + size))
    }
}

/// A modification time as stored in a File block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub dos:      u32,
    pub extended: Option<ExtendedTime>,
}

impl Timestamp {
    /// Without `extended`, everything below DOS resolution is dropped.
    pub fn encode(dt: &NaiveDateTime, extended: bool) -> Result<Self, FieldError> {
        Ok(Self {
            dos:      encode_dos_time(dt)?,
            extended: extended.then(|| ExtendedTime::of(dt)),
        })
    }

    /// Whether `dt` carries anything DOS time cannot hold.
    pub fn needs_extended(dt: &NaiveDateTime) -> bool {
        ExtendedTime::of(dt) != ExtendedTime::default()
    }

    pub fn extended_field(&self) -> Option<Vec<u8>> {
        self.extended.map(|x| x.encode())
    }

    pub fn to_datetime(&self) -> Result<NaiveDateTime, FieldError> {
        let base = decode_dos_time(self.dos)?;
        let Some(x) = self.extended else {
            return Ok(base);
        };
        let second = base.second() + u32::from(x.one_second);
        base.with_second(second)
            .and_then(|dt| dt.with_nanosecond(x.fraction * 100))
            .ok_or(FieldError::BadDosTime(self.dos))
    }
}
