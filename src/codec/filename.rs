//! File name field.
//!
//! Plain form: ISO-8859-1 bytes, no terminator.  Unicode form: the plain
//! bytes, a zero, then a packed UTF-16 tail: one "high byte", followed by
//! groups of four 2-bit opcodes (most significant first) and their operands.

use super::FieldError;

const OP_8BIT: u8 = 0;
const OP_HIGH: u8 = 1;
const OP_16BIT: u8 = 2;
const OP_COPY: u8 = 3;
const OPCODE_BITS: u32 = 2;

const COPY_LEN_MIN: usize = 2;
const COPY_LEN_MAX: usize = COPY_LEN_MIN + 0x7F;
const COPY_CORRECTION: u8 = 0x80;

/// High byte archivers put in front of the tail, even for pure 8-bit names.
const DEFAULT_HIGH_BYTE: u8 = 1;

pub fn encode_latin1(text: &str) -> Result<Vec<u8>, FieldError> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| FieldError::NotLatin1(text.to_owned()))
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

pub fn encode_filename(name: &str, unicode: bool) -> Result<Vec<u8>, FieldError> {
    let narrow = encode_latin1(name)?;
    let mut field = narrow.clone();
    if !unicode {
        return Ok(field);
    }

    field.push(0);
    field.push(DEFAULT_HIGH_BYTE);

    let mut left = narrow.len();
    let mut pos = 0;
    while left > 0 {
        let mut opcodes = 0u8;
        let mut shift = 8;
        let mut operands = Vec::with_capacity(4);

        while shift >= OPCODE_BITS && left > 0 {
            shift -= OPCODE_BITS;
            let op = if left == 1 {
                operands.push(narrow[pos]);
                pos += 1;
                left = 0;
                OP_8BIT
            } else {
                let run = left.min(COPY_LEN_MAX);
                operands.push((run - COPY_LEN_MIN) as u8);
                pos += run;
                left -= run;
                OP_COPY
            };
            opcodes |= op << shift;
        }

        field.push(opcodes);
        field.extend_from_slice(&operands);
    }

    Ok(field)
}

/// Splits a Unicode-form field at its zero separator.
pub fn split_unicode_field(field: &[u8]) -> Result<(&[u8], &[u8]), FieldError> {
    let zero = field.iter().position(|&b| b == 0).ok_or(FieldError::MissingSeparator)?;
    Ok((&field[..zero], &field[zero + 1..]))
}

pub fn decode_filename(field: &[u8], unicode: bool) -> Result<String, FieldError> {
    if !unicode {
        return Ok(decode_latin1(field));
    }
    let (narrow, tail) = split_unicode_field(field)?;
    decode_unicode_tail(narrow, tail)
}

/// Expands the packed tail; copy runs take their low bytes from `narrow`.
pub fn decode_unicode_tail(narrow: &[u8], tail: &[u8]) -> Result<String, FieldError> {
    let byte = |pos: &mut usize| -> Result<u8, FieldError> {
        let b = *tail.get(*pos).ok_or(FieldError::Truncated)?;
        *pos += 1;
        Ok(b)
    };
    let low_at = |index: usize| narrow.get(index).copied().ok_or(FieldError::Truncated);

    let mut pos = 0;
    let high = u16::from(byte(&mut pos)?);
    let mut out: Vec<u16> = Vec::with_capacity(narrow.len());
    let mut opcodes = 0u8;
    let mut bits = 0;

    while pos < tail.len() {
        if bits == 0 {
            opcodes = byte(&mut pos)?;
            bits = 8;
        }
        match opcodes >> 6 {
            OP_8BIT => out.push(u16::from(byte(&mut pos)?)),
            OP_HIGH => out.push(u16::from(byte(&mut pos)?) | high << 8),
            OP_16BIT => {
                let lo = byte(&mut pos)?;
                let hi = byte(&mut pos)?;
                out.push(u16::from_le_bytes([lo, hi]));
            }
            _ => {
                let len = byte(&mut pos)?;
                if len & COPY_CORRECTION != 0 {
                    let correction = byte(&mut pos)?;
                    for _ in 0..usize::from(len & 0x7F) + COPY_LEN_MIN {
                        let low = low_at(out.len())?.wrapping_add(correction);
                        out.push(u16::from(low) | high << 8);
                    }
                } else {
                    for _ in 0..usize::from(len) + COPY_LEN_MIN {
                        out.push(u16::from(low_at(out.len())?));
                    }
                }
            }
        }
        opcodes <<= OPCODE_BITS;
        bits -= OPCODE_BITS;
    }

    String::from_utf16(&out).map_err(|_| FieldError::BadUnicode)
}
