//! CRC-32 arithmetic shared by the writer and the reference parser.
//!
//! All values follow the zlib convention: a CRC of nothing is `0`, and
//! `crc32_update(crc32(a), b) == crc32(a ++ b)`.

use std::io::{self, Read};

use crc32fast::Hasher;

use crate::consts::COPY_BUF_SIZE;

/// Reflected CRC-32 (polynomial 0xEDB88320) continued from `prev`.
#[inline]
pub fn crc32_update(prev: u32, bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(prev);
    hasher.update(bytes);
    hasher.finalize()
}

#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32_update(0, bytes)
}

/// Block header check value: the low half of a plain CRC-32.
#[inline]
pub fn crc16_of_header(body: &[u8]) -> u16 {
    crc32(body) as u16
}

/// CRC of `size` bytes read from `reader`. Fails with `UnexpectedEof` when
/// the reader runs dry first.
pub fn crc32_stream<R: Read>(reader: &mut R, mut size: u64) -> io::Result<u32> {
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    while size > 0 {
        let want = size.min(buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..want])?;
        hasher.update(&buf[..want]);
        size -= want as u64;
    }
    Ok(hasher.finalize())
}

// ── Combine ──────────────────────────────────────────────────────────────────

const POLY: u32 = 0xEDB8_8320;

fn gf2_matrix_times(mat: &[u32; 32], mut vec: u32) -> u32 {
    let mut sum = 0;
    let mut row = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[row];
        }
        vec >>= 1;
        row += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u32; 32], mat: &[u32; 32]) {
    for (n, slot) in square.iter_mut().enumerate() {
        *slot = gf2_matrix_times(mat, mat[n]);
    }
}

/// CRC of `A ++ B` from `crc(A)`, `crc(B)` and `len(B)`, in O(log len_b).
pub fn combine(mut crc_a: u32, crc_b: u32, mut len_b: u64) -> u32 {
    if len_b == 0 {
        return crc_a;
    }

    // Operator for one zero bit.
    let mut odd = [0u32; 32];
    odd[0] = POLY;
    for (n, slot) in odd.iter_mut().enumerate().skip(1) {
        *slot = 1 << (n - 1);
    }

    // Two zero bits, then four.
    let mut even = [0u32; 32];
    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    // The first square below yields the operator for one zero byte.
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len_b & 1 != 0 {
            crc_a = gf2_matrix_times(&even, crc_a);
        }
        len_b >>= 1;
        if len_b == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len_b & 1 != 0 {
            crc_a = gf2_matrix_times(&odd, crc_a);
        }
        len_b >>= 1;
        if len_b == 0 {
            break;
        }
    }

    crc_a ^ crc_b
}
