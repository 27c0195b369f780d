//! Recovery records: sizing rules and the sector data itself.
//!
//! A recovery block protects every byte of its volume that precedes it.
//! The region is cut into 512-byte sectors; the block stores one 16-bit
//! check per sector followed by `rr_count` parity sectors, where parity
//! sector `i` is the XOR of all sectors whose index is `i` modulo
//! `rr_count`.

pub mod sectors;

pub use sectors::RecoveryData;

use crate::consts::{BLOCK_HEADER_SIZE, FILE_FIXED_SIZE, RR_PROTECT_2, RR_PROTECT_3, RR_SUB_NAME};
use crate::params::FormatVersion;

pub const SECTOR_SIZE: u64 = 512;
pub const CRC_SIZE:    u64 = 2;
/// One protected sector plus its check value.
const QUANTUM:         u64 = SECTOR_SIZE + CRC_SIZE;
pub const RR_MAX:      u32 = 524_288;
/// Seed of the CRC over the recovery data stored in format 3 headers.
pub const DATA_CRC_INIT: u32 = 0xF000_0000;

/// Number of `quantum`-sized pieces needed to cover `total`.
pub fn quanta(total: u64, quantum: u64) -> u64 {
    total.div_ceil(quantum)
}

pub fn header_size(version: FormatVersion) -> u64 {
    let size = match version {
        FormatVersion::Rar2 => BLOCK_HEADER_SIZE + 4 + 1 + 2 + 4 + RR_PROTECT_2.len(),
        FormatVersion::Rar3 => BLOCK_HEADER_SIZE + FILE_FIXED_SIZE + RR_SUB_NAME.len()
            + RR_PROTECT_3.len() + 4 + 8,
    };
    size as u64
}

/// Parity sector count for a volume whose protected region is `total`
/// bytes, in a set of `nominal`-byte volumes.
pub fn prospective_count(version: FormatVersion, total: u64, nominal: u64) -> u32 {
    match version {
        FormatVersion::Rar2 => {
            let rr = match nominal {
                0..=49_999      => 2,
                50_000..=499_999 => 4,
                _               => 8,
            };
            rr.min(quanta(total, SECTOR_SIZE)) as u32
        }
        FormatVersion::Rar3 => {
            if total < SECTOR_SIZE {
                return 1;
            }
            // about 0.6% of the region
            let rr = total * 6 / SECTOR_SIZE / 1000 + 2;
            if rr >= u64::from(RR_MAX) {
                RR_MAX
            } else if rr < 6 {
                rr as u32
            } else {
                rr as u32 | 1
            }
        }
    }
}

/// Bytes left for protected data once `space` bytes also hold the
/// recovery header, `rr_count` parity sectors and one check per sector.
pub fn protected_capacity(version: FormatVersion, space: i64, rr_count: u32) -> i64 {
    let mut space = space - header_size(version) as i64 - i64::from(rr_count) * SECTOR_SIZE as i64;
    if space <= 0 {
        return space;
    }

    // a trailing quantum too small for a check value and one data byte
    let last = (space - 1) % QUANTUM as i64 + 1;
    if last <= CRC_SIZE as i64 {
        space -= last;
    }

    let sectors = quanta(space as u64, QUANTUM) as i64;
    space - sectors * CRC_SIZE as i64
}

/// On-disk size of a recovery block protecting `protected` bytes.
pub fn block_size(version: FormatVersion, protected: u64, rr_count: u32) -> u64 {
    header_size(version)
        + quanta(protected, SECTOR_SIZE) * CRC_SIZE
        + u64::from(rr_count) * SECTOR_SIZE
}
