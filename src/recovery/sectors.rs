use std::io::{self, Read, Write};

use crate::consts::{FILE_VERSION, METHOD_STORE, RR_PROTECT_2, RR_PROTECT_3, RR_SUB_NAME, SUB_VERSION};
use crate::crc::{crc32, crc32_update};
use crate::header::{Block, FileFixed, OldRecoveryHeader, SubRecoveryHeader};
use crate::params::{FormatVersion, HostOs};

use super::{quanta, CRC_SIZE, DATA_CRC_INIT, SECTOR_SIZE};

const SECTOR: usize = SECTOR_SIZE as usize;

/// Per-sector checks and parity sectors for one protected region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryData {
    pub sector_crcs: Vec<u16>,
    /// `rr_count` sectors back to back.
    pub parity:      Vec<u8>,
}

impl RecoveryData {
    /// Reads exactly `protected` bytes from `reader`.
    pub fn compute<R: Read>(reader: &mut R, rr_count: u32, protected: u64) -> io::Result<Self> {
        if rr_count == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "recovery count must be positive"));
        }

        let rr_count = rr_count as usize;
        let mut parity = vec![0u8; rr_count * SECTOR];
        let mut sector_crcs = Vec::with_capacity(quanta(protected, SECTOR_SIZE) as usize);
        let mut sector = [0u8; SECTOR];
        let mut left = protected;
        let mut slot = 0;

        while left > 0 {
            let take = left.min(SECTOR_SIZE) as usize;
            reader.read_exact(&mut sector[..take])?;
            sector[take..].fill(0);

            sector_crcs.push(!crc32(&sector) as u16);
            let dst = &mut parity[slot * SECTOR..(slot + 1) * SECTOR];
            for (d, s) in dst.iter_mut().zip(sector.iter()) {
                *d ^= s;
            }

            slot = (slot + 1) % rr_count;
            left -= take as u64;
        }

        Ok(Self { sector_crcs, parity })
    }

    pub fn rr_count(&self) -> u32 {
        (self.parity.len() / SECTOR) as u32
    }

    pub fn protected_sectors(&self) -> u64 {
        self.sector_crcs.len() as u64
    }

    /// Bytes following the recovery block header.
    pub fn data_size(&self) -> u64 {
        self.protected_sectors() * CRC_SIZE + self.parity.len() as u64
    }

    pub fn crc_table(&self) -> Vec<u8> {
        self.sector_crcs.iter().flat_map(|c| c.to_le_bytes()).collect()
    }

    pub fn parity_sector(&self, index: usize) -> &[u8] {
        &self.parity[index * SECTOR..(index + 1) * SECTOR]
    }

    /// CRC of the data area as recorded in format 3 headers.
    pub fn data_crc(&self) -> u32 {
        let crc = crc32_update(DATA_CRC_INIT, &self.crc_table());
        crc32_update(crc, &self.parity)
    }

    pub fn header(&self, version: FormatVersion, host_os: HostOs) -> Block {
        let size = self.data_size() as u32;
        match version {
            FormatVersion::Rar2 => Block::OldRecovery(OldRecoveryHeader {
                data_size: size,
                version:   FILE_VERSION,
                rr_count:  self.rr_count() as u16,
                sectors:   self.protected_sectors() as u32,
                protect:   *RR_PROTECT_2,
                excess:    0,
            }),
            FormatVersion::Rar3 => Block::Sub(SubRecoveryHeader {
                fixed: FileFixed {
                    packed:     size,
                    unpacked:   size,
                    host_os:    host_os.code(),
                    crc:        self.data_crc(),
                    dos_time:   0,
                    version:    SUB_VERSION,
                    method:     METHOD_STORE,
                    name_len:   RR_SUB_NAME.len() as u16,
                    attributes: 0,
                },
                name:     RR_SUB_NAME.to_vec(),
                protect:  *RR_PROTECT_3,
                rr_count: self.rr_count(),
                sectors:  self.protected_sectors(),
                excess:   0,
            }),
        }
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.crc_table())?;
        writer.write_all(&self.parity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn region(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn folds_round_robin() {
        let data = region(512 * 5 + 100);
        let rr = RecoveryData::compute(&mut Cursor::new(&data), 2, data.len() as u64).unwrap();
        assert_eq!(rr.protected_sectors(), 6);
        assert_eq!(rr.rr_count(), 2);

        let mut padded = data.clone();
        padded.resize(512 * 6, 0);
        let sectors: Vec<&[u8]> = padded.chunks(512).collect();
        for i in 0..2 {
            let mut expect = vec![0u8; 512];
            for s in sectors.iter().skip(i).step_by(2) {
                for (e, b) in expect.iter_mut().zip(s.iter()) {
                    *e ^= b;
                }
            }
            assert_eq!(rr.parity_sector(i), &expect[..]);
        }
        assert_eq!(rr.sector_crcs[5], !crc32(sectors[5]) as u16);
    }

    #[test]
    fn data_layout() {
        let data = region(1000);
        let rr = RecoveryData::compute(&mut Cursor::new(&data), 3, 1000).unwrap();
        assert_eq!(rr.data_size(), 2 * 2 + 3 * 512);
        let mut out = Vec::new();
        rr.write_to(&mut out).unwrap();
        assert_eq!(out.len() as u64, rr.data_size());
        assert_eq!(crc32_update(DATA_CRC_INIT, &out), rr.data_crc());
        // the third bucket saw no sectors
        assert!(rr.parity_sector(2).iter().all(|&b| b == 0));
    }

    #[test]
    fn header_blocks() {
        let data = region(700);
        let rr = RecoveryData::compute(&mut Cursor::new(&data), 1, 700).unwrap();
        let Block::Sub(sub) = rr.header(FormatVersion::Rar3, HostOs::Unix) else { panic!("expected Sub") };
        assert_eq!(sub.fixed.crc, rr.data_crc());
        assert_eq!(sub.fixed.host_os, 3);
        assert_eq!(sub.sectors, 2);
        let Block::OldRecovery(old) = rr.header(FormatVersion::Rar2, HostOs::Windows) else { panic!("expected OldRecovery") };
        assert_eq!(old.data_size, 2 * 2 + 512);
        assert_eq!(old.rr_count, 1);
    }

    #[test]
    fn short_region_fails() {
        let data = region(100);
        let err = RecoveryData::compute(&mut Cursor::new(&data), 1, 200).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(RecoveryData::compute(&mut Cursor::new(&data), 0, 100).is_err());
    }
}
