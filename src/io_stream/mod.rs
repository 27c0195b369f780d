//! Volume assembly.
//!
//! [`VolumeWriter`] emits one volume block by block into any seekable
//! sink, hashing every byte as it goes.  The recovery block is the only
//! step that looks back: it re-reads everything already written, then
//! continues at the end.  [`DryVolume`] does the same bookkeeping
//! without the I/O.

pub mod dry;

pub use dry::DryVolume;

use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use crc32fast::Hasher;

use crate::consts::{COPY_BUF_SIZE, SIGNATURE};
use crate::header::{file_header_size, Block, EndHeader, FileHeader, MainHeader};
use crate::params::{FormatVersion, HostOs};
use crate::recovery::RecoveryData;

/// Size and CRC-32 of a finished volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDigest {
    pub size: u64,
    pub crc:  u32,
}

pub struct VolumeWriter<F: Read + Write + Seek> {
    file:   F,
    hasher: Hasher,
    dry:    DryVolume,
}

impl<F: Read + Write + Seek> VolumeWriter<F> {
    /// `file` must be empty and positioned at its start.
    pub fn new(file: F) -> Self {
        Self { file, hasher: Hasher::new(), dry: DryVolume::default() }
    }

    /// Bytes written so far, as planned.
    pub fn position(&self) -> u64 {
        self.dry.size()
    }

    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }

    fn emit_block(&mut self, block: &Block) -> io::Result<()> {
        let bytes = block.encode()?;
        self.emit(&bytes)
    }

    pub fn write_signature(&mut self) -> io::Result<()> {
        self.emit(&SIGNATURE)?;
        self.dry.signature();
        Ok(())
    }

    pub fn write_main(&mut self, main: MainHeader) -> io::Result<()> {
        self.emit_block(&Block::Main(main))?;
        self.dry.main();
        Ok(())
    }

    /// Writes the header, then copies exactly `header.packed_size()` bytes
    /// from `payload`.  Returns the CRC-32 of the copied slice.
    pub fn write_file<R: Read>(&mut self, header: FileHeader, payload: &mut R) -> io::Result<u32> {
        let packed = header.packed_size();
        let xtime_len = header.xtime.map_or(0, |x| x.encoded_len());
        let header_size = file_header_size(header.name.len(), header.high_sizes.is_some(), xtime_len);

        self.emit_block(&Block::File(header))?;

        let mut slice = Hasher::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut left = packed;
        while left > 0 {
            let want = left.min(COPY_BUF_SIZE as u64) as usize;
            let n = payload.read(&mut buf[..want])?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
                    format!("payload ended {left} bytes short of the slice")));
            }
            self.emit(&buf[..n])?;
            slice.update(&buf[..n]);
            left -= n as u64;
        }

        self.dry.file(header_size, packed);
        Ok(slice.finalize())
    }

    /// Protects everything written so far.
    pub fn write_recovery(&mut self, version: FormatVersion, host_os: HostOs, rr_count: u32) -> io::Result<()> {
        let protected = self.dry.size();

        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let data = {
            let mut region = BufReader::with_capacity(COPY_BUF_SIZE, (&mut self.file).take(protected));
            RecoveryData::compute(&mut region, rr_count, protected)?
        };
        self.file.seek(SeekFrom::Start(protected))?;

        self.emit_block(&data.header(version, host_os))?;
        self.emit(&data.crc_table())?;
        self.emit(&data.parity)?;

        self.dry.recovery(version, rr_count);
        Ok(())
    }

    /// Fills the data CRC field, if present, with the CRC of everything
    /// before the End block.
    pub fn write_end(&mut self, mut end: EndHeader) -> io::Result<()> {
        if end.data_crc.is_some() {
            end.data_crc = Some(self.hasher.clone().finalize());
        }
        let size = EndHeader::size(end.flags);
        self.emit_block(&Block::End(end))?;
        self.dry.end(size);
        Ok(())
    }

    /// Flushes the sink and checks the bytes on disk match the plan.
    pub fn finish(mut self) -> io::Result<(F, VolumeDigest)> {
        self.file.flush()?;
        let actual = self.file.stream_position()?;
        if actual != self.dry.size() {
            return Err(io::Error::new(io::ErrorKind::Other,
                format!("wrote {actual} bytes, expected {}", self.dry.size())));
        }
        let digest = VolumeDigest { size: actual, crc: self.hasher.finalize() };
        Ok((self.file, digest))
    }
}
