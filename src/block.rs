//! Block framing shared by every record in a volume.
//!
//! ```text
//! crc16 (2) | type (1) | flags (2) | size (2) | body
//! ```
//!
//! `size` counts the seven framing bytes plus the body, never the packed
//! data that may follow a long block.  `crc16` is the low half of the
//! CRC-32 over everything after the CRC field.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::consts::{BLOCK_HEADER_SIZE, HDR_CRC_POS, HDR_SIZE_POS, HDR_TYPE_POS};
use crate::crc::crc16_of_header;
use crate::error::{RerarError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Main        = 0x73,
    File        = 0x74,
    OldRecovery = 0x78,
    Sub         = 0x7A,
    End         = 0x7B,
}

impl BlockType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x73 => Some(Self::Main),
            0x74 => Some(Self::File),
            0x78 => Some(Self::OldRecovery),
            0x7A => Some(Self::Sub),
            0x7B => Some(Self::End),
            _    => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Main        => "Main",
            Self::File        => "File",
            Self::OldRecovery => "OldRecovery",
            Self::Sub         => "Sub",
            Self::End         => "End",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub crc:        u16,
    pub block_type: u8,
    pub flags:      u16,
    pub size:       u16,
}

impl BlockHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.crc)?;
        writer.write_u8(self.block_type)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_u16::<LittleEndian>(self.size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            crc:        reader.read_u16::<LittleEndian>()?,
            block_type: reader.read_u8()?,
            flags:      reader.read_u16::<LittleEndian>()?,
            size:       reader.read_u16::<LittleEndian>()?,
        })
    }
}

/// Frames `body` and returns the complete block header bytes.
pub fn encode_block(block_type: BlockType, flags: u16, body: &[u8]) -> io::Result<Vec<u8>> {
    let size = u16::try_from(BLOCK_HEADER_SIZE + body.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!(
            "{} block header of {} bytes does not fit the size field",
            block_type.name(), BLOCK_HEADER_SIZE + body.len()))
    })?;

    let mut out = Vec::with_capacity(usize::from(size));
    BlockHeader { crc: 0, block_type: block_type as u8, flags, size }.write(&mut out)?;
    out.extend_from_slice(body);

    let crc = crc16_of_header(&out[HDR_TYPE_POS as usize..]);
    out[..2].copy_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// A block exactly as read, with its position in the volume.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub pos:    u64,
    pub header: BlockHeader,
    /// Framing plus body; `bytes.len() == header.size`.
    pub bytes:  Vec<u8>,
}

impl RawBlock {
    pub fn block_type(&self) -> Option<BlockType> {
        BlockType::from_u8(self.header.block_type)
    }

    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[BLOCK_HEADER_SIZE..]
    }
}

/// Reads the next block header at `pos`.  Returns `None` at a clean end of
/// stream; a short or corrupt header is a format error.
pub fn read_block<R: Read>(reader: &mut R, pos: u64) -> Result<Option<RawBlock>> {
    let mut framing = [0u8; BLOCK_HEADER_SIZE];
    let got = read_full(reader, &mut framing)?;
    if got == 0 {
        return Ok(None);
    }
    if got < BLOCK_HEADER_SIZE {
        return Err(RerarError::format(pos, format!("truncated block header ({got} bytes)")));
    }

    let header = BlockHeader::read(&framing[..])?;
    if usize::from(header.size) < BLOCK_HEADER_SIZE {
        return Err(RerarError::format(pos + HDR_SIZE_POS,
            format!("block size too small: {}", header.size)));
    }

    let mut bytes = framing.to_vec();
    bytes.resize(usize::from(header.size), 0);
    reader.read_exact(&mut bytes[BLOCK_HEADER_SIZE..]).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => RerarError::format(pos + HDR_SIZE_POS,
            format!("block of {} bytes runs past end of file", header.size)),
        _ => RerarError::Io(e),
    })?;

    let calc = crc16_of_header(&bytes[HDR_TYPE_POS as usize..]);
    if calc != header.crc {
        return Err(RerarError::format(pos + HDR_CRC_POS,
            format!("expected block CRC 0x{calc:04X}, found 0x{:04X}", header.crc)));
    }

    Ok(Some(RawBlock { pos, header, bytes }))
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_main_block_bytes() {
        let block = encode_block(BlockType::Main, 0x0001, &[0; 6]).unwrap();
        assert_eq!(block.len(), 13);
        assert_eq!(&block[2..7], &[0x73, 0x01, 0x00, 0x0D, 0x00]);
        let crc = crate::crc::crc32(&block[2..]) as u16;
        assert_eq!(u16::from_le_bytes([block[0], block[1]]), crc);
    }

    #[test]
    fn read_back() {
        let mut stream = encode_block(BlockType::End, 0x4000, &[]).unwrap();
        stream.extend(encode_block(BlockType::Main, 0x0011, &[0; 6]).unwrap());
        let mut cursor = Cursor::new(stream);

        let end = read_block(&mut cursor, 0).unwrap().unwrap();
        assert_eq!(end.block_type(), Some(BlockType::End));
        assert!(end.body().is_empty());

        let main = read_block(&mut cursor, 7).unwrap().unwrap();
        assert_eq!(main.pos, 7);
        assert_eq!(main.flags(), 0x0011);
        assert_eq!(main.body(), &[0; 6]);

        assert!(read_block(&mut cursor, 20).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_crc() {
        let mut block = encode_block(BlockType::Main, 0x0001, &[0; 6]).unwrap();
        block[8] = 1;
        let err = read_block(&mut Cursor::new(block), 100).unwrap_err();
        assert!(matches!(err, RerarError::Format { offset: 100, .. }));
    }

    #[test]
    fn rejects_tiny_size() {
        let block = [0, 0, 0x73, 0, 0, 6, 0];
        let err = read_block(&mut Cursor::new(block), 0).unwrap_err();
        assert!(matches!(err, RerarError::Format { offset: 5, .. }));
    }

    #[test]
    fn rejects_truncation() {
        let block = encode_block(BlockType::Main, 0x0001, &[0; 6]).unwrap();
        let err = read_block(&mut Cursor::new(&block[..10]), 0).unwrap_err();
        assert!(matches!(err, RerarError::Format { .. }));
        let err = read_block(&mut Cursor::new(&block[..3]), 0).unwrap_err();
        assert!(matches!(err, RerarError::Format { .. }));
    }

    #[test]
    fn oversized_body_is_rejected() {
        let body = vec![0u8; 0x10000];
        assert!(encode_block(BlockType::File, 0, &body).is_err());
    }
}
