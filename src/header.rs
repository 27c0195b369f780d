//! Typed block bodies.
//!
//! [`Block`] is the tagged union over every block a volume can hold.  Both
//! directions dispatch on the one-byte type code: [`Block::encode`] frames
//! the body through [`encode_block`], [`Block::decode`] takes a
//! [`RawBlock`] whose framing CRC was already checked.
//!
//! Decoding is structural only.  Values the writer would never produce
//! (odd attributes, stray trailing bytes) are kept so the reference parser
//! can report them with an offset.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::block::{encode_block, BlockType, RawBlock};
use crate::codec::{decode_large_sizes, encode_large_sizes, ExtendedTime, FieldError, LARGE_EXT_SIZE};
use crate::consts::*;
use crate::error::{RerarError, Result};

// ── File fixed part ──────────────────────────────────────────────────────────

/// The 25-byte fixed part shared by File and recovery Sub blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFixed {
    pub packed:     u32,
    pub unpacked:   u32,
    pub host_os:    u8,
    pub crc:        u32,
    pub dos_time:   u32,
    pub version:    u8,
    pub method:     u8,
    pub name_len:   u16,
    pub attributes: u32,
}

impl FileFixed {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.packed)?;
        writer.write_u32::<LittleEndian>(self.unpacked)?;
        writer.write_u8(self.host_os)?;
        writer.write_u32::<LittleEndian>(self.crc)?;
        writer.write_u32::<LittleEndian>(self.dos_time)?;
        writer.write_u8(self.version)?;
        writer.write_u8(self.method)?;
        writer.write_u16::<LittleEndian>(self.name_len)?;
        writer.write_u32::<LittleEndian>(self.attributes)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            packed:     reader.read_u32::<LittleEndian>()?,
            unpacked:   reader.read_u32::<LittleEndian>()?,
            host_os:    reader.read_u8()?,
            crc:        reader.read_u32::<LittleEndian>()?,
            dos_time:   reader.read_u32::<LittleEndian>()?,
            version:    reader.read_u8()?,
            method:     reader.read_u8()?,
            name_len:   reader.read_u16::<LittleEndian>()?,
            attributes: reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainHeader {
    pub flags:    u16,
    /// Always six zero bytes when written.
    pub reserved: Vec<u8>,
}

impl MainHeader {
    pub fn new(flags: u16) -> Self {
        Self { flags, reserved: vec![0; MAIN_EXTRA] }
    }
}

// ── File ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// As stored; `encode` adds the long-block, large and ext-time bits
    /// implied by the optional fields.
    pub flags:      u16,
    pub fixed:      FileFixed,
    /// Upper halves of the packed and unpacked sizes.
    pub high_sizes: Option<(u32, u32)>,
    pub name:       Vec<u8>,
    pub xtime:      Option<ExtendedTime>,
    /// Header bytes left over after the last known field.
    pub excess:     usize,
}

impl FileHeader {
    /// Builds a stored-file header for a slice of `packed` bytes out of a
    /// payload of `unpacked` bytes.
    pub fn stored(flags: u16, packed: u64, unpacked: u64, name: Vec<u8>, xtime: Option<ExtendedTime>) -> Self {
        let high_sizes = encode_large_sizes(packed, unpacked)
            .map(|_| ((packed >> 32) as u32, (unpacked >> 32) as u32));
        Self {
            flags,
            fixed: FileFixed {
                packed:   packed as u32,
                unpacked: unpacked as u32,
                version:  FILE_VERSION,
                method:   METHOD_STORE,
                name_len: name.len() as u16,
                ..FileFixed::default()
            },
            high_sizes,
            name,
            xtime,
            excess: 0,
        }
    }

    pub fn packed_size(&self) -> u64 {
        let high = self.high_sizes.map_or(0, |(p, _)| u64::from(p));
        high << 32 | u64::from(self.fixed.packed)
    }

    pub fn unpacked_size(&self) -> u64 {
        let high = self.high_sizes.map_or(0, |(_, u)| u64::from(u));
        high << 32 | u64::from(self.fixed.unpacked)
    }

    pub fn split_before(&self) -> bool { self.flags & FILE_SPLIT_BEFORE != 0 }
    pub fn split_after(&self) -> bool { self.flags & FILE_SPLIT_AFTER != 0 }

    fn encoded_flags(&self) -> u16 {
        let mut flags = self.flags | LONG_BLOCK;
        if self.high_sizes.is_some() { flags |= FILE_LARGE; }
        if self.xtime.is_some() { flags |= FILE_EXT_TIME; }
        flags
    }
}

/// On-disk size of a File block header.
pub fn file_header_size(name_len: usize, large: bool, xtime_len: usize) -> u64 {
    let large_len = if large { LARGE_EXT_SIZE } else { 0 };
    (BLOCK_HEADER_SIZE + FILE_FIXED_SIZE + large_len + name_len + xtime_len) as u64
}

// ── Recovery ─────────────────────────────────────────────────────────────────

/// Format 3 recovery record: a Sub block named "RR".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRecoveryHeader {
    pub fixed:       FileFixed,
    pub name:        Vec<u8>,
    pub protect:     [u8; 8],
    pub rr_count:    u32,
    pub sectors:     u64,
    pub excess:      usize,
}

/// Format 2 recovery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldRecoveryHeader {
    pub data_size: u32,
    pub version:   u8,
    pub rr_count:  u16,
    pub sectors:   u32,
    pub protect:   [u8; 8],
    pub excess:    usize,
}

// ── End ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndHeader {
    pub flags:      u16,
    pub data_crc:   Option<u32>,
    pub vol_number: Option<u16>,
    pub reserved:   Option<[u8; END_EXTRA]>,
    pub excess:     usize,
}

impl EndHeader {
    /// Fields follow `flags`; the CRC is left at zero for the writer to fill.
    pub fn new(flags: u16, vol_number: u16) -> Self {
        Self {
            flags,
            data_crc:   (flags & END_DATA_CRC != 0).then_some(0),
            vol_number: (flags & END_VOL_NUMBER != 0).then_some(vol_number),
            reserved:   (flags & END_REV_SPACE != 0).then_some([0; END_EXTRA]),
            excess:     0,
        }
    }

    pub fn size(flags: u16) -> u64 {
        let mut size = BLOCK_HEADER_SIZE as u64;
        if flags & END_DATA_CRC != 0 { size += 4; }
        if flags & END_VOL_NUMBER != 0 { size += 2; }
        if flags & END_REV_SPACE != 0 { size += END_EXTRA as u64; }
        size
    }
}

// ── Tagged union ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Main(MainHeader),
    File(FileHeader),
    Sub(SubRecoveryHeader),
    OldRecovery(OldRecoveryHeader),
    End(EndHeader),
}

impl Block {
    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Main(_)        => BlockType::Main,
            Block::File(_)        => BlockType::File,
            Block::Sub(_)         => BlockType::Sub,
            Block::OldRecovery(_) => BlockType::OldRecovery,
            Block::End(_)         => BlockType::End,
        }
    }

    /// Complete header bytes, CRC included.
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        let flags = match self {
            Block::Main(h) => {
                body.extend_from_slice(&h.reserved);
                h.flags
            }
            Block::File(h) => {
                h.fixed.write(&mut body)?;
                if let Some((hp, hu)) = h.high_sizes {
                    body.write_u32::<LittleEndian>(hp)?;
                    body.write_u32::<LittleEndian>(hu)?;
                }
                body.extend_from_slice(&h.name);
                if let Some(x) = h.xtime {
                    body.extend_from_slice(&x.encode());
                }
                h.encoded_flags()
            }
            Block::Sub(h) => {
                h.fixed.write(&mut body)?;
                body.extend_from_slice(&h.name);
                body.extend_from_slice(&h.protect);
                body.write_u32::<LittleEndian>(h.rr_count)?;
                body.write_u64::<LittleEndian>(h.sectors)?;
                LONG_BLOCK | SKIP_IF_UNKNOWN
            }
            Block::OldRecovery(h) => {
                body.write_u32::<LittleEndian>(h.data_size)?;
                body.write_u8(h.version)?;
                body.write_u16::<LittleEndian>(h.rr_count)?;
                body.write_u32::<LittleEndian>(h.sectors)?;
                body.extend_from_slice(&h.protect);
                LONG_BLOCK | SKIP_IF_UNKNOWN
            }
            Block::End(h) => {
                if let Some(crc) = h.data_crc {
                    body.write_u32::<LittleEndian>(crc)?;
                }
                if let Some(num) = h.vol_number {
                    body.write_u16::<LittleEndian>(num)?;
                }
                if let Some(reserved) = h.reserved {
                    body.extend_from_slice(&reserved);
                }
                h.flags | SKIP_IF_UNKNOWN
            }
        };
        encode_block(self.block_type(), flags, &body)
    }

    /// Decodes the body of `raw`.  Fails on unknown type codes and on
    /// bodies too short for their declared fields.
    pub fn decode(raw: &RawBlock) -> Result<Self> {
        let Some(block_type) = raw.block_type() else {
            return Err(RerarError::format(raw.pos + HDR_TYPE_POS,
                format!("unknown block type 0x{:02X}", raw.header.block_type)));
        };
        let body_pos = raw.pos + BLOCK_HEADER_SIZE as u64;
        let body = raw.body();
        let flags = raw.flags();
        let truncated = |e: io::Error| RerarError::format(body_pos,
            format!("{} block body truncated: {e}", block_type.name()));

        let block = match block_type {
            BlockType::Main => Block::Main(MainHeader { flags, reserved: body.to_vec() }),

            BlockType::File => {
                let mut cur = Cursor::new(body);
                let fixed = FileFixed::read(&mut cur).map_err(truncated)?;
                let mut pos = FILE_FIXED_SIZE;

                let high_sizes = if flags & FILE_LARGE != 0 {
                    let sizes = decode_large_sizes(&body[pos..]).map_err(|e| field_error(body_pos + pos as u64, e))?;
                    pos += LARGE_EXT_SIZE;
                    Some(sizes)
                } else {
                    None
                };

                let name_end = pos + usize::from(fixed.name_len);
                let name = body.get(pos..name_end)
                    .ok_or_else(|| RerarError::format(body_pos + pos as u64, "file name runs past block header"))?
                    .to_vec();
                pos = name_end;

                let xtime = if flags & FILE_EXT_TIME != 0 {
                    let (x, used) = ExtendedTime::decode(&body[pos..]).map_err(|e| field_error(body_pos + pos as u64, e))?;
                    pos += used;
                    Some(x)
                } else {
                    None
                };

                Block::File(FileHeader { flags, fixed, high_sizes, name, xtime, excess: body.len() - pos })
            }

            BlockType::Sub => {
                let mut cur = Cursor::new(body);
                let fixed = FileFixed::read(&mut cur).map_err(truncated)?;
                let mut name = vec![0u8; usize::from(fixed.name_len)];
                cur.read_exact(&mut name).map_err(truncated)?;
                let mut protect = [0u8; 8];
                cur.read_exact(&mut protect).map_err(truncated)?;
                let rr_count = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                let sectors = cur.read_u64::<LittleEndian>().map_err(truncated)?;
                let excess = body.len() - cur.position() as usize;
                Block::Sub(SubRecoveryHeader { fixed, name, protect, rr_count, sectors, excess })
            }

            BlockType::OldRecovery => {
                let mut cur = Cursor::new(body);
                let data_size = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                let version = cur.read_u8().map_err(truncated)?;
                let rr_count = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let sectors = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                let mut protect = [0u8; 8];
                cur.read_exact(&mut protect).map_err(truncated)?;
                let excess = body.len() - cur.position() as usize;
                Block::OldRecovery(OldRecoveryHeader { data_size, version, rr_count, sectors, protect, excess })
            }

            BlockType::End => {
                let mut cur = Cursor::new(body);
                let data_crc = if flags & END_DATA_CRC != 0 {
                    Some(cur.read_u32::<LittleEndian>().map_err(truncated)?)
                } else {
                    None
                };
                let vol_number = if flags & END_VOL_NUMBER != 0 {
                    Some(cur.read_u16::<LittleEndian>().map_err(truncated)?)
                } else {
                    None
                };
                let reserved = if flags & END_REV_SPACE != 0 {
                    let mut reserved = [0u8; END_EXTRA];
                    cur.read_exact(&mut reserved).map_err(truncated)?;
                    Some(reserved)
                } else {
                    None
                };
                let excess = body.len() - cur.position() as usize;
                Block::End(EndHeader { flags, data_crc, vol_number, reserved, excess })
            }
        };
        Ok(block)
    }
}

fn field_error(offset: u64, err: FieldError) -> RerarError {
    match err {
        FieldError::UnsupportedTime(_) => RerarError::unsupported(offset, err.to_string()),
        _                              => RerarError::format(offset, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::read_block;

    fn reparse(block: &Block) -> Block {
        let bytes = block.encode().unwrap();
        let raw = read_block(&mut Cursor::new(bytes), 0).unwrap().unwrap();
        Block::decode(&raw).unwrap()
    }

    #[test]
    fn main_header_is_thirteen_bytes() {
        let bytes = Block::Main(MainHeader::new(MAIN_VOLUME | MAIN_FIRST_VOLUME)).encode().unwrap();
        assert_eq!(bytes.len() as u64, MAIN_HDR_SIZE);
    }

    #[test]
    fn file_header_roundtrip() {
        let mut h = FileHeader::stored(FILE_SPLIT_AFTER, 100, 300, b"out.bin".to_vec(),
            Some(ExtendedTime { one_second: true, fraction: 0x0A_0B0C }));
        h.fixed.crc = 0xDEAD_BEEF;
        h.fixed.attributes = ATTR_ARCHIVE;
        let bytes = Block::File(h.clone()).encode().unwrap();
        assert_eq!(bytes.len() as u64, file_header_size(7, false, 5));

        let Block::File(back) = reparse(&Block::File(h.clone())) else { panic!("not a file block") };
        assert_eq!(back.flags, h.flags | LONG_BLOCK | FILE_EXT_TIME);
        assert_eq!(back.fixed, h.fixed);
        assert_eq!(back.name, h.name);
        assert_eq!(back.xtime, h.xtime);
        assert_eq!(back.excess, 0);
    }

    #[test]
    fn large_file_header() {
        let packed = 3u64 << 31;
        let h = FileHeader::stored(0, packed, packed, b"big".to_vec(), None);
        let Block::File(back) = reparse(&Block::File(h)) else { panic!("not a file block") };
        assert_ne!(back.flags & FILE_LARGE, 0);
        assert_eq!(back.packed_size(), packed);
        assert_eq!(back.unpacked_size(), packed);
    }

    #[test]
    fn end_header_layouts() {
        let full = EndHeader::new(END_DATA_CRC | END_REV_SPACE | END_VOL_NUMBER, 3);
        let bytes = Block::End(full.clone()).encode().unwrap();
        assert_eq!(bytes.len() as u64, EndHeader::size(full.flags));
        assert_eq!(bytes.len(), 20);
        assert_eq!(reparse(&Block::End(full.clone())), Block::End(EndHeader { flags: full.flags | SKIP_IF_UNKNOWN, ..full }));

        let blank = EndHeader::new(0, 3);
        assert_eq!(Block::End(blank).encode().unwrap().len(), 7);
    }

    #[test]
    fn recovery_header_sizes() {
        let sub = SubRecoveryHeader {
            fixed:    FileFixed { version: SUB_VERSION, method: METHOD_STORE, name_len: 2, ..FileFixed::default() },
            name:     RR_SUB_NAME.to_vec(),
            protect:  *RR_PROTECT_3,
            rr_count: 1,
            sectors:  1,
            excess:   0,
        };
        assert_eq!(Block::Sub(sub.clone()).encode().unwrap().len(), 54);
        assert_eq!(reparse(&Block::Sub(sub.clone())), Block::Sub(sub));

        let old = OldRecoveryHeader { data_size: 514, version: 20, rr_count: 1, sectors: 1, protect: *RR_PROTECT_2, excess: 0 };
        assert_eq!(Block::OldRecovery(old.clone()).encode().unwrap().len(), 26);
        assert_eq!(reparse(&Block::OldRecovery(old.clone())), Block::OldRecovery(old));
    }

    #[test]
    fn truncated_file_body() {
        let bytes = encode_block(BlockType::File, LONG_BLOCK, &[0; 10]).unwrap();
        let raw = read_block(&mut Cursor::new(bytes), 0).unwrap().unwrap();
        assert!(matches!(Block::decode(&raw), Err(RerarError::Format { .. })));
    }
}
