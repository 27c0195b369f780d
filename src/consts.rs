//! Fixed values of the RAR 2.x/3.x container.
//!
//! Every on-disk number used by the writer and the reference parser lives
//! here; nothing else in the crate spells out a raw flag or type code.

/// Marker written at the start of every volume.
pub const SIGNATURE: [u8; 7] = *b"Rar!\x1a\x07\x00";

// ── Block header ─────────────────────────────────────────────────────────────

/// `crc16 (2) | type (1) | flags (2) | size (2)`
pub const BLOCK_HEADER_SIZE: usize = 7;
pub const HDR_CRC_POS:   u64 = 0;
pub const HDR_TYPE_POS:  u64 = 2;
pub const HDR_FLAGS_POS: u64 = 3;
pub const HDR_SIZE_POS:  u64 = 5;

/// Packed data follows the header (File, Sub, OldRecovery).
pub const LONG_BLOCK:      u16 = 0x8000;
pub const SKIP_IF_UNKNOWN: u16 = 0x4000;

// ── Main block ───────────────────────────────────────────────────────────────

pub const MAIN_VOLUME:        u16 = 0x0001;
pub const MAIN_LOCK:          u16 = 0x0004;
pub const MAIN_NEW_NUMBERING: u16 = 0x0010;
pub const MAIN_RECOVERY:      u16 = 0x0040;
pub const MAIN_PASSWORD:      u16 = 0x0080;
pub const MAIN_FIRST_VOLUME:  u16 = 0x0100;

/// Reserved bytes after the block header (all zero).
pub const MAIN_EXTRA: usize = 2 + 4;
pub const MAIN_HDR_SIZE: u64 = (BLOCK_HEADER_SIZE + MAIN_EXTRA) as u64;

// ── File block ───────────────────────────────────────────────────────────────

pub const FILE_SPLIT_BEFORE: u16 = 0x0001;
pub const FILE_SPLIT_AFTER:  u16 = 0x0002;
pub const FILE_PASSWORD:     u16 = 0x0004;
pub const FILE_DICT_MASK:    u16 = 0x00E0;
pub const FILE_DICT_SHIFT:   u16 = 5;
/// Dictionary code 7 marks a directory entry.
pub const FILE_DICT_DIRECTORY: u16 = 7;
pub const FILE_LARGE:        u16 = 0x0100;
pub const FILE_UNICODE:      u16 = 0x0200;
pub const FILE_SALT:         u16 = 0x0400;
pub const FILE_EXT_TIME:     u16 = 0x1000;

/// packed, unpacked, host OS, CRC, DOS time, version, method, name length,
/// attributes.
pub const FILE_FIXED_SIZE: usize = 4 + 4 + 1 + 4 + 4 + 1 + 1 + 2 + 4;
pub const FILE_PACK_POS:   u64 = 0;
pub const FILE_OS_POS:     u64 = 8;
pub const FILE_CRC_POS:    u64 = 9;
pub const FILE_TIME_POS:   u64 = 13;
pub const FILE_VER_POS:    u64 = 17;
pub const FILE_METHOD_POS: u64 = 18;
pub const FILE_ATTR_POS:   u64 = 21;

/// "Needed to extract" version written into File blocks (2.0).
pub const FILE_VERSION: u8 = 20;
/// Version written into recovery sub-blocks (2.9).
pub const SUB_VERSION:  u8 = 29;
/// Storage method "stored" (`'0'`).
pub const METHOD_STORE: u8 = 0x30;

pub const OS_WIN32: u8 = 2;
pub const OS_UNIX:  u8 = 3;

pub const ATTR_ARCHIVE: u32 = 1 << 5;
pub const ATTR_NORMAL:  u32 = 1 << 7;

pub const DICT_MIN_KIB: u16 = 64;
pub const DICT_MAX_KIB: u16 = 4096;

// ── Recovery records ─────────────────────────────────────────────────────────

pub const RR_SUB_NAME:  &[u8; 2] = b"RR";
pub const RR_PROTECT_2: &[u8; 8] = b"Protect!";
pub const RR_PROTECT_3: &[u8; 8] = b"Protect+";

// ── End block ────────────────────────────────────────────────────────────────

pub const END_NEXT_VOLUME: u16 = 0x0001;
pub const END_DATA_CRC:    u16 = 0x0002;
pub const END_REV_SPACE:   u16 = 0x0004;
pub const END_VOL_NUMBER:  u16 = 0x0008;
pub const END_FIELD_MASK:  u16 = END_DATA_CRC | END_REV_SPACE | END_VOL_NUMBER;
/// Zeroed "reserved space" appended when `END_REV_SPACE` is set.
pub const END_EXTRA: usize = 7;

// ── Streaming ────────────────────────────────────────────────────────────────

/// Buffer used when copying or checksumming payload data.
pub const COPY_BUF_SIZE: usize = 0x10000;

/// Default nominal volume size.
pub const DEFAULT_VOLUME_SIZE: u64 = 15_000_000;
