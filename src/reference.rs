//! Reference-volume parser.
//!
//! Walks one existing volume from the signature to the end of file and
//! rebuilds the [`VolumeParams`] that regenerate its set.  Anything the
//! writer could not reproduce is fatal; anything merely unusual becomes a
//! [`Diagnostic`] with its byte offset, and the caller decides whether to
//! go on.
//!
//! Every byte read passes through a running CRC-32 so the End block's
//! volume CRC can be checked without a second pass.  Only the recovery
//! record rereads the volume, to refold the protected region.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use crc32fast::Hasher;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::block::{read_block, BlockType, RawBlock};
use crate::codec::{decode_latin1, encode_filename, decode_filename, split_unicode_field, Timestamp};
use crate::consts::*;
use crate::crc::{crc32_stream, crc32_update};
use crate::error::{Diagnostic, DiagnosticKind, RerarError, Result};
use crate::header::{Block, EndHeader, FileHeader, SubRecoveryHeader, OldRecoveryHeader};
use crate::numbering::{strip_volume_suffix, NamingScheme};
use crate::params::{
    DataCrcScope, DictionarySize, EndFlags, FileAttributes, FormatVersion, HostOs, VolumeParams,
};
use crate::layout::SetLayout;
use crate::recovery::{self, RecoveryData, CRC_SIZE, DATA_CRC_INIT, SECTOR_SIZE};

/// Everything learned from one reference volume.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceReport {
    pub path:                 PathBuf,
    pub params:               VolumeParams,
    /// Name of the directory holding the reference, when it looks like one.
    pub release_name:         Option<String>,
    /// On-disk size of the reference.  `params.volume_size` holds the
    /// nominal size, which a non-final volume may fall short of.
    pub volume_size:          u64,
    /// From the End block, when it carries one.
    pub ordinal:              Option<u16>,
    pub is_first:             bool,
    pub is_last:              bool,
    pub payload_size:         u64,
    /// Whole-payload CRC, when the reference stores it.
    pub expected_payload_crc: Option<u32>,
    pub renamed:              bool,
    pub diagnostics:          Vec<Diagnostic>,
}

impl ReferenceReport {
    /// The reconstructed parameters, or [`RerarError::Rejected`] when the
    /// parse found problems and `lenient` is off.
    pub fn to_params(&self, lenient: bool) -> Result<VolumeParams> {
        if !self.diagnostics.is_empty() && !lenient {
            return Err(RerarError::Rejected {
                path:        self.path.clone(),
                diagnostics: self.diagnostics.clone(),
            });
        }
        Ok(self.params.clone())
    }
}

pub fn parse_reference(path: &Path) -> Result<ReferenceReport> {
    let file = File::open(path)?;
    parse_reference_reader(file, path)
}

/// Parses a volume from any seekable source; `path` names it in the report
/// and supplies the release and base names.
pub fn parse_reference_reader<R: Read + Seek>(reader: R, path: &Path) -> Result<ReferenceReport> {
    let mut parser = Parser {
        input:       Tracked::new(BufReader::with_capacity(COPY_BUF_SIZE, reader)),
        path,
        diagnostics: Vec::new(),
    };
    parser.run()
}

/// The smallest nominal size whose plan gives a non-final volume of
/// `params.volume_size` bytes holding `packed` bytes of payload.  Format 2
/// recovery records shrink with the region they protect, so such volumes
/// can fall short of the nominal size by whole sectors.
fn nominal_volume_size(
    params:       &VolumeParams,
    payload_size: u64,
    packed:       u64,
    rr_count:     Option<u32>,
    mtime:        &NaiveDateTime,
) -> Option<u64> {
    let internal = params.internal_name.as_deref()?;
    let base = params.base_name.as_deref().unwrap_or(internal);
    let observed = params.volume_size;

    // up to eight missing parity sectors, plus a trimmed quantum tail
    (0..=8u64)
        .flat_map(|sectors| (0..=CRC_SIZE).map(move |tail| observed + sectors * SECTOR_SIZE + tail))
        .find(|&size| {
            let candidate = VolumeParams { volume_size: size, ..params.clone() };
            let Ok(layout) = SetLayout::resolve(&candidate, internal, base, payload_size, mtime) else {
                return false;
            };
            let plan = layout.plan_volume(0);
            layout.capacity == packed && layout.vol_count > 1 && plan.size == observed && plan.rr_count == rr_count
        })
}

// ── Tracked input ────────────────────────────────────────────────────────────

/// Counts and hashes every byte read through it.
struct Tracked<R> {
    inner: R,
    pos:   u64,
    crc:   Hasher,
}

impl<R: Read> Tracked<R> {
    fn new(inner: R) -> Self {
        Self { inner, pos: 0, crc: Hasher::new() }
    }

    fn crc(&self) -> u32 {
        self.crc.clone().finalize()
    }
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

// ── Parser ───────────────────────────────────────────────────────────────────

struct Parser<'a, R: Read + Seek> {
    input:       Tracked<BufReader<R>>,
    path:        &'a Path,
    diagnostics: Vec<Diagnostic>,
}

impl<R: Read + Seek> Parser<'_, R> {
    fn note(&mut self, kind: DiagnosticKind, offset: Option<u64>, message: impl Into<String>) {
        let diag = Diagnostic { kind, offset, message: message.into() };
        warn!(path = %self.path.display(), "{diag}");
        self.diagnostics.push(diag);
    }

    fn format(&mut self, offset: u64, message: impl Into<String>) {
        self.note(DiagnosticKind::Format, Some(offset), message);
    }

    fn integrity(&mut self, offset: u64, message: impl Into<String>) {
        self.note(DiagnosticKind::Integrity, Some(offset), message);
    }

    fn next_block(&mut self) -> Result<Option<RawBlock>> {
        let pos = self.input.pos;
        read_block(&mut self.input, pos)
    }

    /// Reads the next block, failing unless it has type `expect`.
    fn expect_block(&mut self, expect: BlockType) -> Result<RawBlock> {
        let pos = self.input.pos;
        let raw = self.next_block()?
            .ok_or_else(|| RerarError::format(pos, format!("expected {} block, found end of file", expect.name())))?;
        if raw.block_type() != Some(expect) {
            return Err(RerarError::format(raw.pos + HDR_TYPE_POS, format!(
                "expected block type 0x{:02X} ({}), found 0x{:02X}",
                expect as u8, expect.name(), raw.header.block_type)));
        }
        Ok(raw)
    }

    /// Flags outside `ignore` must equal `expect`.
    fn expect_flags(&mut self, raw: &RawBlock, name: &str, ignore: u16, expect: u16) {
        if raw.flags() & !ignore != expect {
            self.format(raw.pos + HDR_FLAGS_POS, format!("unexpected flags 0x{:04X} in {name} block", raw.flags()));
        }
    }

    fn run(&mut self) -> Result<ReferenceReport> {
        // ── Signature ────────────────────────────────────────────────────────
        let mut sig = [0u8; SIGNATURE.len()];
        self.input.read_exact(&mut sig)
            .map_err(|_| RerarError::format(0, "file too short for an archive signature"))?;
        if sig != SIGNATURE {
            return Err(RerarError::format(0, "invalid archive signature"));
        }

        // ── Main ─────────────────────────────────────────────────────────────
        let raw = self.expect_block(BlockType::Main)?;
        let main_flags = raw.flags();
        if main_flags & MAIN_PASSWORD != 0 {
            return Err(RerarError::unsupported(raw.pos + HDR_FLAGS_POS, "encrypted headers"));
        }
        self.expect_flags(&raw, "Main",
            MAIN_FIRST_VOLUME | MAIN_RECOVERY | MAIN_LOCK | MAIN_NEW_NUMBERING, MAIN_VOLUME);
        if raw.bytes.len() as u64 != MAIN_HDR_SIZE {
            self.format(raw.pos + HDR_SIZE_POS, format!("expected Main block size {MAIN_HDR_SIZE}"));
        }
        if raw.body().iter().any(|&b| b != 0) {
            self.format(raw.pos + BLOCK_HEADER_SIZE as u64, "expected zeroed Main block data");
        }
        let has_recovery = main_flags & MAIN_RECOVERY != 0;
        let first_flag = main_flags & MAIN_FIRST_VOLUME != 0;
        let naming = if main_flags & MAIN_NEW_NUMBERING != 0 {
            NamingScheme::PartN
        } else {
            NamingScheme::NumericSuffix
        };

        // ── File ─────────────────────────────────────────────────────────────
        let raw = self.expect_block(BlockType::File)?;
        let file_pos = raw.pos;
        let body_pos = file_pos + BLOCK_HEADER_SIZE as u64;
        let flags = raw.flags();
        if flags & (FILE_PASSWORD | FILE_SALT) != 0 {
            return Err(RerarError::unsupported(file_pos + HDR_FLAGS_POS, "encrypted file data"));
        }
        let dict_code = (flags & FILE_DICT_MASK) >> FILE_DICT_SHIFT;
        let dictionary = DictionarySize::from_code(dict_code).ok_or_else(|| RerarError::unsupported(
            file_pos + HDR_FLAGS_POS, format!("unexpected dictionary code {dict_code}")))?;
        self.expect_flags(&raw, "File",
            FILE_SPLIT_BEFORE | FILE_SPLIT_AFTER | FILE_LARGE | FILE_UNICODE | FILE_EXT_TIME | FILE_DICT_MASK,
            LONG_BLOCK);

        let Block::File(file) = Block::decode(&raw)? else {
            return Err(RerarError::format(file_pos, "File block did not decode as a file"));
        };
        if file.fixed.method != METHOD_STORE {
            return Err(RerarError::unsupported(body_pos + FILE_METHOD_POS,
                format!("compression method 0x{:02X}", file.fixed.method)));
        }

        let host_os = HostOs::from_code(file.fixed.host_os).unwrap_or_else(|| {
            self.format(body_pos + FILE_OS_POS, format!("unexpected host OS {}", file.fixed.host_os));
            HostOs::default()
        });
        if file.fixed.version != FILE_VERSION {
            self.format(body_pos + FILE_VER_POS, format!("expected version {FILE_VERSION}, found {}", file.fixed.version));
        }
        let attributes = FileAttributes::from_value(file.fixed.attributes).unwrap_or_else(|| {
            self.format(body_pos + FILE_ATTR_POS, format!("unexpected file attributes 0x{:08X}", file.fixed.attributes));
            FileAttributes::default()
        });

        let unicode = flags & FILE_UNICODE != 0;
        let internal_name = self.file_name(&file, body_pos, unicode);

        let timestamp = Timestamp { dos: file.fixed.dos_time, extended: file.xtime };
        let mtime = timestamp.to_datetime()
            .map_err(|e| RerarError::format(body_pos + FILE_TIME_POS, e.to_string()))?;
        if let Some(x) = file.xtime {
            if !x.one_second && x.fraction == 0 {
                debug!("extended time adds nothing to the DOS time");
            }
        }

        let large_len = if file.high_sizes.is_some() { 8 } else { 0 };
        let known = FILE_FIXED_SIZE + large_len + file.name.len();
        let xtime_used = raw.body().len() - file.excess - known;
        if let Some(x) = file.xtime {
            if x.encoded_len() != xtime_used {
                self.format(body_pos + known as u64, "extended time keeps redundant zero bytes");
            }
        }
        if file.excess > 0 {
            self.format(body_pos + (raw.body().len() - file.excess) as u64,
                format!("excess File block header length: {}", file.excess));
        }

        // ── Packed data ──────────────────────────────────────────────────────
        let data_pos = self.input.pos;
        let packed = file.packed_size();
        let slice_crc = crc32_stream(&mut self.input, packed).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => RerarError::format(data_pos,
                format!("{packed} bytes of packed data run past end of file")),
            _ => RerarError::Io(e),
        })?;
        let stored_crc = file.fixed.crc;
        let mut scope = DataCrcScope::WholePayload;
        let split_after = file.split_after();
        let split_before = file.split_before();
        if !split_after && !split_before && stored_crc != slice_crc {
            self.integrity(data_pos, format!("file CRC mismatch; calculated 0x{slice_crc:08X}"));
        }
        if split_after && stored_crc == slice_crc {
            scope = DataCrcScope::PerSlice;
        }
        let expected_payload_crc = match (split_after, scope) {
            (true, DataCrcScope::PerSlice) => None,
            _ => Some(stored_crc),
        };

        // ── Recovery record ──────────────────────────────────────────────────
        let recovery = if has_recovery {
            Some(self.recovery_block(host_os)?)
        } else {
            None
        };

        // ── End ──────────────────────────────────────────────────────────────
        let vol_crc = self.input.crc();
        let end_pos = self.input.pos;
        let end = self.next_block()?;
        let this_version = if end.is_some() { FormatVersion::Rar3 } else { FormatVersion::Rar2 };
        let version = match recovery {
            Some((rr, _)) if rr != this_version => {
                self.format(end_pos, format!("unexpected End block presence for format {}", rr.number()));
                rr
            }
            Some((rr, _)) => rr,
            None => this_version,
        };

        let mut ordinal = None;
        let mut end_flags = EndFlags::default();
        let volume_size = match end {
            Some(raw) => {
                if raw.block_type() != Some(BlockType::End) {
                    return Err(RerarError::format(raw.pos + HDR_TYPE_POS, format!(
                        "expected End block, found type 0x{:02X}", raw.header.block_type)));
                }
                let (flags, number) = self.end_block(&raw, split_after, first_flag, vol_crc)?;
                end_flags = flags;
                ordinal = number;

                let size = self.input.pos;
                let mut extra = [0u8; 1];
                if self.input.read(&mut extra)? > 0 {
                    self.format(size, "expected end of file");
                }
                size
            }
            None => end_pos,
        };

        if version == FormatVersion::Rar3 && split_before == first_flag {
            self.note(DiagnosticKind::Format, None, format!(
                "split-before ({split_before}) and first-volume ({first_flag}) flags do not correspond"));
        } else if version == FormatVersion::Rar2 && first_flag {
            self.note(DiagnosticKind::Format, None, "first-volume flag set on a format 2 volume");
        }
        let is_first = match version {
            FormatVersion::Rar3 => first_flag,
            FormatVersion::Rar2 => !split_before,
        };

        // ── Names ────────────────────────────────────────────────────────────
        let file_name = self.path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let stem = Path::new(&internal_name).file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let renamed = !file_name.starts_with(&stem);
        if renamed {
            self.note(DiagnosticKind::Format, None, format!("{file_name} appears to have been renamed"));
        }
        let release_name = self.path.parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty() && !n.starts_with('.'));
        let base_name = strip_volume_suffix(&file_name).to_owned();

        if !split_after && split_before {
            warn!(path = %self.path.display(), "reference is the last volume; its size may be below the nominal volume size");
        }

        let mut params = VolumeParams {
            version,
            naming:         Some(naming),
            host_os,
            dictionary:     (dictionary != DictionarySize::default_for(version)).then_some(dictionary),
            recovery:       has_recovery,
            lock:           main_flags & MAIN_LOCK != 0,
            unicode_name:   unicode,
            extended_time:  file.xtime.is_some(),
            attributes,
            end_flags,
            timestamp:      Some(mtime),
            volume_size,
            data_crc_scope: scope,
            internal_name:  Some(internal_name),
            base_name:      (!base_name.is_empty()).then_some(base_name),
        };
        if split_after {
            let rr_count = recovery.map(|(_, count)| count);
            match nominal_volume_size(&params, file.unpacked_size(), packed, rr_count, &mtime) {
                Some(nominal) => params.volume_size = nominal,
                None => warn!(path = %self.path.display(), volume_size,
                    "no nominal volume size reproduces this volume; using its own size"),
            }
        }

        info!(path = %self.path.display(), volume_size, diagnostics = self.diagnostics.len(), "reference parsed");

        Ok(ReferenceReport {
            path: self.path.to_path_buf(),
            params,
            release_name,
            volume_size,
            ordinal,
            is_first,
            is_last: !split_after,
            payload_size: file.unpacked_size(),
            expected_payload_crc,
            renamed,
            diagnostics: std::mem::take(&mut self.diagnostics),
        })
    }

    fn file_name(&mut self, file: &FileHeader, body_pos: u64, unicode: bool) -> String {
        let name_pos = body_pos + (FILE_FIXED_SIZE + if file.high_sizes.is_some() { 8 } else { 0 }) as u64;
        let name = match decode_filename(&file.name, unicode) {
            Ok(name) => name,
            Err(e) => {
                self.format(name_pos, format!("undecodable file name: {e}"));
                let narrow = split_unicode_field(&file.name).map_or(&file.name[..], |(n, _)| n);
                decode_latin1(narrow)
            }
        };
        if unicode && encode_filename(&name, true).as_deref() != Ok(&file.name[..]) {
            let narrow_len = split_unicode_field(&file.name).map_or(0, |(n, _)| n.len());
            self.format(name_pos + narrow_len as u64 + 1, "unexpected file name encoding");
        }
        name
    }

    /// Parses the recovery record and returns the format it implies, with
    /// its parity sector count.
    fn recovery_block(&mut self, file_os: HostOs) -> Result<(FormatVersion, u32)> {
        let pos = self.input.pos;
        let raw = self.next_block()?
            .ok_or_else(|| RerarError::format(pos, "expected recovery block, found end of file"))?;
        let body_pos = raw.pos + BLOCK_HEADER_SIZE as u64;

        match raw.block_type() {
            Some(BlockType::OldRecovery) => {
                self.expect_flags(&raw, "format 2 recovery", 0, LONG_BLOCK | SKIP_IF_UNKNOWN);
                let Block::OldRecovery(h) = Block::decode(&raw)? else {
                    return Err(RerarError::format(raw.pos, "recovery block did not decode"));
                };
                let OldRecoveryHeader { data_size, version, rr_count, sectors, protect, excess } = h;
                if version != FILE_VERSION {
                    self.format(body_pos + 4, format!("expected version {FILE_VERSION}, found {version}"));
                }
                if protect != *RR_PROTECT_2 {
                    self.format(body_pos + 11, "expected \"Protect!\"");
                }
                self.check_recovery(&raw, u64::from(data_size), u32::from(rr_count), u64::from(sectors), excess)?;
                Ok((FormatVersion::Rar2, u32::from(rr_count)))
            }
            Some(BlockType::Sub) => {
                self.expect_flags(&raw, "Sub", 0, LONG_BLOCK | SKIP_IF_UNKNOWN);
                let Block::Sub(h) = Block::decode(&raw)? else {
                    return Err(RerarError::format(raw.pos, "recovery block did not decode"));
                };
                let SubRecoveryHeader { fixed, name, protect, rr_count, sectors, excess } = h;
                if fixed.dos_time != 0 || fixed.attributes != 0 {
                    self.format(body_pos, "expected zero Sub block timestamp and attributes");
                }
                if fixed.version != SUB_VERSION {
                    self.format(body_pos + FILE_VER_POS, format!("expected version {SUB_VERSION}, found {}", fixed.version));
                }
                if fixed.host_os != file_os.code() {
                    self.format(body_pos + FILE_OS_POS, format!(
                        "Sub block OS ({}) does not match file OS ({})", fixed.host_os, file_os.code()));
                }
                if fixed.method != METHOD_STORE {
                    return Err(RerarError::unsupported(body_pos + FILE_METHOD_POS, "compressed recovery record"));
                }
                if fixed.packed != fixed.unpacked {
                    self.format(body_pos + FILE_PACK_POS, "Sub block packed size differs from unpacked size");
                }
                let name_pos = body_pos + FILE_FIXED_SIZE as u64;
                if name != RR_SUB_NAME {
                    return Err(RerarError::format(name_pos, format!(
                        "expected RR sub-block, found {:?}", decode_latin1(&name))));
                }
                if protect != *RR_PROTECT_3 {
                    self.format(name_pos + name.len() as u64, "expected \"Protect+\"");
                }
                let data_crc = self.check_recovery(&raw, u64::from(fixed.unpacked), rr_count, sectors, excess)?;
                if data_crc != fixed.crc {
                    self.integrity(self.input.pos, format!("recovery block CRC mismatch; calculated 0x{data_crc:08X}"));
                }
                Ok((FormatVersion::Rar3, rr_count))
            }
            _ => Err(RerarError::format(raw.pos + HDR_TYPE_POS, format!(
                "expected recovery block, found type 0x{:02X}", raw.header.block_type))),
        }
    }

    /// Checks the counts, refolds the protected region and compares it with
    /// the stored data.  Returns the seeded CRC of the stored data.
    fn check_recovery(&mut self, raw: &RawBlock, data_size: u64, rr_count: u32, sectors: u64, excess: usize) -> Result<u32> {
        let protected = raw.pos;
        let expect = recovery::quanta(protected, SECTOR_SIZE);
        if sectors != expect {
            return Err(RerarError::format(raw.pos, format!(
                "expected protected sector count {expect}, found {sectors}")));
        }
        if excess > 0 {
            self.format(raw.pos + (raw.bytes.len() - excess) as u64,
                format!("excess recovery header length: {excess}"));
        }
        if rr_count == 0 || data_size != sectors * 2 + u64::from(rr_count) * SECTOR_SIZE {
            return Err(RerarError::format(raw.pos + BLOCK_HEADER_SIZE as u64,
                "recovery data size does not match sector and recovery counts"));
        }

        // Refold from the start, then resume after the header.
        let resume = self.input.pos;
        let reader = &mut self.input.inner;
        let file_len = reader.seek(SeekFrom::End(0))?;
        if resume + data_size > file_len {
            return Err(RerarError::format(resume, format!(
                "{data_size} bytes of recovery data run past end of file")));
        }
        reader.seek(SeekFrom::Start(0))?;
        let expected = {
            let mut region = reader.by_ref().take(protected);
            RecoveryData::compute(&mut region, rr_count, protected)?
        };
        reader.seek(SeekFrom::Start(resume))?;

        let short = |e: io::Error| match e.kind() {
            io::ErrorKind::UnexpectedEof => RerarError::format(resume, "recovery data runs past end of file"),
            _ => RerarError::Io(e),
        };

        let mut crc = DATA_CRC_INIT;
        let mut table = vec![0u8; (sectors * 2) as usize];
        self.input.read_exact(&mut table).map_err(short)?;
        crc = crc32_update(crc, &table);
        for (i, (stored, calc)) in table.chunks_exact(2).zip(&expected.sector_crcs).enumerate() {
            let stored = u16::from_le_bytes([stored[0], stored[1]]);
            if stored != *calc {
                self.integrity(resume + i as u64 * 2, format!("sector {i} CRC mismatch; calculated 0x{calc:04X}"));
            }
        }

        let mut sector = vec![0u8; SECTOR_SIZE as usize];
        for i in 0..rr_count as usize {
            let at = self.input.pos;
            self.input.read_exact(&mut sector).map_err(short)?;
            crc = crc32_update(crc, &sector);
            if sector != expected.parity_sector(i) {
                self.integrity(at, format!("recovery sector {i}/{rr_count} mismatch"));
            }
        }
        Ok(crc)
    }

    /// Returns the end-flag set and the volume number, if stored.
    fn end_block(&mut self, raw: &RawBlock, split_after: bool, first_flag: bool, vol_crc: u32) -> Result<(EndFlags, Option<u16>)> {
        self.expect_flags(raw, "End", END_NEXT_VOLUME | END_FIELD_MASK, SKIP_IF_UNKNOWN);
        let flags = raw.flags();
        let next_volume = flags & END_NEXT_VOLUME != 0;
        if next_volume != split_after {
            self.format(raw.pos + HDR_FLAGS_POS, format!(
                "split-after ({split_after}) and next-volume ({next_volume}) flags do not match"));
        }

        let end_flags = EndFlags::from_bits(flags);
        if !end_flags.is_preset() {
            self.format(raw.pos + HDR_FLAGS_POS, format!(
                "unusual End block flag combination 0x{:X}", flags & END_FIELD_MASK));
        }

        let Block::End(end) = Block::decode(raw)? else {
            return Err(RerarError::format(raw.pos, "End block did not decode"));
        };
        let EndHeader { data_crc, vol_number, reserved, excess, .. } = end;
        let mut field = raw.pos + BLOCK_HEADER_SIZE as u64;
        if let Some(stored) = data_crc {
            if stored != vol_crc {
                self.integrity(field, format!("volume CRC mismatch; calculated 0x{vol_crc:08X}"));
            }
            field += 4;
        }
        if let Some(number) = vol_number {
            if (number == 0) != first_flag {
                self.format(field, format!(
                    "volume number ({number}) and first-volume flag ({first_flag}) do not match"));
            }
            field += 2;
        }
        if reserved.is_some_and(|r| r.iter().any(|&b| b != 0)) {
            self.format(field, "expected zeroed End block data");
        }
        if excess > 0 {
            self.format(raw.pos + HDR_SIZE_POS, "unexpected extra End block data");
        }
        Ok((end_flags, vol_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_stream::VolumeWriter;
    use crate::layout::SetLayout;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn noon() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2011, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    /// Volume `ordinal` of a set over `payload`, built in memory.
    fn volume(params: &VolumeParams, payload: &[u8], ordinal: usize) -> Vec<u8> {
        let layout = SetLayout::resolve(params, "out.bin", "out", payload.len() as u64, &noon()).unwrap();
        let slices: Vec<u32> = (0..layout.vol_count).map(|n| {
            let start = layout.slice_offset(n) as usize;
            crate::crc::crc32(&payload[start..start + layout.slice_len(n) as usize])
        }).collect();
        let whole = crate::crc::crc32(payload);

        let mut w = VolumeWriter::new(Cursor::new(Vec::new()));
        w.write_signature().unwrap();
        w.write_main(layout.main_header(ordinal)).unwrap();
        let start = layout.slice_offset(ordinal) as usize;
        let header = layout.file_header(ordinal, layout.data_crc(ordinal, &slices, whole));
        w.write_file(header, &mut Cursor::new(&payload[start..])).unwrap();
        if let Some(rr) = layout.rr_count_for(ordinal, w.position()) {
            w.write_recovery(params.version, params.host_os, rr).unwrap();
        }
        if let Some(end) = layout.end_header(ordinal) {
            w.write_end(end).unwrap();
        }
        w.finish().unwrap().0.into_inner()
    }

    fn parse(bytes: Vec<u8>, name: &str) -> Result<ReferenceReport> {
        parse_reference_reader(Cursor::new(bytes), &Path::new("grp-release").join(name))
    }

    fn params() -> VolumeParams {
        VolumeParams { volume_size: 250, timestamp: Some(noon()), ..VolumeParams::default() }
    }

    #[test]
    fn recovers_parameters() {
        let payload = vec![0xFFu8; 400];
        let report = parse(volume(&params(), &payload, 0), "out.rar").unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(report.release_name.as_deref(), Some("grp-release"));
        assert_eq!(report.volume_size, 250);
        assert_eq!(report.ordinal, Some(0));
        assert!(report.is_first);
        assert!(!report.is_last);
        assert_eq!(report.payload_size, 400);
        assert_eq!(report.expected_payload_crc, Some(crate::crc::crc32(&payload)));

        let p = report.to_params(false).unwrap();
        assert_eq!(p.version, FormatVersion::Rar3);
        assert_eq!(p.naming, Some(NamingScheme::NumericSuffix));
        assert_eq!(p.dictionary, None);
        assert_eq!(p.internal_name.as_deref(), Some("out.bin"));
        assert_eq!(p.base_name.as_deref(), Some("out"));
        assert_eq!(p.timestamp, Some(noon()));
        assert_eq!(p.end_flags, EndFlags::FULL);
        assert_eq!(p.data_crc_scope, DataCrcScope::WholePayload);
    }

    #[test]
    fn detects_per_slice_crcs() {
        let p = VolumeParams { data_crc_scope: DataCrcScope::PerSlice, ..params() };
        let report = parse(volume(&p, &[7u8; 400], 1), "out.r00").unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(report.params.data_crc_scope, DataCrcScope::PerSlice);
        assert_eq!(report.expected_payload_crc, None);
        assert_eq!(report.ordinal, Some(1));
        assert!(!report.is_first);
    }

    #[test]
    fn rar2_with_recovery() {
        let p = VolumeParams { version: FormatVersion::Rar2, recovery: true, volume_size: 1200, ..params() };
        let payload: Vec<u8> = (0..2048u32).map(|i| (i * 7) as u8).collect();
        let report = parse(volume(&p, &payload, 0), "out.rar").unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(report.params.version, FormatVersion::Rar2);
        assert!(report.params.recovery);
        assert!(report.is_first);
        assert_eq!(report.ordinal, None);
        // one parity sector instead of two, and a smaller sector table
        assert_eq!(report.volume_size, 688);
        assert_eq!(report.params.volume_size, 1200);
    }

    #[test]
    fn rar2_short_volumes_keep_their_nominal_size() {
        let payload: Vec<u8> = (0..7000u32).map(|i| (i * 13) as u8).collect();
        for nominal in [1118, 1500] {
            let p = VolumeParams { version: FormatVersion::Rar2, recovery: true, volume_size: nominal, ..params() };
            let bytes = volume(&p, &payload, 1);
            assert!((bytes.len() as u64) < nominal - 500);
            let report = parse(bytes, "out.r00").unwrap();
            assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
            assert_eq!(report.params.volume_size, nominal);
        }
    }

    #[test]
    fn invalid_dos_time() {
        let mut bytes = volume(&params(), &[1u8; 400], 0);
        let time = 7 + 13 + 7 + FILE_TIME_POS as usize;
        bytes[time..time + 4].fill(0);
        let crc = crate::crc::crc16_of_header(&bytes[22..59]);
        bytes[20..22].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(parse(bytes, "out.rar"), Err(RerarError::Format { offset: 40, .. })));
    }

    #[test]
    fn recovery_claim_beyond_end_of_file() {
        let p = VolumeParams { recovery: true, volume_size: 1200, ..params() };
        let mut bytes = volume(&p, &[3u8; 2048], 0);
        let sub_pos = 7 + 13 + 39 + 41;
        let raw = read_block(&mut Cursor::new(&bytes[sub_pos..]), sub_pos as u64).unwrap().unwrap();
        let Block::Sub(mut sub) = Block::decode(&raw).unwrap() else { panic!("expected the recovery block") };

        sub.rr_count = 1 << 22;
        let size = (sub.sectors * 2 + (1u64 << 22) * 512) as u32;
        sub.fixed.packed = size;
        sub.fixed.unpacked = size;
        let header = Block::Sub(sub).encode().unwrap();
        bytes[sub_pos..sub_pos + header.len()].copy_from_slice(&header);

        let err = parse(bytes, "out.rar").unwrap_err();
        assert!(matches!(err, RerarError::Format { .. }), "{err}");
    }

    #[test]
    fn flags_corrupted_recovery_sector() {
        let p = VolumeParams { recovery: true, volume_size: 1200, ..params() };
        let payload = vec![3u8; 2048];
        let mut bytes = volume(&p, &payload, 0);
        // last byte of the last parity sector, ahead of the End block
        let at = bytes.len() - 21;
        bytes[at] ^= 0x55;
        let report = parse(bytes, "out.rar").unwrap();
        let kinds: Vec<DiagnosticKind> = report.diagnostics.iter().map(|d| d.kind).collect();
        assert!(kinds.iter().all(|&k| k == DiagnosticKind::Integrity));
        // parity, Sub block CRC and volume CRC
        assert_eq!(kinds.len(), 3);
        assert!(matches!(report.to_params(false), Err(RerarError::Rejected { .. })));
        assert!(report.to_params(true).is_ok());
    }

    #[test]
    fn renamed_reference() {
        let report = parse(volume(&params(), &[1u8; 400], 0), "other.rar").unwrap();
        assert!(report.renamed);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.params.base_name.as_deref(), Some("other"));
    }

    #[test]
    fn fatal_problems() {
        let bad_sig = parse(b"Rar!\x1a\x07\x01garbage".to_vec(), "out.rar");
        assert!(matches!(bad_sig, Err(RerarError::Format { offset: 0, .. })));

        let mut bytes = volume(&params(), &[1u8; 400], 0);
        let method = 7 + 13 + 7 + FILE_METHOD_POS as usize;
        bytes[method] = 0x33;
        assert!(matches!(parse(bytes.clone(), "out.rar"), Err(RerarError::Format { offset: 20, .. })));

        // with a valid header CRC the method itself is refused
        let crc = crate::crc::crc16_of_header(&bytes[22..59]);
        bytes[20..22].copy_from_slice(&crc.to_le_bytes());
        assert!(matches!(parse(bytes, "out.rar"), Err(RerarError::Unsupported { offset: 45, .. })));

        let mut truncated = volume(&params(), &[1u8; 400], 0);
        truncated.truncate(100);
        assert!(matches!(parse(truncated, "out.rar"), Err(RerarError::Format { .. })));
    }
}
