//! Per-set planning: payload capacity, volume count, and the exact header
//! contents of every volume.
//!
//! Everything here is pure; [`SetLayout::plan_volume`] is the dry-run
//! mirror whose sizes the writer must reproduce byte for byte.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::codec::{encode_filename, needs_large_sizes, Timestamp};
use crate::consts::*;
use crate::error::{RerarError, Result};
use crate::header::{file_header_size, EndHeader, FileHeader, MainHeader};
use crate::io_stream::DryVolume;
use crate::numbering::{NamingScheme, VolumeNames, MAX_NUMERIC_VOLUMES};
use crate::params::{DataCrcScope, FormatVersion, VolumeParams};
use crate::recovery;

/// Sizes the dry run predicts for one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumePlan {
    pub ordinal:  usize,
    pub slice:    u64,
    pub rr_count: Option<u32>,
    pub size:     u64,
}

#[derive(Debug, Clone)]
pub struct SetLayout {
    pub params:        VolumeParams,
    pub internal_name: String,
    pub base_name:     String,
    pub payload_size:  u64,
    pub name_field:    Vec<u8>,
    pub timestamp:     Timestamp,
    /// Payload bytes in every volume but the last.
    pub capacity:      u64,
    pub vol_count:     usize,
    pub naming:        NamingScheme,
    /// Recovery count for full volumes, when recovery is on.
    pub rr_max:        Option<u32>,
}

impl SetLayout {
    pub fn resolve(
        params:        &VolumeParams,
        internal_name: &str,
        base_name:     &str,
        payload_size:  u64,
        mtime:         &NaiveDateTime,
    ) -> Result<Self> {
        params.validate()?;
        if payload_size == 0 {
            return Err(RerarError::config("payload is empty"));
        }

        let name_field = encode_filename(internal_name, params.unicode_name)
            .map_err(|e| RerarError::config(e.to_string()))?;
        let timestamp = Timestamp::encode(mtime, params.extended_time)
            .map_err(|e| RerarError::config(e.to_string()))?;
        let xtime_len = timestamp.extended.map_or(0, |x| x.encoded_len());

        let header_size = file_header_size(name_field.len(), needs_large_sizes(0, payload_size), xtime_len);
        if header_size > u64::from(u16::MAX) {
            return Err(RerarError::config(format!("internal name {internal_name:?} is too long")));
        }

        let version = params.version;
        let vol_max = params.volume_size;
        let end_size = params.effective_end_flags().map_or(0, |f| EndHeader::size(f.bits()));

        let mut data_max = vol_max as i64 - end_size as i64;
        let rr_max = params.recovery.then(|| recovery::prospective_count(version, vol_max, vol_max));
        if let Some(rr) = rr_max {
            data_max = recovery::protected_capacity(version, data_max, rr);
        }
        data_max -= (SIGNATURE.len() as u64 + MAIN_HDR_SIZE) as i64;
        data_max -= header_size as i64;

        if data_max <= 0 {
            return Err(RerarError::config(format!(
                "volume size {vol_max} leaves no room for data after {} bytes of headers",
                vol_max as i64 - data_max)));
        }

        let capacity = data_max as u64;
        let vol_count = usize::try_from(payload_size.div_ceil(capacity))
            .map_err(|_| RerarError::config("too many volumes"))?;
        let naming = params.naming.unwrap_or_else(|| NamingScheme::select(vol_count));

        if naming == NamingScheme::NumericSuffix && vol_count > MAX_NUMERIC_VOLUMES {
            return Err(RerarError::config(format!(
                "{vol_count} volumes exceed the {MAX_NUMERIC_VOLUMES} numeric-suffix names")));
        }
        if params.effective_end_flags().is_some_and(|f| f.vol_number) && vol_count > usize::from(u16::MAX) + 1 {
            return Err(RerarError::config(format!("{vol_count} volumes cannot be numbered in the End block")));
        }

        debug!(capacity, vol_count, ?naming, ?rr_max, "set layout resolved");

        Ok(Self {
            params: params.clone(),
            internal_name: internal_name.to_owned(),
            base_name: base_name.to_owned(),
            payload_size,
            name_field,
            timestamp,
            capacity,
            vol_count,
            naming,
            rr_max,
        })
    }

    pub fn version(&self) -> FormatVersion {
        self.params.version
    }

    pub fn names(&self) -> VolumeNames {
        VolumeNames::new(self.base_name.clone(), self.naming, self.vol_count)
    }

    pub fn checksum_name(&self) -> String {
        format!("{}.sfv", self.base_name)
    }

    pub fn is_last(&self, ordinal: usize) -> bool {
        ordinal + 1 >= self.vol_count
    }

    pub fn slice_offset(&self, ordinal: usize) -> u64 {
        ordinal as u64 * self.capacity
    }

    /// Strictly positive for every ordinal below `vol_count`.
    pub fn slice_len(&self, ordinal: usize) -> u64 {
        if self.is_last(ordinal) {
            self.payload_size - self.slice_offset(ordinal)
        } else {
            self.capacity
        }
    }

    pub fn main_header(&self, ordinal: usize) -> MainHeader {
        let p = &self.params;
        let mut flags = MAIN_VOLUME;
        if p.recovery { flags |= MAIN_RECOVERY; }
        if p.lock { flags |= MAIN_LOCK; }
        if self.naming.new_numbering() { flags |= MAIN_NEW_NUMBERING; }
        if p.version == FormatVersion::Rar3 && ordinal == 0 { flags |= MAIN_FIRST_VOLUME; }
        MainHeader::new(flags)
    }

    /// File header for `ordinal`, storing `data_crc`.
    pub fn file_header(&self, ordinal: usize, data_crc: u32) -> FileHeader {
        let p = &self.params;
        let mut flags = p.dictionary().flag_bits();
        if ordinal > 0 { flags |= FILE_SPLIT_BEFORE; }
        if !self.is_last(ordinal) { flags |= FILE_SPLIT_AFTER; }
        if p.unicode_name { flags |= FILE_UNICODE; }

        let mut header = FileHeader::stored(
            flags,
            self.slice_len(ordinal),
            self.payload_size,
            self.name_field.clone(),
            self.timestamp.extended,
        );
        header.fixed.host_os = p.host_os.code();
        header.fixed.crc = data_crc;
        header.fixed.dos_time = self.timestamp.dos;
        header.fixed.attributes = p.attributes.value();
        header
    }

    pub fn file_header_size(&self, ordinal: usize) -> u64 {
        let large = needs_large_sizes(self.slice_len(ordinal), self.payload_size);
        let xtime_len = self.timestamp.extended.map_or(0, |x| x.encoded_len());
        file_header_size(self.name_field.len(), large, xtime_len)
    }

    /// The File-block data CRC for `ordinal`, given every slice CRC and
    /// their combination.
    pub fn data_crc(&self, ordinal: usize, slice_crcs: &[u32], whole: u32) -> u32 {
        match self.params.data_crc_scope {
            DataCrcScope::PerSlice if !self.is_last(ordinal) => slice_crcs[ordinal],
            _ => whole,
        }
    }

    /// Non-final format 3 volumes share the full-volume count; the last
    /// volume and every format 2 volume size it from what precedes it.
    pub fn rr_count_for(&self, ordinal: usize, protected: u64) -> Option<u32> {
        let rr_max = self.rr_max?;
        if self.is_last(ordinal) || self.version() == FormatVersion::Rar2 {
            Some(recovery::prospective_count(self.version(), protected, self.params.volume_size))
        } else {
            Some(rr_max)
        }
    }

    pub fn end_header(&self, ordinal: usize) -> Option<EndHeader> {
        let flags = self.params.effective_end_flags()?;
        let mut bits = flags.bits();
        if !self.is_last(ordinal) {
            bits |= END_NEXT_VOLUME;
        }
        Some(EndHeader::new(bits, ordinal as u16))
    }

    pub fn plan_volume(&self, ordinal: usize) -> VolumePlan {
        let slice = self.slice_len(ordinal);
        let mut dry = DryVolume::default();
        dry.signature();
        dry.main();
        dry.file(self.file_header_size(ordinal), slice);
        let rr_count = self.rr_count_for(ordinal, dry.size());
        if let Some(count) = rr_count {
            dry.recovery(self.version(), count);
        }
        if let Some(end) = self.end_header(ordinal) {
            dry.end(EndHeader::size(end.flags));
        }
        VolumePlan { ordinal, slice, rr_count, size: dry.size() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::EndFlags;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2012, 3, 4).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    fn layout(params: VolumeParams, payload: u64) -> Result<SetLayout> {
        SetLayout::resolve(&params, "out.bin", "out", payload, &noon())
    }

    #[test]
    fn overhead_of_a_plain_volume() {
        // 7 + 13 + (32 + 7) + 20 bytes of headers
        let l = layout(VolumeParams { volume_size: 250, ..VolumeParams::default() }, 400).unwrap();
        assert_eq!(l.capacity, 171);
        assert_eq!(l.vol_count, 3);
        assert_eq!(l.naming, NamingScheme::NumericSuffix);
        assert_eq!(l.slice_len(0), 171);
        assert_eq!(l.slice_len(2), 58);
        assert_eq!(l.plan_volume(0).size, 250);
        assert_eq!(l.plan_volume(2).size, 250 - 171 + 58);
    }

    #[test]
    fn rar2_has_no_end_block() {
        let p = VolumeParams { version: FormatVersion::Rar2, volume_size: 250, ..VolumeParams::default() };
        let l = layout(p, 400).unwrap();
        assert_eq!(l.capacity, 191);
        assert!(l.end_header(0).is_none());
        assert_eq!(l.main_header(0).flags, MAIN_VOLUME);
    }

    #[test]
    fn headers_follow_position() {
        let p = VolumeParams { volume_size: 250, end_flags: EndFlags::NO_VOLUME_NUMBER, ..VolumeParams::default() };
        let l = layout(p, 400).unwrap();
        assert_eq!(l.main_header(0).flags, MAIN_VOLUME | MAIN_FIRST_VOLUME);
        assert_eq!(l.main_header(1).flags, MAIN_VOLUME);

        let first = l.file_header(0, 7);
        assert_eq!(first.flags & (FILE_SPLIT_BEFORE | FILE_SPLIT_AFTER), FILE_SPLIT_AFTER);
        assert_eq!(first.flags & FILE_DICT_MASK, 6 << 5);
        let last = l.file_header(2, 7);
        assert_eq!(last.flags & (FILE_SPLIT_BEFORE | FILE_SPLIT_AFTER), FILE_SPLIT_BEFORE);
        assert_eq!(last.packed_size(), 400 - 2 * 173);
        assert_eq!(last.unpacked_size(), 400);

        assert_eq!(l.end_header(0).unwrap().flags, END_DATA_CRC | END_REV_SPACE | END_NEXT_VOLUME);
        assert_eq!(l.end_header(2).unwrap().flags, END_DATA_CRC | END_REV_SPACE);
    }

    #[test]
    fn rejects_infeasible_sizes() {
        assert!(matches!(layout(VolumeParams { volume_size: 64, ..VolumeParams::default() }, 16), Err(RerarError::Config(_))));
        assert!(matches!(layout(VolumeParams::default(), 0), Err(RerarError::Config(_))));
        let wide = SetLayout::resolve(&VolumeParams::default(), "\u{4e2d}.bin", "x", 10, &noon());
        assert!(matches!(wide, Err(RerarError::Config(_))));
    }

    #[test]
    fn part_naming_past_one_letter() {
        let l = layout(VolumeParams { volume_size: 100, ..VolumeParams::default() }, 21 * 102).unwrap();
        assert_eq!(l.capacity, 21);
        assert_eq!(l.vol_count, 102);
        assert_eq!(l.naming, NamingScheme::PartN);
        assert_ne!(l.main_header(0).flags & MAIN_NEW_NUMBERING, 0);
    }

    #[test]
    fn recovery_counts_by_position() {
        let p = VolumeParams { volume_size: 1200, recovery: true, ..VolumeParams::default() };
        let l = layout(p, 2048).unwrap();
        assert_eq!(l.rr_max, Some(2));
        assert_eq!(l.capacity, 41);
        assert_eq!(l.vol_count, 50);
        for n in 0..49 {
            let plan = l.plan_volume(n);
            assert_eq!(plan.rr_count, Some(2));
            assert_eq!(plan.size, 1200);
        }
        // 39 bytes of data leave a single-sector region
        assert_eq!(l.plan_volume(49).rr_count, Some(1));
    }

    #[test]
    fn per_slice_crcs() {
        let p = VolumeParams { volume_size: 250, data_crc_scope: DataCrcScope::PerSlice, ..VolumeParams::default() };
        let l = layout(p, 400).unwrap();
        let slices = [1, 2, 3];
        assert_eq!(l.data_crc(0, &slices, 9), 1);
        assert_eq!(l.data_crc(2, &slices, 9), 9);
    }

    proptest! {
        #[test]
        fn slices_cover_the_payload(payload in 1u64..200_000, volume_size in 120u64..20_000, rr in any::<bool>()) {
            let p = VolumeParams { volume_size, recovery: rr, ..VolumeParams::default() };
            let Ok(l) = layout(p, payload) else { return Ok(()); };
            let total: u64 = (0..l.vol_count).map(|n| l.slice_len(n)).sum();
            prop_assert_eq!(total, payload);
            prop_assert!(l.slice_len(l.vol_count - 1) > 0);
            for n in 0..l.vol_count.saturating_sub(1) {
                prop_assert_eq!(l.slice_len(n), l.capacity);
                prop_assert!(l.plan_volume(n).size <= volume_size);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn plan_matches_writer(
            payload in 1usize..6_000,
            volume_size in 300u64..3_000,
            rar2 in any::<bool>(),
            rr in any::<bool>(),
            xtime in any::<bool>(),
        ) {
            use crate::io_stream::VolumeWriter;
            use std::io::Cursor;

            let version = if rar2 { FormatVersion::Rar2 } else { FormatVersion::Rar3 };
            let p = VolumeParams { volume_size, version, recovery: rr, extended_time: xtime, ..VolumeParams::default() };
            let Ok(l) = layout(p, payload as u64) else { return Ok(()); };
            let data = vec![0xC3u8; payload];

            for n in 0..l.vol_count {
                let mut w = VolumeWriter::new(Cursor::new(Vec::new()));
                w.write_signature().unwrap();
                w.write_main(l.main_header(n)).unwrap();
                let start = l.slice_offset(n) as usize;
                w.write_file(l.file_header(n, 0), &mut Cursor::new(&data[start..])).unwrap();
                if let Some(count) = l.rr_count_for(n, w.position()) {
                    w.write_recovery(version, l.params.host_os, count).unwrap();
                }
                if let Some(end) = l.end_header(n) {
                    w.write_end(end).unwrap();
                }
                let (_, digest) = w.finish().unwrap();
                prop_assert_eq!(digest.size, l.plan_volume(n).size);
            }
        }
    }
}
