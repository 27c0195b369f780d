use crate::consts::{MAIN_HDR_SIZE, SIGNATURE};
use crate::params::FormatVersion;
use crate::recovery;

/// Size bookkeeping for one volume, step for step with
/// [`VolumeWriter`](super::VolumeWriter) but without any I/O.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DryVolume {
    size: u64,
}

impl DryVolume {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn signature(&mut self) {
        self.size += SIGNATURE.len() as u64;
    }

    pub fn main(&mut self) {
        self.size += MAIN_HDR_SIZE;
    }

    pub fn file(&mut self, header_size: u64, packed: u64) {
        self.size += header_size + packed;
    }

    /// Protects everything counted so far.
    pub fn recovery(&mut self, version: FormatVersion, rr_count: u32) {
        self.size += recovery::block_size(version, self.size, rr_count);
    }

    pub fn end(&mut self, end_size: u64) {
        self.size += end_size;
    }
}
