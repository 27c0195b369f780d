//! The parameter record that fully describes a volume set.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::consts::*;
use crate::error::{RerarError, Result};
use crate::numbering::NamingScheme;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    Rar2,
    #[default]
    Rar3,
}

impl FormatVersion {
    pub fn number(self) -> u8 {
        match self {
            Self::Rar2 => 2,
            Self::Rar3 => 3,
        }
    }

    /// Format 2 sets carry no End block and no first-volume flag.
    pub fn has_end_block(self) -> bool {
        self == Self::Rar3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    #[default]
    Windows,
    Unix,
}

impl HostOs {
    pub fn code(self) -> u8 {
        match self {
            Self::Windows => OS_WIN32,
            Self::Unix    => OS_UNIX,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            OS_WIN32 => Some(Self::Windows),
            OS_UNIX  => Some(Self::Unix),
            _        => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAttributes {
    #[default]
    Archive,
    Normal,
}

impl FileAttributes {
    pub fn value(self) -> u32 {
        match self {
            Self::Archive => ATTR_ARCHIVE,
            Self::Normal  => ATTR_NORMAL,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            ATTR_ARCHIVE => Some(Self::Archive),
            ATTR_NORMAL  => Some(Self::Normal),
            _            => None,
        }
    }
}

/// What the File-block data CRC covers on volumes that continue onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataCrcScope {
    /// Every volume stores the CRC of the whole payload.
    #[default]
    WholePayload,
    /// Split-after volumes store the CRC of their own slice; the last
    /// volume stores the whole-payload CRC.
    PerSlice,
}

/// Optional End-block fields.  `NEXT_VOLUME` is derived per volume and is
/// not part of this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndFlags {
    pub data_crc:   bool,
    pub rev_space:  bool,
    pub vol_number: bool,
}

impl EndFlags {
    pub const FULL: Self = Self { data_crc: true, rev_space: true, vol_number: true };
    pub const NO_VOLUME_NUMBER: Self = Self { data_crc: true, rev_space: true, vol_number: false };
    pub const BLANK: Self = Self { data_crc: false, rev_space: false, vol_number: false };

    pub fn bits(self) -> u16 {
        let mut bits = 0;
        if self.data_crc { bits |= END_DATA_CRC; }
        if self.rev_space { bits |= END_REV_SPACE; }
        if self.vol_number { bits |= END_VOL_NUMBER; }
        bits
    }

    pub fn from_bits(bits: u16) -> Self {
        Self {
            data_crc:   bits & END_DATA_CRC != 0,
            rev_space:  bits & END_REV_SPACE != 0,
            vol_number: bits & END_VOL_NUMBER != 0,
        }
    }

    /// One of the three combinations archivers actually write.
    pub fn is_preset(self) -> bool {
        self == Self::FULL || self == Self::NO_VOLUME_NUMBER || self == Self::BLANK
    }
}

impl Default for EndFlags {
    fn default() -> Self {
        Self::FULL
    }
}

/// Dictionary size in KiB: a power of two from 64 to 4096.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct DictionarySize(u16);

impl DictionarySize {
    pub fn new(kib: u16) -> Result<Self> {
        if !(DICT_MIN_KIB..=DICT_MAX_KIB).contains(&kib) {
            return Err(RerarError::config(format!(
                "dictionary size {kib} out of {DICT_MIN_KIB}-{DICT_MAX_KIB} range")));
        }
        if !kib.is_power_of_two() {
            return Err(RerarError::config(format!("dictionary size {kib} is not a power of two")));
        }
        Ok(Self(kib))
    }

    pub fn default_for(version: FormatVersion) -> Self {
        match version {
            FormatVersion::Rar2 => Self(256),
            FormatVersion::Rar3 => Self(4096),
        }
    }

    /// Codes 0..=6; 7 would mean a directory.
    pub fn from_code(code: u16) -> Option<Self> {
        (code < FILE_DICT_DIRECTORY).then(|| Self(DICT_MIN_KIB << code))
    }

    pub fn kib(self) -> u16 {
        self.0
    }

    pub fn code(self) -> u16 {
        (self.0 / DICT_MIN_KIB).trailing_zeros() as u16
    }

    /// The code placed in File-block flag bits 5..8.
    pub fn flag_bits(self) -> u16 {
        self.code() << FILE_DICT_SHIFT
    }
}

impl TryFrom<u16> for DictionarySize {
    type Error = RerarError;

    fn try_from(kib: u16) -> Result<Self> {
        Self::new(kib)
    }
}

impl From<DictionarySize> for u16 {
    fn from(d: DictionarySize) -> u16 {
        d.0
    }
}

/// Everything needed to synthesise a set, besides the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeParams {
    pub version:        FormatVersion,
    /// `None` picks by volume count.
    pub naming:         Option<NamingScheme>,
    pub host_os:        HostOs,
    /// `None` uses the format default.
    pub dictionary:     Option<DictionarySize>,
    pub recovery:       bool,
    pub lock:           bool,
    pub unicode_name:   bool,
    pub extended_time:  bool,
    pub attributes:     FileAttributes,
    /// Ignored for format 2.
    pub end_flags:      EndFlags,
    /// Modification time to record; `None` takes the payload's.
    pub timestamp:      Option<NaiveDateTime>,
    /// Nominal size of every volume but the last.
    pub volume_size:    u64,
    pub data_crc_scope: DataCrcScope,
    /// Name stored inside the set; defaults to the payload's file name.
    pub internal_name:  Option<String>,
    /// Output name stem; defaults to the internal name without extension.
    pub base_name:      Option<String>,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            version:        FormatVersion::default(),
            naming:         None,
            host_os:        HostOs::default(),
            dictionary:     None,
            recovery:       false,
            lock:           false,
            unicode_name:   false,
            extended_time:  false,
            attributes:     FileAttributes::default(),
            end_flags:      EndFlags::default(),
            timestamp:      None,
            volume_size:    DEFAULT_VOLUME_SIZE,
            data_crc_scope: DataCrcScope::default(),
            internal_name:  None,
            base_name:      None,
        }
    }
}

impl VolumeParams {
    pub fn dictionary(&self) -> DictionarySize {
        self.dictionary.unwrap_or_else(|| DictionarySize::default_for(self.version))
    }

    /// End flags as they will be written, none for format 2.
    pub fn effective_end_flags(&self) -> Option<EndFlags> {
        self.version.has_end_block().then_some(self.end_flags)
    }

    /// Cheap checks that need no payload.  Capacity is checked once the
    /// name and payload size are known.
    pub fn validate(&self) -> Result<()> {
        if let Some(dict) = self.dictionary {
            DictionarySize::new(dict.kib())?;
        }
        if self.volume_size == 0 {
            return Err(RerarError::config("volume size must be positive"));
        }
        if self.internal_name.as_deref() == Some("") {
            return Err(RerarError::config("internal name is empty"));
        }
        match self.base_name.as_deref() {
            Some("") => Err(RerarError::config("base name is empty")),
            Some(b) if b.contains(['/', '\\']) => {
                Err(RerarError::config(format!("base name {b:?} contains a path separator")))
            }
            _ => Ok(()),
        }
    }
}
