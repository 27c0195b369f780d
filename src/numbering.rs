//! Volume file names.
//!
//! `NumericSuffix`: `base.rar`, then `base.r00`..`base.r99`, `base.s00`..,
//! continuing through `z`, `a`, ... `q`.
//!
//! `PartN`: `base.part1.rar`, ..., zero padded to the width of the volume
//! count.

use serde::{Deserialize, Serialize};

/// First letters of the numeric-suffix extensions, in order.
const SUFFIX_LETTERS: &[u8; 26] = b"rstuvwxyzabcdefghijklmnopq";
const PER_LETTER: usize = 100;

/// Most volumes the numeric-suffix scheme can name.
pub const MAX_NUMERIC_VOLUMES: usize = 1 + SUFFIX_LETTERS.len() * PER_LETTER;

/// Sets up to this size fit `.rar` plus `.r00`..`.r99`.
const SINGLE_LETTER_VOLUMES: usize = 1 + PER_LETTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingScheme {
    NumericSuffix,
    PartN,
}

impl NamingScheme {
    /// `PartN` only once `.r99` would be exceeded.
    pub fn select(vol_count: usize) -> Self {
        if vol_count > SINGLE_LETTER_VOLUMES { Self::PartN } else { Self::NumericSuffix }
    }

    /// Whether the Main block carries the new-numbering flag.
    pub fn new_numbering(self) -> bool {
        self == Self::PartN
    }

    pub fn extension(self, ordinal: usize, digits: usize) -> Option<String> {
        match self {
            Self::PartN => Some(format!("part{:0digits$}.rar", ordinal + 1)),
            Self::NumericSuffix => {
                if ordinal == 0 {
                    return Some("rar".to_owned());
                }
                let n = ordinal - 1;
                let letter = *SUFFIX_LETTERS.get(n / PER_LETTER)?;
                Some(format!("{}{:02}", char::from(letter), n % PER_LETTER))
            }
        }
    }

    /// Abbreviated listings show these volumes.
    pub fn is_interesting(self, ordinal: usize) -> bool {
        if ordinal == 0 {
            return true;
        }
        match self {
            Self::PartN => false,
            Self::NumericSuffix => matches!((ordinal - 1) % PER_LETTER, 0 | 99),
        }
    }
}

/// Decimal digits needed to print `count`.
pub fn digit_width(count: usize) -> usize {
    count.max(1).ilog10() as usize + 1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeName {
    pub ordinal: usize,
    pub name:    String,
    scheme:      NamingScheme,
}

impl VolumeName {
    pub fn is_interesting(&self) -> bool {
        self.scheme.is_interesting(self.ordinal)
    }
}

/// Yields names for ordinals 0, 1, ... until the scheme runs out.
#[derive(Debug, Clone)]
pub struct VolumeNames {
    base:   String,
    scheme: NamingScheme,
    digits: usize,
    next:   usize,
}

impl VolumeNames {
    pub fn new(base: impl Into<String>, scheme: NamingScheme, vol_count: usize) -> Self {
        Self { base: base.into(), scheme, digits: digit_width(vol_count), next: 0 }
    }
}

impl Iterator for VolumeNames {
    type Item = VolumeName;

    fn next(&mut self) -> Option<VolumeName> {
        let ext = self.scheme.extension(self.next, self.digits)?;
        let name = VolumeName {
            ordinal: self.next,
            name:    format!("{}.{}", self.base, ext),
            scheme:  self.scheme,
        };
        self.next += 1;
        Some(name)
    }
}

/// Strips `.rar`, `.partN.rar` or `.r00`-style extensions from a volume
/// file name.  Anything else is returned unchanged.
pub fn strip_volume_suffix(file_name: &str) -> &str {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return file_name;
    };

    if ext.eq_ignore_ascii_case("rar") {
        if let Some((inner, part)) = stem.rsplit_once('.') {
            let digits = part.get(..4)
                .filter(|p| p.eq_ignore_ascii_case("part"))
                .and_then(|_| part.get(4..));
            if matches!(digits, Some(d) if !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit())) {
                return inner;
            }
        }
        return stem;
    }

    match ext.as_bytes() {
        [letter, d1, d2]
            if SUFFIX_LETTERS.contains(&letter.to_ascii_lowercase())
                && d1.is_ascii_digit() && d2.is_ascii_digit() => stem,
        _ => file_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(scheme: NamingScheme, count: usize) -> Vec<String> {
        VolumeNames::new("out", scheme, count).take(count).map(|v| v.name).collect()
    }

    #[test]
    fn numeric_sequence() {
        let all: Vec<String> = VolumeNames::new("out", NamingScheme::NumericSuffix, 0).map(|v| v.name).collect();
        assert_eq!(all.len(), MAX_NUMERIC_VOLUMES);
        assert_eq!(all[0], "out.rar");
        assert_eq!(all[1], "out.r00");
        assert_eq!(all[100], "out.r99");
        assert_eq!(all[101], "out.s00");
        assert_eq!(all[901], "out.a00");
        assert_eq!(all[MAX_NUMERIC_VOLUMES - 1], "out.q99");
    }

    #[test]
    fn part_sequence() {
        assert_eq!(names(NamingScheme::PartN, 3), ["out.part1.rar", "out.part2.rar", "out.part3.rar"]);
        let ten = names(NamingScheme::PartN, 10);
        assert_eq!(ten[0], "out.part01.rar");
        assert_eq!(ten[9], "out.part10.rar");
        assert_eq!(names(NamingScheme::PartN, 102)[101], "out.part102.rar");
    }

    #[test]
    fn selection_boundary() {
        assert_eq!(NamingScheme::select(1), NamingScheme::NumericSuffix);
        assert_eq!(NamingScheme::select(101), NamingScheme::NumericSuffix);
        assert_eq!(NamingScheme::select(102), NamingScheme::PartN);
    }

    #[test]
    fn widths() {
        assert_eq!(digit_width(1), 1);
        assert_eq!(digit_width(9), 1);
        assert_eq!(digit_width(10), 2);
        assert_eq!(digit_width(100), 3);
    }

    #[test]
    fn interesting_volumes() {
        let picked: Vec<usize> = (0..250).filter(|&n| NamingScheme::NumericSuffix.is_interesting(n)).collect();
        assert_eq!(picked, [0, 1, 100, 101, 200, 201]);
        assert!(NamingScheme::PartN.is_interesting(0));
        assert!(!NamingScheme::PartN.is_interesting(1));
    }

    #[test]
    fn strips_suffixes() {
        assert_eq!(strip_volume_suffix("grp-name.rar"), "grp-name");
        assert_eq!(strip_volume_suffix("grp-name.part01.rar"), "grp-name");
        assert_eq!(strip_volume_suffix("grp-name.PART7.RAR"), "grp-name");
        assert_eq!(strip_volume_suffix("grp-name.s42"), "grp-name");
        assert_eq!(strip_volume_suffix("grp.partial.rar"), "grp.partial");
        assert_eq!(strip_volume_suffix("grp-name.avi"), "grp-name.avi");
        assert_eq!(strip_volume_suffix("noext"), "noext");
    }
}
