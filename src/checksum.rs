//! The `.sfv` checksum list written next to a volume set.
//!
//! One `<name> <crc>` line per volume, names sorted, CRCs as eight
//! lowercase hex digits.  An optional preamble precedes the entries.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{decode_latin1, encode_latin1};
use crate::error::{RerarError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineSeparator {
    Lf,
    #[default]
    CrLf,
    CrCrLf,
}

impl LineSeparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf     => "\n",
            Self::CrLf   => "\r\n",
            Self::CrCrLf => "\r\r\n",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lf"     => Some(Self::Lf),
            "crlf"   => Some(Self::CrLf),
            "crcrlf" => Some(Self::CrCrLf),
            _        => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChecksumList {
    entries:   BTreeMap<String, u32>,
    preamble:  String,
    separator: LineSeparator,
}

impl ChecksumList {
    pub fn new(separator: LineSeparator) -> Self {
        Self { separator, ..Self::default() }
    }

    /// Free text written before the entries.  A missing final newline is
    /// added; every LF becomes the list's line separator on output.
    pub fn with_preamble(mut self, preamble: &str) -> Self {
        self.preamble = preamble.to_owned();
        if !self.preamble.is_empty() && !self.preamble.ends_with('\n') {
            self.preamble.push('\n');
        }
        self
    }

    pub fn add(&mut self, name: impl Into<String>, crc: u32) {
        self.entries.insert(name.into(), crc);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), *c))
    }

    /// File contents, ISO-8859-1 encoded.
    pub fn render(&self) -> Result<Vec<u8>> {
        let sep = self.separator.as_str();
        let mut text = self.preamble.replace('\n', sep);
        for (name, crc) in &self.entries {
            text.push_str(name);
            text.push(' ');
            text.push_str(&hex::encode(crc.to_be_bytes()));
            text.push_str(sep);
        }
        encode_latin1(&text).map_err(|e| RerarError::config(e.to_string()))
    }

    /// Size of [`render`](Self::render) without building it.
    pub fn rendered_len(&self) -> u64 {
        let sep = self.separator.as_str().len();
        let preamble = self.preamble.chars().count() + self.preamble.matches('\n').count() * (sep - 1);
        let entries: usize = self.entries.keys().map(|n| n.chars().count() + 1 + 8 + sep).sum();
        (preamble + entries) as u64
    }

    /// Writes the list and returns its size.
    pub fn write_to(&self, path: &Path) -> Result<u64> {
        let bytes = self.render()?;
        fs::write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Reads `name crc` entries back, skipping blank and `;` comment lines.
    /// Lines that do not end in eight hex digits are ignored.
    pub fn parse(bytes: &[u8]) -> Vec<(String, u32)> {
        decode_latin1(bytes)
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty() && !l.starts_with(';'))
            .filter_map(|l| {
                let (name, crc) = l.rsplit_once(' ')?;
                if crc.len() != 8 {
                    return None;
                }
                let crc = u32::from_str_radix(crc, 16).ok()?;
                Some((name.to_owned(), crc))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sep: LineSeparator) -> ChecksumList {
        let mut list = ChecksumList::new(sep);
        list.add("out.r00", 0xDEADBEEF);
        list.add("out.rar", 0x0000_00AB);
        list
    }

    #[test]
    fn crcrlf_with_preamble() {
        let list = sample(LineSeparator::CrCrLf).with_preamble("hello\n");
        let text = list.render().unwrap();
        assert_eq!(text, b"hello\r\r\nout.r00 deadbeef\r\r\nout.rar 000000ab\r\r\n");
        assert_eq!(list.rendered_len(), text.len() as u64);
    }

    #[test]
    fn names_are_sorted() {
        let mut list = ChecksumList::new(LineSeparator::Lf);
        list.add("b.rar", 2);
        list.add("a.r00", 1);
        list.add("a.rar", 3);
        let names: Vec<&str> = list.entries().map(|(n, _)| n).collect();
        assert_eq!(names, ["a.r00", "a.rar", "b.rar"]);
    }

    #[test]
    fn preamble_gets_a_newline() {
        let list = ChecksumList::new(LineSeparator::CrLf).with_preamble("; made by hand");
        assert_eq!(list.render().unwrap(), b"; made by hand\r\n");
        assert_eq!(list.rendered_len(), 16);
    }

    #[test]
    fn latin1_names() {
        let mut list = ChecksumList::new(LineSeparator::Lf);
        list.add("caf\u{e9}.rar", 1);
        let bytes = list.render().unwrap();
        assert_eq!(bytes[3], 0xE9);
        assert_eq!(list.rendered_len(), bytes.len() as u64);

        let mut wide = ChecksumList::new(LineSeparator::Lf);
        wide.add("\u{4e2d}.rar", 1);
        assert!(matches!(wide.render(), Err(RerarError::Config(_))));
    }

    #[test]
    fn parses_back() {
        let list = sample(LineSeparator::CrLf).with_preamble("; header\n\n");
        let parsed = ChecksumList::parse(&list.render().unwrap());
        assert_eq!(parsed, [("out.r00".to_owned(), 0xDEADBEEF), ("out.rar".to_owned(), 0xAB)]);
    }

    #[test]
    fn separator_names() {
        assert_eq!(LineSeparator::from_name("CRCRLF"), Some(LineSeparator::CrCrLf));
        assert_eq!(LineSeparator::from_name("lf"), Some(LineSeparator::Lf));
        assert_eq!(LineSeparator::from_name("cr"), None);
        assert_eq!(LineSeparator::default(), LineSeparator::CrLf);
    }
}
