//! High-level [`Release`] API: one payload in, a volume set plus its
//! checksum list out.
//!
//! ```no_run
//! use std::path::Path;
//! use rerar::archive::{Release, ReleaseOptions};
//! use rerar::params::VolumeParams;
//!
//! // From explicit parameters
//! let params = VolumeParams { volume_size: 50_000_000, ..VolumeParams::default() };
//! let release = Release::new(&params, Path::new("movie.mkv"), Path::new("out"), ReleaseOptions::default())?;
//! release.write()?;
//!
//! // From a surviving volume of the original set
//! let report = rerar::reference::parse_reference(Path::new("old/grp-movie.r17"))?;
//! let release = Release::from_reference(&report, false, Path::new("movie.mkv"), Path::new("new"), ReleaseOptions::default())?;
//! release.write()?;
//! # Ok::<(), rerar::RerarError>(())
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};

use crate::checksum::{ChecksumList, LineSeparator};
use crate::consts::{BLOCK_HEADER_SIZE, COPY_BUF_SIZE, FILE_CRC_POS, MAIN_HDR_SIZE, SIGNATURE};
use crate::crc::{combine, crc32_stream};
use crate::error::{RerarError, Result};
use crate::io_stream::{VolumeDigest, VolumeWriter};
use crate::layout::SetLayout;
use crate::numbering::VolumeName;
use crate::params::VolumeParams;
use crate::reference::ReferenceReport;

// ── ReleaseOptions ────────────────────────────────────────────────────────────

/// Output-side settings that do not affect volume contents.
#[derive(Debug, Clone, Default)]
pub struct ReleaseOptions {
    pub line_separator:    LineSeparator,
    /// Free text placed ahead of the checksum entries.
    pub checksum_preamble: String,
    /// Write into an output directory that already has files in it.
    pub overwrite:         bool,
    /// [`Release::run`] only plans.
    pub dry_run:           bool,
}

// ── Summaries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSummary {
    pub ordinal:     usize,
    pub name:        String,
    pub size:        u64,
    /// `None` in a dry run.
    pub crc:         Option<u32>,
    /// Shown in abbreviated listings.
    pub interesting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub output_dir:    PathBuf,
    pub volumes:       Vec<VolumeSummary>,
    pub checksum_name: String,
    pub checksum_size: u64,
    /// Volumes plus checksum list.
    pub total_size:    u64,
    pub payload_crc:   Option<u32>,
}

// ── Release ───────────────────────────────────────────────────────────────────

pub struct Release {
    layout:               SetLayout,
    payload:              PathBuf,
    output_dir:           PathBuf,
    options:              ReleaseOptions,
    expected_payload_crc: Option<u32>,
}

impl Release {
    pub fn new(params: &VolumeParams, payload: &Path, output_dir: &Path, options: ReleaseOptions) -> Result<Self> {
        params.validate()?;
        let payload = resolve_payload(payload, params.internal_name.as_deref())?;
        let meta = fs::metadata(&payload)?;

        let internal_name = match &params.internal_name {
            Some(name) => name.clone(),
            None => payload.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| RerarError::config(format!("{} has no file name", payload.display())))?,
        };
        let base_name = match &params.base_name {
            Some(base) => base.clone(),
            None => Path::new(&internal_name).file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| RerarError::config(format!("cannot derive a base name from {internal_name:?}")))?,
        };
        let mtime = match params.timestamp {
            Some(t) => t,
            None => payload_mtime(&meta)?,
        };

        let layout = SetLayout::resolve(params, &internal_name, &base_name, meta.len(), &mtime)?;
        info!(payload = %payload.display(), size = meta.len(), volumes = layout.vol_count, "release planned");

        Ok(Self {
            layout,
            payload,
            output_dir: output_dir.to_path_buf(),
            options,
            expected_payload_crc: None,
        })
    }

    /// Regenerates the set `report` came from.  Output goes to the
    /// reference's release directory name under `output_root`, when it
    /// has one.
    pub fn from_reference(
        report:      &ReferenceReport,
        lenient:     bool,
        payload:     &Path,
        output_root: &Path,
        options:     ReleaseOptions,
    ) -> Result<Self> {
        let params = report.to_params(lenient)?;
        let output_dir = match &report.release_name {
            Some(name) => output_root.join(name),
            None       => output_root.to_path_buf(),
        };
        let mut release = Self::new(&params, payload, &output_dir, options)?;
        if release.layout.payload_size != report.payload_size {
            return Err(RerarError::config(format!(
                "payload is {} bytes but the reference describes {}",
                release.layout.payload_size, report.payload_size)));
        }
        release.expected_payload_crc = report.expected_payload_crc;
        Ok(release)
    }

    pub fn layout(&self) -> &SetLayout {
        &self.layout
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Plans or writes, per [`ReleaseOptions::dry_run`].
    pub fn run(&self) -> Result<ReleaseSummary> {
        if self.options.dry_run { Ok(self.plan()) } else { self.write() }
    }

    fn checksum_list(&self) -> ChecksumList {
        ChecksumList::new(self.options.line_separator).with_preamble(&self.options.checksum_preamble)
    }

    fn is_interesting(&self, name: &VolumeName) -> bool {
        name.is_interesting() || name.ordinal + 2 >= self.layout.vol_count
    }

    /// Every size, without touching the output directory.
    pub fn plan(&self) -> ReleaseSummary {
        let mut list = self.checksum_list();
        let volumes: Vec<VolumeSummary> = self.layout.names()
            .take(self.layout.vol_count)
            .map(|v| {
                list.add(v.name.clone(), 0);
                VolumeSummary {
                    ordinal:     v.ordinal,
                    size:        self.layout.plan_volume(v.ordinal).size,
                    crc:         None,
                    interesting: self.is_interesting(&v),
                    name:        v.name,
                }
            })
            .collect();
        let checksum_size = list.rendered_len();
        let total_size = volumes.iter().map(|v| v.size).sum::<u64>() + checksum_size;

        ReleaseSummary {
            output_dir: self.output_dir.clone(),
            volumes,
            checksum_name: self.layout.checksum_name(),
            checksum_size,
            total_size,
            payload_crc: None,
        }
    }

    pub fn write(&self) -> Result<ReleaseSummary> {
        self.prepare_output_dir()?;

        let mut payload = BufReader::with_capacity(COPY_BUF_SIZE, File::open(&self.payload)?);
        let (slices, whole) = self.scan_payload(&mut payload)?;
        if let Some(expected) = self.expected_payload_crc {
            if expected != whole {
                return Err(RerarError::integrity(
                    SIGNATURE.len() as u64 + MAIN_HDR_SIZE + BLOCK_HEADER_SIZE as u64 + FILE_CRC_POS,
                    format!("payload CRC 0x{whole:08X} differs from the reference's 0x{expected:08X}")));
            }
        }
        payload.seek(SeekFrom::Start(0))?;

        let mut list = self.checksum_list();
        let mut volumes = Vec::with_capacity(self.layout.vol_count);
        for name in self.layout.names().take(self.layout.vol_count) {
            let n = name.ordinal;
            let path = self.output_dir.join(&name.name);
            let digest = self.write_volume(n, &path, &mut payload, &slices, whole)
                .map_err(RerarError::volume(n))?;

            let planned = self.layout.plan_volume(n).size;
            if digest.size != planned {
                return Err(RerarError::Assembly {
                    ordinal: n,
                    message: format!("{} is {} bytes, planned {planned}", name.name, digest.size),
                });
            }

            info!(volume = %name.name, size = digest.size, crc = format_args!("{:08X}", digest.crc), "volume written");
            list.add(name.name.clone(), digest.crc);
            volumes.push(VolumeSummary {
                ordinal:     n,
                interesting: self.is_interesting(&name),
                name:        name.name,
                size:        digest.size,
                crc:         Some(digest.crc),
            });
        }

        let checksum_name = self.layout.checksum_name();
        let checksum_size = list.write_to(&self.output_dir.join(&checksum_name))?;
        let total_size = volumes.iter().map(|v| v.size).sum::<u64>() + checksum_size;
        info!(checksum = %checksum_name, total_size, "release written");

        Ok(ReleaseSummary {
            output_dir: self.output_dir.clone(),
            volumes,
            checksum_name,
            checksum_size,
            total_size,
            payload_crc: Some(whole),
        })
    }

    fn prepare_output_dir(&self) -> Result<()> {
        let dir = &self.output_dir;
        if dir.is_dir() {
            let occupied = fs::read_dir(dir)?.next().is_some();
            if occupied && !self.options.overwrite {
                return Err(RerarError::config(format!(
                    "output directory {} is not empty", dir.display())));
            }
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    /// Per-slice CRCs in one pass, and the whole-payload CRC folded from them.
    fn scan_payload<R: Read>(&self, payload: &mut R) -> Result<(Vec<u32>, u32)> {
        let mut slices = Vec::with_capacity(self.layout.vol_count);
        let mut whole = 0;
        for n in 0..self.layout.vol_count {
            let len = self.layout.slice_len(n);
            let crc = crc32_stream(payload, len)?;
            whole = if n == 0 { crc } else { combine(whole, crc, len) };
            slices.push(crc);
        }
        debug!(payload_crc = format_args!("{whole:08X}"), "payload scanned");
        Ok((slices, whole))
    }

    fn write_volume<R: Read>(
        &self,
        ordinal: usize,
        path:    &Path,
        payload: &mut R,
        slices:  &[u32],
        whole:   u32,
    ) -> io::Result<VolumeDigest> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        let layout = &self.layout;

        let mut w = VolumeWriter::new(file);
        w.write_signature()?;
        w.write_main(layout.main_header(ordinal))?;
        w.write_file(layout.file_header(ordinal, layout.data_crc(ordinal, slices, whole)), payload)?;
        if let Some(rr_count) = layout.rr_count_for(ordinal, w.position()) {
            w.write_recovery(layout.version(), layout.params.host_os, rr_count)?;
        }
        if let Some(end) = layout.end_header(ordinal) {
            w.write_end(end)?;
        }
        let (_, digest) = w.finish()?;
        Ok(digest)
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// A directory payload names the file `internal_name` inside it.
pub fn resolve_payload(payload: &Path, internal_name: Option<&str>) -> Result<PathBuf> {
    if !payload.is_dir() {
        return Ok(payload.to_path_buf());
    }
    let name = internal_name.ok_or_else(|| RerarError::config(format!(
        "{} is a directory and no internal name is known", payload.display())))?;
    Ok(payload.join(name))
}

/// Local modification time of a file, as archivers record it.
pub fn payload_mtime(meta: &fs::Metadata) -> Result<NaiveDateTime> {
    let modified = meta.modified()?;
    Ok(DateTime::<Local>::from(modified).naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numbering::NamingScheme;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn params(volume_size: u64) -> VolumeParams {
        VolumeParams {
            volume_size,
            timestamp: NaiveDate::from_ymd_opt(2010, 1, 2).unwrap().and_hms_opt(3, 4, 6),
            ..VolumeParams::default()
        }
    }

    fn payload(dir: &TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("out.bin");
        fs::write(&path, (0..len).map(|i| (i * 13 + 1) as u8).collect::<Vec<u8>>()).unwrap();
        path
    }

    #[test]
    fn plan_matches_write() {
        let tmp = TempDir::new().unwrap();
        let src = payload(&tmp, 1000);
        let release = Release::new(&params(250), &src, &tmp.path().join("rls"), ReleaseOptions::default()).unwrap();
        let plan = release.plan();
        let done = release.write().unwrap();

        assert_eq!(plan.volumes.len(), 6);
        assert_eq!(plan.checksum_size, done.checksum_size);
        assert_eq!(plan.total_size, done.total_size);
        for (p, d) in plan.volumes.iter().zip(&done.volumes) {
            assert_eq!((&p.name, p.size), (&d.name, d.size));
            assert_eq!(fs::metadata(tmp.path().join("rls").join(&d.name)).unwrap().len(), d.size);
        }
        assert_eq!(done.payload_crc, Some(crate::crc::crc32(&fs::read(&src).unwrap())));
    }

    #[test]
    fn refuses_occupied_directory() {
        let tmp = TempDir::new().unwrap();
        let src = payload(&tmp, 100);
        let release = Release::new(&params(250), &src, tmp.path(), ReleaseOptions::default()).unwrap();
        assert!(matches!(release.write(), Err(RerarError::Config(_))));

        let opts = ReleaseOptions { overwrite: true, ..ReleaseOptions::default() };
        let release = Release::new(&params(250), &src, tmp.path(), opts).unwrap();
        assert_eq!(release.write().unwrap().volumes.len(), 1);
    }

    #[test]
    fn directory_payload_uses_internal_name() {
        let tmp = TempDir::new().unwrap();
        payload(&tmp, 100);
        let p = VolumeParams { internal_name: Some("out.bin".into()), ..params(250) };
        let release = Release::new(&p, tmp.path(), &tmp.path().join("rls"), ReleaseOptions::default()).unwrap();
        assert_eq!(release.layout().payload_size, 100);
        assert!(Release::new(&params(250), tmp.path(), tmp.path(), ReleaseOptions::default()).is_err());
    }

    #[test]
    fn interesting_volumes_include_the_tail() {
        let tmp = TempDir::new().unwrap();
        let src = payload(&tmp, 171 * 5);
        let release = Release::new(&params(250), &src, tmp.path(), ReleaseOptions::default()).unwrap();
        assert_eq!(release.layout().naming, NamingScheme::NumericSuffix);
        let picked: Vec<usize> = release.plan().volumes.iter().filter(|v| v.interesting).map(|v| v.ordinal).collect();
        assert_eq!(picked, [0, 1, 3, 4]);
    }
}
