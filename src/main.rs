use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rerar::archive::{payload_mtime, resolve_payload, Release, ReleaseOptions, ReleaseSummary};
use rerar::checksum::LineSeparator;
use rerar::codec::Timestamp;
use rerar::numbering::NamingScheme;
use rerar::params::{DataCrcScope, DictionarySize, EndFlags, FileAttributes, FormatVersion, HostOs, VolumeParams};
use rerar::reference::{parse_reference, ReferenceReport};
use rerar::RerarError;

#[derive(Parser)]
#[command(name = "rerar", version, about = "Rebuild stored multi-volume RAR sets around an extracted payload")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a volume set and its .sfv
    Create {
        /// Payload file, or the directory holding it
        payload: PathBuf,
        /// Output directory (the release directory goes below it in reference mode)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        #[command(flatten)]
        set: SetArgs,
        /// Allow writing into a non-empty output directory
        #[arg(long)]
        overwrite: bool,
    },
    /// Parse a reference volume and report what it says
    Inspect {
        reference: PathBuf,
        /// Dump the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show volume names and sizes without writing anything
    Plan {
        payload: PathBuf,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        #[command(flatten)]
        set: SetArgs,
    },
}

#[derive(Args)]
struct SetArgs {
    /// Read every volume setting from an existing volume
    #[arg(short, long)]
    reference: Option<PathBuf>,
    /// Go on despite problems found in the reference
    #[arg(long)]
    lenient: bool,
    /// Volume size in bytes (default 15000000)
    #[arg(short, long)]
    size: Option<u64>,
    /// Volume naming: auto (default), numeric, part
    #[arg(long)]
    naming: Option<String>,
    /// Old format 2 archives
    #[arg(long)]
    rar2: bool,
    /// Include recovery records
    #[arg(long)]
    recovery: bool,
    /// Set the lock flag
    #[arg(long)]
    lock: bool,
    /// Store the name in Unicode form
    #[arg(long)]
    unicode: bool,
    /// Record Unix as the host OS
    #[arg(long)]
    unix: bool,
    /// Normal rather than archive file attribute
    #[arg(long)]
    normal_attr: bool,
    /// Dictionary size in KiB (64-4096)
    #[arg(long)]
    dict: Option<u16>,
    /// End block fields: full (default), nonum, blank
    #[arg(long)]
    end: Option<String>,
    /// File CRC in split volumes: whole (default), slice
    #[arg(long)]
    crc_scope: Option<String>,
    /// Modification time, "YYYY-MM-DD HH:MM:SS[.fffffff]"
    #[arg(long)]
    time: Option<String>,
    /// Timestamp resolution: auto (default), dos, full
    #[arg(long)]
    time_precision: Option<String>,
    /// Name stored inside the set
    #[arg(long)]
    internal: Option<String>,
    /// Output name stem
    #[arg(long)]
    base: Option<String>,
    /// .sfv line ending: crlf (default), lf, crcrlf
    #[arg(long, default_value = "crlf")]
    line_sep: String,
    /// Text placed at the top of the .sfv
    #[arg(long)]
    sfv_head: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { payload, output, set, overwrite } => {
            let release = build_release(&set, &payload, &output, overwrite, false)?;
            print_summary(&release.run()?, false);
        }

        // ── Plan ─────────────────────────────────────────────────────────────
        Commands::Plan { payload, output, set } => {
            let release = build_release(&set, &payload, &output, false, true)?;
            println!("Number of volumes: {}", release.layout().vol_count);
            print_summary(&release.run()?, true);
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { reference, json } => {
            let report = parse_reference(&reference)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn build_release(set: &SetArgs, payload: &Path, output: &Path, overwrite: bool, dry_run: bool) -> Result<Release, RerarError> {
    let separator = LineSeparator::from_name(&set.line_sep)
        .ok_or_else(|| RerarError::config(format!("unknown line separator {:?}", set.line_sep)))?;
    let options = ReleaseOptions {
        line_separator:    separator,
        checksum_preamble: set.sfv_head.clone().unwrap_or_default(),
        overwrite,
        dry_run,
    };

    if let Some(reference) = &set.reference {
        if set.time.is_some() || set.time_precision.is_some() || set.recovery || set.unicode || set.lock {
            return Err(RerarError::config(
                "reference mode is not compatible with the time, recovery, unicode and lock options"));
        }
        let mut report = parse_reference(reference)?;
        apply_overrides(set, &mut report.params)?;
        return Release::from_reference(&report, set.lenient, payload, output, options);
    }

    let mut params = VolumeParams {
        recovery:     set.recovery,
        lock:         set.lock,
        unicode_name: set.unicode,
        ..VolumeParams::default()
    };
    apply_overrides(set, &mut params)?;

    let mtime = match &set.time {
        Some(text) => parse_time(text)?,
        None => {
            let file = resolve_payload(payload, params.internal_name.as_deref())?;
            payload_mtime(&std::fs::metadata(file)?)?
        }
    };
    params.extended_time = match set.time_precision.as_deref().unwrap_or("auto") {
        "auto" => Timestamp::needs_extended(&mtime),
        "dos"  => false,
        "full" => true,
        other  => return Err(RerarError::config(format!("unknown time precision {other:?}"))),
    };
    params.timestamp = Some(mtime);

    Release::new(&params, payload, output, options)
}

/// Settings that may also adjust a reference's parameters.
fn apply_overrides(set: &SetArgs, params: &mut VolumeParams) -> Result<(), RerarError> {
    if let Some(size) = set.size {
        params.volume_size = size;
    }
    if let Some(naming) = &set.naming {
        params.naming = match naming.as_str() {
            "auto"    => None,
            "numeric" => Some(NamingScheme::NumericSuffix),
            "part"    => Some(NamingScheme::PartN),
            other     => return Err(RerarError::config(format!("unknown naming scheme {other:?}"))),
        };
    }
    if set.rar2 {
        params.version = FormatVersion::Rar2;
    }
    if set.unix {
        params.host_os = HostOs::Unix;
    }
    if set.normal_attr {
        params.attributes = FileAttributes::Normal;
    }
    if let Some(kib) = set.dict {
        params.dictionary = Some(DictionarySize::new(kib)?);
    }
    if let Some(end) = &set.end {
        params.end_flags = match end.as_str() {
            "full"  => EndFlags::FULL,
            "nonum" => EndFlags::NO_VOLUME_NUMBER,
            "blank" => EndFlags::BLANK,
            other   => return Err(RerarError::config(format!("unknown end block mode {other:?}"))),
        };
    }
    if let Some(scope) = &set.crc_scope {
        params.data_crc_scope = match scope.as_str() {
            "whole" => DataCrcScope::WholePayload,
            "slice" => DataCrcScope::PerSlice,
            other   => return Err(RerarError::config(format!("unknown CRC scope {other:?}"))),
        };
    }
    if let Some(name) = &set.internal {
        params.internal_name = Some(name.clone());
    }
    if let Some(base) = &set.base {
        params.base_name = Some(base.clone());
    }
    Ok(())
}

fn parse_time(text: &str) -> Result<NaiveDateTime, RerarError> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| RerarError::config(format!("bad time {text:?}: {e}")))
}

fn print_summary(summary: &ReleaseSummary, abbreviate: bool) {
    let mut skipped = false;
    for vol in &summary.volumes {
        if abbreviate && !vol.interesting {
            if !skipped {
                println!(". . .");
                skipped = true;
            }
            continue;
        }
        skipped = false;
        match vol.crc {
            Some(crc) => println!("{}: Size: {} CRC: {:08X}", vol.name, fmt_size(vol.size), crc),
            None      => println!("{}: Size: {}", vol.name, fmt_size(vol.size)),
        }
    }
    println!("{}: Size: {}", summary.checksum_name, fmt_size(summary.checksum_size));
    println!("Total release size: {}", fmt_size(summary.total_size));
}

fn print_report(report: &ReferenceReport) {
    let p = &report.params;
    println!("── Reference volume ─────────────────────────────────────");
    println!("  Path           {}", report.path.display());
    if let Some(name) = &report.release_name {
        println!("  Release        {name}");
    }
    println!("  Format         {}", p.version.number());
    println!("  Volume size    {}", fmt_size(report.volume_size));
    if p.volume_size != report.volume_size {
        println!("  Nominal size   {}", fmt_size(p.volume_size));
    }
    match report.ordinal {
        Some(n) => println!("  Volume number  {n}"),
        None    => println!("  First volume   {}", report.is_first),
    }
    println!("  Last volume    {}", report.is_last);
    println!("  Internal name  {}", p.internal_name.as_deref().unwrap_or(""));
    println!("  Payload size   {}", fmt_size(report.payload_size));
    if let Some(crc) = report.expected_payload_crc {
        println!("  Payload CRC    {crc:08X}");
    }
    if let Some(t) = p.timestamp {
        println!("  Time           {}", t.format("%Y-%m-%d %H:%M:%S%.f"));
    }
    println!("  Naming         {:?}", p.naming.unwrap_or(NamingScheme::NumericSuffix));
    println!("  Dictionary     {} KiB", p.dictionary().kib());
    println!("  Host OS        {:?}", p.host_os);
    println!("  Attributes     {:?}", p.attributes);
    println!("  Recovery       {}", p.recovery);
    println!("  Lock           {}", p.lock);
    println!("  Unicode name   {}", p.unicode_name);
    println!("  Extended time  {}", p.extended_time);
    println!("  End flags      {:?}", p.end_flags);
    println!("  File CRC scope {:?}", p.data_crc_scope);
    if report.diagnostics.is_empty() {
        println!("  No problems found");
    } else {
        println!("  Problems ({}):", report.diagnostics.len());
        for d in &report.diagnostics {
            println!("    {d}");
        }
    }
}

/// `N (x.xxx KiB)` style, growing the unit with the size.
fn fmt_size(size: u64) -> String {
    if size < 1024 {
        return size.to_string();
    }
    let mut scaled = size;
    let mut unit = 'K';
    if size >= 1024 << 10 {
        for prefix in "MGTPEZY".chars() {
            scaled >>= 10;
            unit = prefix;
            if scaled < 1024 << 10 {
                break;
            }
        }
    }
    format!("{size} ({:.3} {unit}iB)", scaled as f64 / 1024.0)
}
