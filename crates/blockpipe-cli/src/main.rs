//! blockpipe CLI - inspect, dump and copy raw or split media
//!
//! Every command treats its segment arguments as one combined stream, in the
//! order given, so split images (`disk.001`, `disk.002`, ...) read as a
//! single disk.

use anyhow::{bail, Context, Result};
use blockpipe_core::{read_full, validate_allocation_size, MediaStream, DEFAULT_ALIGNMENT, MAX_SCRATCH_SIZE};
use blockpipe_pipeline::{
    AlignedStream, AlignedStreamOptions, BoundedAlignedSegment, ForwardReader, MmapMedium,
    SegmentedStream,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type Medium = Box<dyn MediaStream>;

const ROW_WIDTH: usize = 16;

#[derive(Parser)]
#[command(name = "blockpipe")]
#[command(about = "Inspect, dump and copy raw or split media")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Open segments through a read-only memory map
    #[arg(long, global = true)]
    mmap: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show the combined length and where each segment sits
    Info {
        /// Segment files, in order
        #[arg(required = true)]
        segments: Vec<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Hex dump a range, printing the physical position of every row
    Dump {
        /// Segment files, in order
        #[arg(required = true)]
        segments: Vec<PathBuf>,

        /// First byte to dump (decimal or 0x hex)
        #[arg(long, default_value = "0", value_parser = parse_number)]
        offset: u64,

        /// Number of bytes to dump
        #[arg(long, default_value = "256", value_parser = parse_number)]
        length: u64,

        /// Block size for reads from the combined stream
        #[arg(long, default_value_t = DEFAULT_ALIGNMENT)]
        alignment: usize,

        /// Only look at START:MAX of the combined stream
        #[arg(long, value_parser = parse_window)]
        window: Option<Window>,
    },

    /// Copy the concatenated segments into one file using aligned writes
    Copy {
        /// Segment files, in order
        #[arg(required = true)]
        segments: Vec<PathBuf>,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        /// Block size for writes to the destination
        #[arg(long, default_value_t = DEFAULT_ALIGNMENT)]
        alignment: usize,

        /// Bytes moved per read, also the destination growth step
        #[arg(long, default_value = "1048576", value_parser = parse_number)]
        block_size: u64,
    },
}

/// A `START:MAX` window of the combined stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: u64,
    max: u64,
}

fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_window(s: &str) -> std::result::Result<Window, String> {
    let (start, max) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:MAX, got '{}'", s))?;
    Ok(Window {
        start: parse_number(start)?,
        max: parse_number(max)?,
    })
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_medium(path: &Path, mmap: bool) -> io::Result<Medium> {
    if mmap {
        Ok(Box::new(MmapMedium::open(path)?))
    } else {
        Ok(Box::new(File::open(path)?))
    }
}

/// Join the segments read-only; empty files are skipped
fn open_segments(paths: &[PathBuf], mmap: bool) -> Result<(SegmentedStream<Medium>, Vec<PathBuf>)> {
    let mut joined = SegmentedStream::read_only(Vec::new())?;
    let mut used = Vec::with_capacity(paths.len());

    for path in paths {
        let mut medium = open_medium(path, mmap)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        if medium.length()? == 0 {
            warn!(path = %path.display(), "skipping empty segment");
            continue;
        }
        joined
            .add_stream(medium)
            .with_context(|| format!("Failed to add segment {}", path.display()))?;
        used.push(path.clone());
    }

    debug!(segments = used.len(), length = joined.len(), "segments joined");
    Ok((joined, used))
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1_048_576 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else if bytes < 1_073_741_824 {
        format!("{:.2} MiB", bytes as f64 / 1_048_576.0)
    } else {
        format!("{:.2} GiB", bytes as f64 / 1_073_741_824.0)
    }
}

fn format_row(logical: u64, physical: u64, bytes: &[u8]) -> String {
    let hex = bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ");
    let ascii: String = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    format!(
        "{:010x}  @{:010x}  {:<width$}  |{}|",
        logical,
        physical,
        hex,
        ascii,
        width = ROW_WIDTH * 3 - 1
    )
}

fn cmd_info(paths: &[PathBuf], mmap: bool, as_json: bool, out: &mut impl Write) -> Result<()> {
    let (joined, used) = open_segments(paths, mmap)?;
    let bounds = joined.bounds();

    if as_json {
        let segments: Vec<_> = bounds
            .iter()
            .zip(&used)
            .map(|(b, path)| {
                json!({
                    "path": path.display().to_string(),
                    "index": b.index,
                    "start": b.start,
                    "end": b.end,
                })
            })
            .collect();
        let report = json!({ "length": joined.len(), "segments": segments });
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
        return Ok(());
    }

    writeln!(out, "=== Combined Stream ===")?;
    writeln!(
        out,
        "Length:   {} bytes ({})",
        joined.len(),
        format_bytes(joined.len())
    )?;
    writeln!(out, "Segments: {}", joined.component_count())?;
    writeln!(out)?;
    writeln!(out, "{:<5} {:<15} {:<15} {:<12} {}", "Index", "Start", "End", "Size", "Path")?;
    writeln!(out, "{}", "-".repeat(72))?;
    for (b, path) in bounds.iter().zip(&used) {
        writeln!(
            out,
            "{:<5} {:<15} {:<15} {:<12} {}",
            b.index,
            b.start,
            b.end,
            format_bytes(b.end - b.start),
            path.display()
        )?;
    }
    Ok(())
}

fn cmd_dump(
    paths: &[PathBuf],
    mmap: bool,
    offset: u64,
    length: u64,
    alignment: usize,
    window: Option<Window>,
    out: &mut impl Write,
) -> Result<()> {
    let (joined, _) = open_segments(paths, mmap)?;
    let base: Medium = match window {
        Some(w) => Box::new(
            BoundedAlignedSegment::new(joined, w.start, w.max).context("Failed to open window")?,
        ),
        None => Box::new(joined),
    };
    let mut reader = AlignedStream::new(base, alignment)?;
    reader.seek(SeekFrom::Start(offset))?;

    let mut remaining = length;
    let mut row = [0u8; ROW_WIDTH];
    while remaining > 0 {
        let logical = reader.position();
        let physical = reader.physical_or_raw_position()?;
        let want = remaining.min(ROW_WIDTH as u64) as usize;
        let n = read_full(&mut reader, &mut row[..want])?;
        if n == 0 {
            break;
        }
        writeln!(out, "{}", format_row(logical, physical, &row[..n]))?;
        remaining -= n as u64;
    }

    if remaining > 0 {
        info!(short = remaining, "range ends past the end of the stream");
    }
    Ok(())
}

fn cmd_copy(
    paths: &[PathBuf],
    mmap: bool,
    output: &Path,
    alignment: usize,
    block_size: u64,
) -> Result<u64> {
    if block_size == 0 {
        bail!("Block size must be greater than zero");
    }
    let block_size = validate_allocation_size(block_size, MAX_SCRATCH_SIZE, "Copy block")?;

    let sources = paths.to_vec();
    let mut reader = ForwardReader::from_fallible(sources.into_iter().map(move |path| {
        debug!(path = %path.display(), "opening segment");
        open_medium(&path, mmap)
    }));

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let options = AlignedStreamOptions::default()
        .with_alignment(alignment)
        .with_grow_interval(block_size as u64);
    let mut writer = AlignedStream::with_options(file, options)?;

    let mut block = vec![0u8; block_size];
    let mut total = 0u64;
    loop {
        let n = read_full(&mut reader, &mut block).context("Failed to read segments")?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&block[..n])
            .with_context(|| format!("Failed to write at offset {}", total))?;
        total += n as u64;
    }

    // Growth rounds up to whole blocks; trim to what was copied
    let file = writer.into_inner();
    file.set_len(total)?;
    file.sync_all()?;

    info!(
        bytes = total,
        segments = reader.components_opened(),
        output = %output.display(),
        "copy complete"
    );
    Ok(total)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Command::Info { segments, json } => cmd_info(&segments, cli.mmap, json, &mut out)?,
        Command::Dump {
            segments,
            offset,
            length,
            alignment,
            window,
        } => cmd_dump(&segments, cli.mmap, offset, length, alignment, window, &mut out)?,
        Command::Copy {
            segments,
            output,
            alignment,
            block_size,
        } => {
            let total = cmd_copy(&segments, cli.mmap, &output, alignment, block_size)?;
            writeln!(out, "Copied {} ({} bytes) to {}", format_bytes(total), total, output.display())?;
        }
    }

    Ok(())
}
