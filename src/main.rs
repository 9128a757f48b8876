//! Main entry point for the zipspy CLI application.
//!
//! Resolves the archive location to a backend, indexes the archive once and
//! dispatches to `list` or `extract`.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use zipspy::cli::{Command, ExtractArgs, ListArgs};
use zipspy::copy::build_separator;
use zipspy::io::SourceRegistry;
use zipspy::zip::{ArchiveIndex, Entry, ZipExtractor, missing_names};
use zipspy::{Cli, Error};

/// Application entry point.
///
/// Any error propagates out of `main`, which prints it and exits with a
/// non-zero status.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let location = cli.location()?;
    let registry = SourceRegistry::with_defaults(
        cli.http_options(),
        cli.s3_endpoint.clone(),
        cli.s3_region.clone(),
    );
    let source = registry
        .resolve(location)
        .await
        .with_context(|| format!("failed to initialize provider for {location}"))?;

    let index = ArchiveIndex::open(Arc::clone(&source))
        .await
        .with_context(|| format!("failed to read zip archive at {location}"))?
        .with_crc_check(!cli.no_verify);
    info!(
        "{}: {} entries, central directory of {} bytes",
        location,
        index.len(),
        index.central_directory_size()
    );

    match &cli.command {
        Command::List(args) => list_files(&index, args).await?,
        Command::Extract(args) => extract_files(Arc::new(index), args, cli.jobs as usize).await?,
    }

    // Display network transfer statistics for remote sources
    if let Some(transferred) = source.transferred_bytes() {
        info!("Total bytes transferred: {}", format_size(transferred));
    }

    Ok(())
}

/// Output target: the named file, or stdout.
async fn open_output(path: Option<&std::path::Path>) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    Ok(match path {
        Some(path) => Box::new(
            File::create(path)
                .await
                .with_context(|| format!("failed to open file (name: {})", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    })
}

/// List the entries of the archive.
///
/// Supports two output formats:
/// - Names, each followed by the separator
/// - Long format (`-l`): a table with size, compression ratio and timestamps
async fn list_files(index: &ArchiveIndex, args: &ListArgs) -> Result<()> {
    let separator = build_separator(&args.separator, args.no_newlines);
    let mut out = BufWriter::new(open_output(args.out.as_deref()).await?);

    let entries: Vec<&Entry> = match &args.pattern {
        Some(pattern) => index.pattern_match(pattern),
        None => index.all_entries().iter().collect(),
    };
    // Skip directory names (e.g. "my/dir/") unless asked for
    let entries = entries
        .into_iter()
        .filter(|e| args.include_directory_names || !e.is_directory);

    if args.long {
        out.write_all(format_long_listing(entries).as_bytes()).await?;
    } else {
        for entry in entries {
            out.write_all(entry.name.as_bytes()).await?;
            out.write_all(separator.as_bytes()).await?;
        }
    }

    out.flush().await?;
    Ok(())
}

/// Detailed table of entries with a totals line.
fn format_long_listing<'a>(entries: impl Iterator<Item = &'a Entry>) -> String {
    let mut table = format!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name\n{}\n",
        "Length",
        "Size",
        "Cmpr",
        "Date",
        "Time",
        "-".repeat(70)
    );

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        table.push_str(&format!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}\n",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.name
        ));

        if !entry.is_directory {
            total_uncompressed = total_uncompressed.saturating_add(entry.uncompressed_size);
            total_compressed = total_compressed.saturating_add(entry.compressed_size);
            file_count += 1;
        }
    }

    table.push_str(&format!(
        "{}\n{:>10}  {:>10}  {}  {:>21}  {} files\n",
        "-".repeat(70),
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    ));
    table
}

/// Compression ratio as percentage saved.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    let saved = if uncompressed > 0 && compressed <= uncompressed {
        100 - (compressed as u128 * 100 / uncompressed as u128)
    } else {
        0
    };
    format!("{:>4}%", saved)
}

/// Extract the selected entries.
///
/// One `--out` per `--file` writes each file to its own destination;
/// otherwise everything is merged, in archive order, into stdout or the
/// single `--out` file.
async fn extract_files(index: Arc<ArchiveIndex>, args: &ExtractArgs, jobs: usize) -> Result<()> {
    args.validate()?;

    let selected: Vec<&Entry> = if args.all {
        index.all_entries().iter().collect()
    } else {
        index.select(&args.files, args.pattern.as_ref())
    };

    if !args.all && !args.files.is_empty() {
        let found = index.exact_match(&args.files);
        let missing = missing_names(&args.files, &found);
        if !missing.is_empty() {
            if args.is_fan_out() {
                return Err(Error::NotFound(format!(
                    "number of input files must match number of found files in order to write to multiple files; missing: {}",
                    missing.join(", ")
                ))
                .into());
            }
            warn!(
                "number of input files does not match number of found files (input: {}) (found: {}); missing: {}",
                args.files.len(),
                found.len(),
                missing.join(", ")
            );
        }
    }

    let separator = build_separator(&args.separator, args.no_newlines);
    let extractor = ZipExtractor::new(Arc::clone(&index)).with_jobs(jobs);

    if args.is_fan_out() {
        let mut targets = Vec::with_capacity(args.files.len());
        for (name, path) in args.files.iter().zip(&args.out) {
            let entry = index.find(name)?;
            if entry.is_directory {
                warn!("skipping directory {}", entry.name);
                continue;
            }
            targets.push((entry.clone(), path.clone()));
        }
        extractor
            .extract_each(targets, separator.as_bytes())
            .await
            .context("failed writing contents to file")?;
        return Ok(());
    }

    // Directories have no content to write
    let entries: Vec<Entry> = selected
        .into_iter()
        .filter(|e| !e.is_directory)
        .cloned()
        .collect();

    let mut out = BufWriter::new(open_output(args.out.first().map(|p| p.as_path())).await?);
    extractor
        .extract_merged(&entries, &mut out, separator.as_bytes())
        .await
        .context("failed writing contents")?;
    out.shutdown().await?;
    Ok(())
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
