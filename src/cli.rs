use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use regex::Regex;

use crate::io::HttpOptions;

#[derive(Parser, Debug)]
#[command(name = "zipspy")]
#[command(version)]
#[command(about = "Interface with remote ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipspy list --location file://archive.zip\n  \
  zipspy extract --location s3://bucket/archive.zip -f plan.txt\n  \
  zipspy extract --location https://example.com/a.zip -f a.txt -f b.txt --separator '---'\n  \
  zipspy extract --location file://archive.zip -f a.txt -o a.out -f b.txt -o b.out")]
pub struct Cli {
    /// Protocol and address of the ZIP archive ("file://archive.zip", "https://host/archive.zip", "s3://<bucket>/archive.zip")
    #[arg(long, global = true, env = "ZIPSPY_LOCATION", value_name = "URI")]
    pub location: Option<String>,

    /// Global log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true, default_value = "warn", value_name = "LEVEL")]
    pub verbosity: LevelFilter,

    /// Use development settings (log at debug level or finer)
    #[arg(long, global = true)]
    pub development: bool,

    /// Number of entries fetched concurrently
    #[arg(long, global = true, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: u16,

    /// Skip CRC32 verification of extracted content
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// S3-compatible endpoint for s3:// locations (path-style addressing)
    #[arg(long, global = true, env = "ZIPSPY_S3_ENDPOINT", value_name = "URL")]
    pub s3_endpoint: Option<String>,

    /// Region used to build AWS S3 URLs
    #[arg(long, global = true, env = "AWS_REGION", value_name = "REGION")]
    pub s3_region: Option<String>,

    /// Attempts for remote range requests failing to connect or timing out
    #[arg(long, global = true, default_value_t = 10)]
    pub max_retries: u32,

    /// Remote request timeout in seconds
    #[arg(long, global = true, default_value_t = 30, value_name = "SECS")]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all file names from a zip archive
    List(ListArgs),
    /// Extract one or more files from the zip archive
    #[command(long_about = "Downloads the specified files from the zip archive.\n\n\
        By default the contents are written to stdout, each followed by a newline\n\
        (or by the --separator wrapped in newlines). With a single --out all\n\
        contents go to that file; with one --out per --file each file is written\n\
        to its own destination.")]
    Extract(ExtractArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Name of a file to write output to
    #[arg(short = 'o', long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Include the names of directories
    #[arg(long)]
    pub include_directory_names: bool,

    /// Only list names matching this regular expression
    #[arg(long, value_name = "REGEX", value_parser = Regex::new)]
    pub pattern: Option<Regex>,

    /// Separator written after each name
    #[arg(long, default_value = "")]
    pub separator: String,

    /// Omit the newlines around the separator
    #[arg(long)]
    pub no_newlines: bool,

    /// Show sizes, compression ratio and timestamps (one entry per line)
    #[arg(short = 'l', long)]
    pub long: bool,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Names of the files to extract (e.g. plan.txt, path/to/plan.txt)
    #[arg(short = 'f', long = "file", value_name = "NAME", value_delimiter = ',')]
    pub files: Vec<String>,

    /// Also extract entries whose name matches this regular expression
    #[arg(long, value_name = "REGEX", value_parser = Regex::new)]
    pub pattern: Option<Regex>,

    /// Extract every file in the archive
    #[arg(long)]
    pub all: bool,

    /// File(s) to write output to: one for everything, or one per --file
    #[arg(short = 'o', long = "out", value_name = "FILE", value_delimiter = ',')]
    pub out: Vec<PathBuf>,

    /// Separator written after each file's contents
    #[arg(long, default_value = "")]
    pub separator: String,

    /// Omit the newlines around the separator
    #[arg(long)]
    pub no_newlines: bool,
}

impl Cli {
    pub fn location(&self) -> Result<&str> {
        match self.location.as_deref() {
            Some(location) if !location.is_empty() => Ok(location),
            _ => bail!("--location must be given and not empty"),
        }
    }

    /// Level after applying `--development`.
    pub fn log_level(&self) -> LevelFilter {
        if self.development {
            self.verbosity.max(LevelFilter::Debug)
        } else {
            self.verbosity
        }
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            timeout: Duration::from_secs(self.timeout),
            max_retries: self.max_retries,
        }
    }
}

impl ExtractArgs {
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() && self.pattern.is_none() && !self.all {
            bail!("at least one --file must be specified, or use --pattern or --all");
        }
        if self.out.len() > 1 {
            if self.out.len() != self.files.len() {
                bail!("one output file must be specified for each --file, or use a single output file");
            }
            if self.all || self.pattern.is_some() {
                bail!("multiple output files can only be paired with --file names");
            }
        }
        Ok(())
    }

    /// Whether each requested file goes to its own output.
    pub fn is_fan_out(&self) -> bool {
        self.out.len() > 1
    }
}
