//! Command-line surface and its merge with file configuration

use clap::{ArgAction, Parser};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::FileConfig;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::protocol::DEFAULT_SERVER;
use crate::session::ConnectOptions;

/// Command-line arguments
#[derive(Clone, Debug, Parser)]
#[command(
    author,
    version,
    about = "Archive files into a tar and stream it to a remote listener"
)]
pub struct Args {
    /// Server address (host:port) [default: 127.0.0.1:50001]
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Files or directories to archive; a quoted "a b c" list is split on whitespace
    #[arg(short = 'f', long, num_args = 1.., required = true)]
    pub files: Vec<String>,

    /// Directory the archive is written to [default: .]
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Delete the archive after the run
    #[arg(long)]
    pub cleanup: bool,

    /// Give up connecting after this many seconds (0 = wait forever)
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Fail a blocked send or receive after this many seconds (0 = wait forever)
    #[arg(long, value_name = "SECS")]
    pub io_timeout: Option<u64>,

    /// Print one line per chunk instead of a progress bar
    #[arg(long, conflicts_with = "quiet")]
    pub plain: bool,

    /// No progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Append timestamped events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// TOML file with defaults for the options above
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print usage
    #[arg(short = '?', long = "usage", action = ArgAction::Help)]
    pub usage: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Bar,
    Lines,
    Quiet,
}

/// Everything a run needs, after flags and config are merged and validated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub files: Vec<PathBuf>,
    pub archive_dir: PathBuf,
    pub cleanup: bool,
    pub connect: ConnectOptions,
    pub progress: ProgressMode,
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn resolve(&self, cfg: FileConfig) -> Result<Settings, Error> {
        let server = self
            .server
            .clone()
            .or(cfg.server)
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());
        let endpoint = Endpoint::parse(&server)?;

        let files = split_file_list(&self.files);
        if files.is_empty() {
            return Err(Error::NoInputFiles);
        }

        let progress = if self.quiet {
            ProgressMode::Quiet
        } else if self.plain || !std::io::stdout().is_terminal() {
            ProgressMode::Lines
        } else {
            ProgressMode::Bar
        };

        Ok(Settings {
            endpoint,
            files,
            archive_dir: self
                .archive_dir
                .clone()
                .or(cfg.archive_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            cleanup: self.cleanup || cfg.cleanup,
            connect: ConnectOptions {
                connect_timeout: self
                    .connect_timeout
                    .or(cfg.connect_timeout_secs)
                    .filter(|&secs| secs > 0)
                    .map(Duration::from_secs),
                io_timeout: self
                    .io_timeout
                    .or(cfg.io_timeout_secs)
                    .filter(|&secs| secs > 0)
                    .map(Duration::from_secs),
            },
            progress,
            log_file: self.log_file.clone().or(cfg.log_file),
        })
    }
}

pub fn split_file_list(values: &[String]) -> Vec<PathBuf> {
    values
        .iter()
        .flat_map(|v| v.split_whitespace())
        .map(PathBuf::from)
        .collect()
}
