//! Optional TOML defaults, overridden by command-line flags

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: Option<String>,
    pub archive_dir: Option<PathBuf>,
    pub cleanup: bool,
    pub connect_timeout_secs: Option<u64>,
    pub io_timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("archsend");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("archsend");
    }
    PathBuf::from(".archsend")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("archsend.toml")
}

/// Explicit paths must exist; the default location is optional.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    match explicit {
        Some(p) => {
            let data = std::fs::read_to_string(p)
                .with_context(|| format!("read config {}", p.display()))?;
            parse(&data).with_context(|| format!("parse config {}", p.display()))
        }
        None => match std::fs::read_to_string(default_config_path()) {
            Ok(data) => parse(&data).context("parse default config"),
            Err(_) => Ok(FileConfig::default()),
        },
    }
}

pub fn parse(data: &str) -> Result<FileConfig> {
    Ok(toml::from_str(data)?)
}
