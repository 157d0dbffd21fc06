use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::archive::Artifact;
use crate::endpoint::Endpoint;

pub trait Logger: Send + Sync {
    fn archived(&self, _artifact: &Artifact, _inputs: usize) {}
    fn connected(&self, _endpoint: &Endpoint) {}
    fn body_sent(&self, _name: &str, _bytes: u64, _sha256: &str) {}
    fn response(&self, _text: &str, _truncated: bool) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn done(&self, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn archived(&self, artifact: &Artifact, inputs: usize) {
        self.line(&format!(
            "ARCHIVE name={} path={} inputs={} entries={} bytes={}",
            artifact.name,
            artifact.path.display(),
            inputs,
            artifact.entries,
            artifact.size
        ));
    }
    fn connected(&self, endpoint: &Endpoint) {
        self.line(&format!("CONNECT server={}", endpoint));
    }
    fn body_sent(&self, name: &str, bytes: u64, sha256: &str) {
        self.line(&format!("SENT name={name} bytes={bytes} sha256={sha256}"));
    }
    fn response(&self, text: &str, truncated: bool) {
        self.line(&format!("RESPONSE truncated={} text={:?}", truncated, text));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn done(&self, bytes: u64, seconds: f64) {
        self.line(&format!("DONE bytes={bytes} seconds={seconds:.3}"));
    }
}
