//! Progress reporting for the body upload
//!
//! The session reports `(sent, total)` after every chunk; what happens with
//! it is up to the observer picked by the CLI.

use indicatif::{ProgressBar, ProgressStyle};

pub trait ProgressObserver {
    fn on_progress(&mut self, sent: u64, total: u64);
    fn finish(&mut self) {}
}

/// Discards observations (`--quiet`)
pub struct NoProgress;
impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _sent: u64, _total: u64) {}
}

/// One console line per chunk: `Sent 4096/10240 bytes`
pub struct LineProgress;
impl ProgressObserver for LineProgress {
    fn on_progress(&mut self, sent: u64, total: u64) {
        println!("Sent {}/{} bytes", sent, total);
    }
}

/// Terminal byte bar
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl ProgressObserver for BarProgress {
    fn on_progress(&mut self, sent: u64, total: u64) {
        if self.bar.length() != Some(total) {
            self.bar.set_length(total);
        }
        self.bar.set_position(sent);
    }

    fn finish(&mut self) {
        self.bar.finish();
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

/// Records every observation
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingProgress {
    pub events: Vec<(u64, u64)>,
    pub finished: bool,
}

#[cfg(test)]
impl ProgressObserver for RecordingProgress {
    fn on_progress(&mut self, sent: u64, total: u64) {
        self.events.push((sent, total));
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}
