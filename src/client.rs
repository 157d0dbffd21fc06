//! Client pipeline: archive the inputs, then push the archive to the server

use std::time::{Duration, Instant};

use crate::archive::{ArchiveBuilder, Artifact};
use crate::cli::{ProgressMode, Settings};
use crate::error::Error;
use crate::logger::Logger;
use crate::progress::{BarProgress, LineProgress, NoProgress, ProgressObserver};
use crate::session::{SessionReport, TransferSession};

#[derive(Debug)]
pub struct Outcome {
    pub artifact: Artifact,
    pub report: SessionReport,
    pub elapsed: Duration,
}

pub fn send_files(settings: &Settings, logger: &dyn Logger) -> Result<Outcome, Error> {
    let start = Instant::now();

    let display: Vec<_> = settings.files.iter().map(|p| p.display().to_string()).collect();
    let artifact = ArchiveBuilder::new(&settings.archive_dir)
        .build(&settings.files)
        .inspect_err(|e| logger.error("archive", &e.to_string()))?;
    println!(
        "Archived {} file(s) [{}] into {} ({} bytes)",
        settings.files.len(),
        display.join(", "),
        artifact.name,
        artifact.size
    );
    logger.archived(&artifact, settings.files.len());

    let result = push(settings, &artifact, logger);

    if settings.cleanup {
        if let Err(e) = artifact.remove() {
            eprintln!("Warning: could not remove {}: {}", artifact.path.display(), e);
        }
    }

    let report = result.inspect_err(|e| logger.error("transfer", &e.to_string()))?;
    let elapsed = start.elapsed();
    logger.done(report.body.bytes, elapsed.as_secs_f64());
    Ok(Outcome {
        artifact,
        report,
        elapsed,
    })
}

fn push(settings: &Settings, artifact: &Artifact, logger: &dyn Logger) -> Result<SessionReport, Error> {
    let request = artifact.request()?;

    let mut session = TransferSession::open(&settings.endpoint, &settings.connect)?;
    match session.peer_addr() {
        Some(peer) => println!("Connected to server at {} ({})", settings.endpoint, peer),
        None => println!("Connected to server at {}", settings.endpoint),
    }
    logger.connected(&settings.endpoint);

    let mut progress: Box<dyn ProgressObserver> = match settings.progress {
        ProgressMode::Bar => Box::new(BarProgress::new(request.archive_size)),
        ProgressMode::Lines => Box::new(LineProgress),
        ProgressMode::Quiet => Box::new(NoProgress),
    };
    let result = session.run(&request, &artifact.path, progress.as_mut());
    drop(progress);
    session.close();
    let report = result?;

    println!("Sent archive '{}'", request.archive_name);
    logger.body_sent(&request.archive_name, report.body.bytes, &report.body.sha256);
    logger.response(&report.response.text, report.response.truncated);
    if report.response.truncated {
        eprintln!("Warning: server response filled the read buffer and may be truncated");
    }
    Ok(report)
}
