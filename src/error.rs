//! Error types for archiving and transfer.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::session::SessionState;

/// Stage of the transfer session an I/O failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Header,
    Body,
    Shutdown,
    Response,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Header => "send header",
            Stage::Body => "send body",
            Stage::Shutdown => "half-close",
            Stage::Response => "read response",
        };
        f.write_str(s)
    }
}

/// Broad failure class, used for reporting and the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Archive,
    Connection,
    Transfer,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Argument => "argument",
            ErrorKind::Archive => "archive",
            ErrorKind::Connection => "connection",
            ErrorKind::Transfer => "transfer",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Argument => 2,
            _ => 1,
        }
    }
}

/// Errors produced while building or sending an archive.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid server address {input:?}: {reason} (use host:port)")]
    InvalidEndpoint { input: String, reason: &'static str },

    #[error("no files to archive")]
    NoInputFiles,

    #[error("archive name {0:?} cannot be sent in a line-based header")]
    InvalidArchiveName(String),

    #[error("archiving {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("connect {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("{stage} failed: {source}")]
    Transfer {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("header declared {declared} bytes but the body carried {sent}")]
    SizeMismatch { declared: u64, sent: u64 },

    #[error("server closed the connection without a response")]
    NoResponse,

    #[error("cannot {op} while session is {state:?}")]
    InvalidState { op: &'static str, state: SessionState },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidEndpoint { .. } | Error::NoInputFiles | Error::InvalidArchiveName(_) => {
                ErrorKind::Argument
            }
            Error::Archive { .. } => ErrorKind::Archive,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Transfer { .. }
            | Error::SizeMismatch { .. }
            | Error::NoResponse
            | Error::InvalidState { .. } => ErrorKind::Transfer,
        }
    }

    pub(crate) fn transfer(stage: Stage, source: io::Error) -> Self {
        Error::Transfer { stage, source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
