//! Archsend library
//!
//! Packs local files into a tar archive and streams it to a remote listener
//! with a two-line text header, a write-side half-close and a one-shot reply.

pub mod archive;
pub mod cli;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logger;
pub mod progress;
pub mod protocol;
pub mod session;

pub use error::{Error, ErrorKind, Result};
