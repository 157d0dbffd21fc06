//! Wire format for the archive transfer
//!
//! Client -> server:
//!   `<archive name>\n<decimal size>\n` followed by exactly `size` raw bytes,
//!   then a write-side half-close.
//! Server -> client:
//!   one text status line, read once into a bounded buffer.

use std::io::{self, BufRead};

use crate::error::Error;

pub const DEFAULT_SERVER: &str = "127.0.0.1:50001";

// Body read/write chunk; bounds memory, has no bearing on the wire format
pub const CHUNK_SIZE: usize = 4096;

// Single-read bound for the server response
pub const RESPONSE_LIMIT: usize = 1024;

// Longest size line a receiver should accept ("18446744073709551615\n")
pub const MAX_SIZE_LINE: usize = 21;

/// What the header announces: the archive's base name and its exact length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub archive_name: String,
    pub archive_size: u64,
}

impl TransferRequest {
    pub fn new(archive_name: impl Into<String>, archive_size: u64) -> Result<Self, Error> {
        let archive_name = archive_name.into();
        if archive_name.is_empty()
            || archive_name.contains(['\n', '\r'])
            || archive_name.contains(['/', '\\'])
        {
            return Err(Error::InvalidArchiveName(archive_name));
        }
        Ok(Self {
            archive_name,
            archive_size,
        })
    }

    /// Header bytes: two newline-terminated lines, no escaping.
    pub fn encode_header(&self) -> Vec<u8> {
        format!("{}\n{}\n", self.archive_name, self.archive_size).into_bytes()
    }
}

/// Read a header by delimiter the way a conforming receiver does.
/// Leaves the reader positioned at the first body byte.
pub fn read_header<R: BufRead>(reader: &mut R) -> io::Result<TransferRequest> {
    let name = read_line(reader)?;
    let size_line = read_line(reader)?;
    if size_line.len() > MAX_SIZE_LINE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "size line too long"));
    }
    let archive_size = size_line
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad size: {e}")))?;
    Ok(TransferRequest {
        archive_name: name,
        archive_size,
    })
}

fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf)?;
    if buf.pop() != Some(b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "header line not terminated",
        ));
    }
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
