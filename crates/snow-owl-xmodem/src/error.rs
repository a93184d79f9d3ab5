use thiserror::Error;

use crate::client::ClientId;

/// Server-level errors.
///
/// Only `Readiness` and `Release` escape the registry loop; everything a
/// single client can cause is a [`ClientError`] and ends in eviction.
#[derive(Error, Debug)]
pub enum XmodemError {
    #[error("XMODEM error: {0}")]
    Xmodem(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Readiness wait failed: {0}")]
    Readiness(#[from] nix::errno::Errno),

    #[error("Failed to release resources of client {client}: {source}")]
    Release {
        client: ClientId,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, XmodemError>;

/// Reasons a single client is evicted.
///
/// NIST 800-53 Controls:
/// - SI-10: Information Input Validation (framing and sequence checks)
/// - SC-5: Denial of Service Protection (bounded buffers)
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("peer disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read of {requested} bytes would overflow buffer ({buffered}/{capacity} in use)")]
    BufferOverflow {
        buffered: usize,
        requested: usize,
        capacity: usize,
    },

    #[error("no filename terminator within {0} bytes")]
    FilenameTooLong(usize),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("path traversal attempt: {0}")]
    PathTraversal(String),

    #[error("filename already being written: {0}")]
    FilenameInUse(String),

    #[error("cannot open {filename}: {source}")]
    Storage {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("block number {number} does not match inverse {inverse}")]
    BlockNumberMismatch { number: u8, inverse: u8 },

    #[error("unexpected block {number} (expected {expected})")]
    UnexpectedBlock { number: u8, expected: u8 },

    #[error("block of {buffered} bytes exceeds frame length {expected}")]
    OversizedBlock { buffered: usize, expected: usize },
}

impl ClientError {
    /// True when the client broke protocol rules, as opposed to going away
    /// or hitting an I/O failure.
    pub fn is_violation(&self) -> bool {
        !matches!(
            self,
            ClientError::Disconnected | ClientError::Io(_) | ClientError::Storage { .. }
        )
    }
}
