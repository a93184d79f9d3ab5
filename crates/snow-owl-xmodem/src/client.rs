use std::fmt;
use std::fs::File;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::audit::AuditLogger;
use crate::buffer::ReceiveBuffer;
use crate::protocol::BlockSize;

/// Registry key of a connected client: the raw descriptor of its socket.
///
/// Descriptors are unique among open sockets, so the id stays stable for
/// as long as the client is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(RawFd);

impl ClientId {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn as_raw_fd(self) -> RawFd {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Where a client is in the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    AwaitingFilename,
    AwaitingBlockHeader,
    /// Header seen; waiting for the rest of a block of this size
    ReceivingBlock { size: BlockSize },
    Finished,
}

/// Outcome of a successful [`Client::step`](Client::step).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// More input is needed
    Continue,
    /// EOT acknowledged; the client should be evicted
    Complete,
}

/// Per-transfer counters, reported when the transfer completes.
#[derive(Debug, Clone)]
pub struct TransferStats {
    pub blocks: u64,
    pub bytes: u64,
    pub duplicates: u64,
    pub naks: u64,
    pub started: Instant,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            blocks: 0,
            bytes: 0,
            duplicates: 0,
            naks: 0,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// One connected sender and everything it owns.
///
/// Generic over the stream; the registry uses `TcpStream`.
#[derive(Debug)]
pub struct Client<S> {
    pub(crate) id: ClientId,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) stream: S,
    pub(crate) buffer: ReceiveBuffer,
    pub(crate) filename: Option<String>,
    pub(crate) output: Option<File>,
    pub(crate) state: ClientState,
    pub(crate) expected_block: u8,
    pub(crate) stats: TransferStats,
    pub(crate) correlation_id: String,
    pub(crate) audit: AuditLogger,
}

impl<S> Client<S> {
    pub fn new(id: ClientId, peer: Option<SocketAddr>, stream: S, audit: AuditLogger) -> Self {
        Self {
            id,
            peer,
            stream,
            buffer: ReceiveBuffer::new(),
            filename: None,
            output: None,
            state: ClientState::AwaitingFilename,
            expected_block: 1,
            stats: TransferStats::new(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            audit,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn expected_block(&self) -> u8 {
        self.expected_block
    }

    /// Block size announced by the header currently being received.
    pub fn block_size(&self) -> Option<BlockSize> {
        match self.state {
            ClientState::ReceivingBlock { size } => Some(size),
            _ => None,
        }
    }

    pub fn buffer(&self) -> &ReceiveBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Flush the output file to disk and give it up.
    ///
    /// The socket is released when the client itself is dropped.
    pub fn release(&mut self) -> std::io::Result<()> {
        match self.output.take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}
