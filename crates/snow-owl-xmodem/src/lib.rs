//! Snow-Owl XMODEM receiving server
//!
//! Accepts many concurrent TCP senders on a single thread. Each sender
//! names a file, then streams CRC-16 checked blocks of 128 (SOH) or 1024
//! (STX) bytes until EOT. Verified payload, with SUB padding removed, is
//! written under the configured root directory.
//!
//! ```text
//! sender                          server
//!   "report.txt\r\n"      ->
//!                         <-      'C'
//!   SOH 01 FE <128> crc   ->
//!                         <-      ACK   (NAK on CRC mismatch)
//!   EOT                   ->
//!                         <-      ACK, connection closed
//! ```
//!
//! Framing or sequencing violations close the offending connection
//! without a reply; other clients are unaffected.

pub mod audit;
pub mod buffer;
pub mod client;
pub mod config;
pub mod crc;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod state;
pub mod storage;

pub use audit::{AuditEvent, AuditLogger};
pub use buffer::{BUFFER_CAPACITY, ReceiveBuffer};
pub use client::{Client, ClientId, ClientState, TransferStats, Transition};
pub use config::{LogFormat, XmodemConfig};
pub use error::{ClientError, Result, XmodemError};
pub use protocol::BlockSize;
pub use registry::Registry;
pub use server::{XmodemServer, bind_listener};
pub use storage::FileStore;
