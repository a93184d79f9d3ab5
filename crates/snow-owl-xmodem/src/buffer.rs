//! Per-client receive buffer.
//!
//! Bytes are always left-aligned: reads append at `len()`, scans start at
//! offset 0, and every extraction removes bytes from the front.

use bytes::{Buf, BytesMut};
use std::io::{ErrorKind, Read};

use crate::error::ClientError;
use crate::protocol::LINE_TERMINATOR;

/// Capacity of a client receive buffer in bytes.
pub const BUFFER_CAPACITY: usize = 2048;

#[derive(Debug)]
pub struct ReceiveBuffer {
    data: BytesMut,
    capacity: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Read up to `requested` bytes from `reader` onto the end of the buffer.
    ///
    /// A request that could not fit is refused before touching the reader or
    /// the buffer. End of stream is reported as [`ClientError::Disconnected`].
    /// `WouldBlock` is not an error: it yields `Ok(0)`.
    ///
    /// NIST 800-53 SC-5: Denial of Service Protection (bounded input)
    pub fn fill<R: Read>(&mut self, reader: &mut R, requested: usize) -> Result<usize, ClientError> {
        let start = self.data.len();
        if start + requested > self.capacity {
            return Err(ClientError::BufferOverflow {
                buffered: start,
                requested,
                capacity: self.capacity,
            });
        }
        if requested == 0 {
            return Ok(0);
        }

        self.data.resize(start + requested, 0);
        let result = loop {
            match reader.read(&mut self.data[start..]) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                self.data.truncate(start);
                Err(ClientError::Disconnected)
            }
            Ok(n) => {
                self.data.truncate(start + n);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.data.truncate(start);
                Ok(0)
            }
            Err(e) => {
                self.data.truncate(start);
                Err(ClientError::Io(e))
            }
        }
    }

    /// Offset of the CR of the first CR LF lying entirely in the buffer.
    pub fn find_line_terminator(&self) -> Option<usize> {
        self.data
            .windows(LINE_TERMINATOR.len())
            .position(|window| window == LINE_TERMINATOR)
    }

    /// Remove and return the line ending at `terminator`, dropping the CR LF.
    ///
    /// `terminator` must come from [`find_line_terminator`](Self::find_line_terminator);
    /// `None` is returned, and nothing removed, if it does not point at a
    /// terminator inside the buffer.
    pub fn take_line(&mut self, terminator: usize) -> Option<BytesMut> {
        let end = terminator + LINE_TERMINATOR.len();
        if end > self.data.len() || &self.data[terminator..end] != LINE_TERMINATOR {
            return None;
        }
        let line = self.data.split_to(terminator);
        self.data.advance(LINE_TERMINATOR.len());
        Some(line)
    }

    /// Remove and return the first `n` bytes, or `None` if fewer are buffered.
    pub fn take_bytes(&mut self, n: usize) -> Option<BytesMut> {
        if n > self.data.len() {
            return None;
        }
        Some(self.data.split_to(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailingReader(ErrorKind);

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(self.0.into())
        }
    }

    #[test]
    fn fill_appends_at_end() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(b"abcdef".to_vec());

        assert_eq!(buffer.fill(&mut reader, 3).ok(), Some(3));
        assert_eq!(buffer.fill(&mut reader, 10).ok(), Some(3));
        assert_eq!(buffer.as_slice(), b"abcdef");
    }

    #[test]
    fn fill_refuses_overflow_without_reading() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(vec![7u8; BUFFER_CAPACITY + 16]);
        assert_eq!(buffer.fill(&mut reader, 2000).ok(), Some(2000));

        let result = buffer.fill(&mut reader, 49);
        assert!(matches!(
            result,
            Err(ClientError::BufferOverflow {
                buffered: 2000,
                requested: 49,
                capacity: BUFFER_CAPACITY
            })
        ));
        assert_eq!(buffer.len(), 2000);
        assert_eq!(reader.position(), 2000);

        assert_eq!(buffer.fill(&mut reader, 48).ok(), Some(48));
        assert_eq!(buffer.len(), BUFFER_CAPACITY);
    }

    #[test]
    fn fill_reports_disconnect_on_eof() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(Vec::new());
        assert!(matches!(
            buffer.fill(&mut reader, 4),
            Err(ClientError::Disconnected)
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn fill_treats_would_block_as_no_progress() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = FailingReader(ErrorKind::WouldBlock);
        assert_eq!(buffer.fill(&mut reader, 4).ok(), Some(0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn fill_propagates_read_errors() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = FailingReader(ErrorKind::ConnectionReset);
        assert!(matches!(buffer.fill(&mut reader, 4), Err(ClientError::Io(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn finds_terminator_only_when_complete() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(b"name.txt\r".to_vec());
        buffer.fill(&mut reader, 21).ok();
        assert_eq!(buffer.find_line_terminator(), None);

        let mut reader = Cursor::new(b"\nrest".to_vec());
        buffer.fill(&mut reader, 5).ok();
        assert_eq!(buffer.find_line_terminator(), Some(8));
    }

    #[test]
    fn take_line_compacts_remainder() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(b"report.txt\r\n\x01\x01".to_vec());
        buffer.fill(&mut reader, 21).ok();

        let offset = buffer.find_line_terminator();
        assert_eq!(offset, Some(10));
        let line = offset.and_then(|o| buffer.take_line(o));
        assert_eq!(line.as_deref(), Some(&b"report.txt"[..]));
        assert_eq!(buffer.as_slice(), &[0x01, 0x01]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn take_line_rejects_bogus_offset() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(b"abc\r\n".to_vec());
        buffer.fill(&mut reader, 5).ok();
        assert!(buffer.take_line(1).is_none());
        assert!(buffer.take_line(4).is_none());
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn take_bytes_shifts_and_bounds() {
        let mut buffer = ReceiveBuffer::new();
        let mut reader = Cursor::new(b"0123456789".to_vec());
        buffer.fill(&mut reader, 10).ok();

        assert_eq!(buffer.take_bytes(4).as_deref(), Some(&b"0123"[..]));
        assert_eq!(buffer.as_slice(), b"456789");
        assert!(buffer.take_bytes(7).is_none());
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.take_bytes(6).as_deref(), Some(&b"456789"[..]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn refills_after_extraction() {
        let mut buffer = ReceiveBuffer::with_capacity(8);
        let mut reader = Cursor::new(b"abcdefghijkl".to_vec());
        buffer.fill(&mut reader, 8).ok();
        buffer.take_bytes(6);
        assert_eq!(buffer.fill(&mut reader, 6).ok(), Some(4));
        assert_eq!(buffer.as_slice(), b"ghijkl");
    }
}
