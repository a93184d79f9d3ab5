//! Protocol state machine.
//!
//! A client is stepped once per readiness report. Each step performs at
//! most one socket read, never larger than what the current state still
//! needs, then consumes every complete unit the buffer holds: a filename
//! line, a control byte, a whole block.

use std::collections::HashSet;
use std::io::{Read, Write};

use tracing::{debug, info, warn};

use crate::client::{Client, ClientState, Transition};
use crate::crc::{XMODEM_KEY, crc_message};
use crate::error::ClientError;
use crate::protocol::{
    ACK, BlockSize, ControlByte, FILENAME_CONFIRM, FILENAME_FIELD_LEN, LINE_TERMINATOR, NAK,
    next_block_number, strip_padding,
};
use crate::storage::FileStore;

impl<S: Read + Write> Client<S> {
    /// Read what the current state is missing and process the result.
    ///
    /// `in_use` holds the filenames other live clients are writing; asking
    /// for one of them is refused before anything is opened. Any error
    /// means the client must be evicted.
    pub fn step(
        &mut self,
        store: &FileStore,
        in_use: &HashSet<String>,
    ) -> Result<Transition, ClientError> {
        let deficit = self.deficit();
        if deficit > 0 {
            self.buffer.fill(&mut self.stream, deficit)?;
        }
        self.advance(store, in_use)
    }

    /// Bytes still needed before the current state can make progress.
    fn deficit(&self) -> usize {
        let buffered = self.buffer.len();
        match self.state {
            ClientState::AwaitingFilename => FILENAME_FIELD_LEN.saturating_sub(buffered),
            ClientState::AwaitingBlockHeader => 1usize.saturating_sub(buffered),
            ClientState::ReceivingBlock { size } => size.frame_len().saturating_sub(buffered),
            ClientState::Finished => 0,
        }
    }

    fn advance(
        &mut self,
        store: &FileStore,
        in_use: &HashSet<String>,
    ) -> Result<Transition, ClientError> {
        loop {
            match self.state {
                ClientState::AwaitingFilename => {
                    let terminator = self
                        .buffer
                        .find_line_terminator()
                        .filter(|offset| offset + LINE_TERMINATOR.len() <= FILENAME_FIELD_LEN);

                    let Some(offset) = terminator else {
                        if self.buffer.len() >= FILENAME_FIELD_LEN {
                            return Err(ClientError::FilenameTooLong(FILENAME_FIELD_LEN));
                        }
                        return Ok(Transition::Continue);
                    };
                    let Some(line) = self.buffer.take_line(offset) else {
                        return Ok(Transition::Continue);
                    };
                    self.negotiate_filename(&line, store, in_use)?;
                }
                ClientState::AwaitingBlockHeader => {
                    let Some(header) = self.buffer.take_bytes(1) else {
                        return Ok(Transition::Continue);
                    };
                    let control = match ControlByte::try_from(header[0]) {
                        Ok(control) => control,
                        Err(e) => {
                            debug!("Client {}: {}, ignored", self.id, e);
                            continue;
                        }
                    };

                    match BlockSize::from_control(control) {
                        Some(size) => {
                            debug!(
                                "Client {}: block header for {} byte payload",
                                self.id,
                                size.payload_len()
                            );
                            self.state = ClientState::ReceivingBlock { size };
                        }
                        None => {
                            self.send(ACK)?;
                            self.state = ClientState::Finished;
                            info!(
                                "Client {} finished {:?}: {} blocks, {} bytes",
                                self.id, self.filename, self.stats.blocks, self.stats.bytes
                            );
                        }
                    }
                }
                ClientState::ReceivingBlock { size } => {
                    let frame_len = size.frame_len();
                    let buffered = self.buffer.len();
                    if buffered > frame_len {
                        return Err(ClientError::OversizedBlock {
                            buffered,
                            expected: frame_len,
                        });
                    }
                    let Some(frame) = self.buffer.take_bytes(frame_len) else {
                        return Ok(Transition::Continue);
                    };
                    self.state = ClientState::AwaitingBlockHeader;
                    self.validate_block(size, &frame)?;
                }
                ClientState::Finished => return Ok(Transition::Complete),
            }
        }
    }

    fn negotiate_filename(
        &mut self,
        line: &[u8],
        store: &FileStore,
        in_use: &HashSet<String>,
    ) -> Result<(), ClientError> {
        let filename = std::str::from_utf8(line)
            .map_err(|_| ClientError::InvalidFilename("filename is not valid UTF-8".to_string()))?
            .to_string();

        // Opening truncates; another client's file must stay untouched
        if in_use.contains(&filename) {
            return Err(ClientError::FilenameInUse(filename));
        }

        let output = store.open(&filename)?;
        info!("Client {} sending {}", self.id, filename);
        self.audit
            .transfer_started(self.peer, &filename, &self.correlation_id);

        self.output = Some(output);
        self.filename = Some(filename);
        self.state = ClientState::AwaitingBlockHeader;
        self.send(FILENAME_CONFIRM)
    }

    /// Check one frame: `[number][inverse][payload][crc_hi][crc_lo]`.
    fn validate_block(&mut self, size: BlockSize, frame: &[u8]) -> Result<(), ClientError> {
        let number = frame[0];
        let inverse = frame[1];
        if inverse != u8::MAX - number {
            return Err(ClientError::BlockNumberMismatch { number, inverse });
        }

        // Integer comparison: block 255 resent after the wrap is not a duplicate
        if u16::from(number) + 1 == u16::from(self.expected_block) {
            debug!("Client {}: duplicate block {}", self.id, number);
            self.stats.duplicates += 1;
            return self.send(ACK);
        }

        if number != self.expected_block {
            return Err(ClientError::UnexpectedBlock {
                number,
                expected: self.expected_block,
            });
        }

        let payload_len = size.payload_len();
        let payload = &frame[2..2 + payload_len];
        let received = u16::from_be_bytes([frame[2 + payload_len], frame[3 + payload_len]]);
        let computed = crc_message(XMODEM_KEY, payload);

        if received != computed {
            warn!(
                "Client {}: CRC mismatch on block {} (received {:#06x}, computed {:#06x})",
                self.id, number, received, computed
            );
            self.stats.naks += 1;
            self.audit.block_rejected(
                self.peer,
                self.filename.as_deref().unwrap_or_default(),
                number,
                "crc mismatch",
                &self.correlation_id,
            );
            return self.send(NAK);
        }

        let data = strip_padding(payload);
        let output = self.output.as_mut().ok_or_else(|| {
            ClientError::Io(std::io::Error::other("block received before output was opened"))
        })?;
        output.write_all(data)?;

        self.stats.blocks += 1;
        self.stats.bytes += data.len() as u64;
        self.expected_block = next_block_number(number);
        debug!(
            "Client {}: block {} accepted ({} bytes)",
            self.id,
            number,
            data.len()
        );
        self.send(ACK)
    }

    fn send(&mut self, byte: u8) -> Result<(), ClientError> {
        self.stream.write_all(&[byte])?;
        self.stream.flush()?;
        Ok(())
    }
}
