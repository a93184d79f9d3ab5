//! XMODEM-CRC wire format.
//!
//! Filename phase: `<name>\r\n`, answered with `C`.
//! Block phase: one control byte, then
//! `[number][255 - number][payload][crc_hi][crc_lo]` with the CRC computed
//! over the payload only.

use bytes::{BufMut, BytesMut};

use crate::crc::{XMODEM_KEY, crc_message};
use crate::error::{Result, XmodemError};

// ASCII control characters
pub const SOH: u8 = 0x01;
pub const STX: u8 = 0x02;
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
pub const SUB: u8 = 0x1A;

/// Sent once the filename has been accepted (CRC mode request).
pub const FILENAME_CONFIRM: u8 = b'C';

/// Bytes in the filename field, terminator included.
pub const FILENAME_FIELD_LEN: usize = 21;

/// Longest filename kept on disk.
pub const MAX_FILENAME_LEN: usize = 20;

/// Block number, inverse block number and the two CRC bytes.
pub const BLOCK_OVERHEAD: usize = 4;

/// Line terminator closing the filename.
pub const LINE_TERMINATOR: &[u8; 2] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    Soh,
    Stx,
    Eot,
}

impl TryFrom<u8> for ControlByte {
    type Error = XmodemError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            SOH => Ok(ControlByte::Soh),
            STX => Ok(ControlByte::Stx),
            EOT => Ok(ControlByte::Eot),
            _ => Err(XmodemError::Xmodem(format!(
                "Unknown control byte: {:#04x}",
                value
            ))),
        }
    }
}

/// Payload size announced by a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    /// 128-byte payload, announced by SOH
    Standard,
    /// 1024-byte payload, announced by STX
    Large,
}

impl BlockSize {
    pub fn payload_len(self) -> usize {
        match self {
            BlockSize::Standard => 128,
            BlockSize::Large => 1024,
        }
    }

    /// Bytes that follow the control byte on the wire.
    pub fn frame_len(self) -> usize {
        self.payload_len() + BLOCK_OVERHEAD
    }

    pub fn header(self) -> u8 {
        match self {
            BlockSize::Standard => SOH,
            BlockSize::Large => STX,
        }
    }

    pub fn from_control(control: ControlByte) -> Option<Self> {
        match control {
            ControlByte::Soh => Some(BlockSize::Standard),
            ControlByte::Stx => Some(BlockSize::Large),
            ControlByte::Eot => None,
        }
    }
}

/// Block number following `number`. Sequence runs 1..=255 and wraps to 1.
pub fn next_block_number(number: u8) -> u8 {
    if number == u8::MAX { 1 } else { number + 1 }
}

/// Portion of a payload that precedes the first SUB padding byte.
pub fn strip_padding(payload: &[u8]) -> &[u8] {
    match payload.iter().position(|&b| b == SUB) {
        Some(end) => &payload[..end],
        None => payload,
    }
}

/// Build a complete block packet: control byte, block numbers, payload
/// padded with SUB to the block size, and the big-endian CRC.
pub fn encode_block(number: u8, size: BlockSize, data: &[u8]) -> Result<BytesMut> {
    let payload_len = size.payload_len();
    if data.len() > payload_len {
        return Err(XmodemError::Xmodem(format!(
            "Block data of {} bytes exceeds payload size {}",
            data.len(),
            payload_len
        )));
    }

    let mut payload = BytesMut::with_capacity(payload_len);
    payload.put_slice(data);
    payload.put_bytes(SUB, payload_len - data.len());

    let mut packet = BytesMut::with_capacity(1 + size.frame_len());
    packet.put_u8(size.header());
    packet.put_u8(number);
    packet.put_u8(u8::MAX - number);
    packet.put_slice(&payload);
    packet.put_u16(crc_message(XMODEM_KEY, &payload));
    Ok(packet)
}
