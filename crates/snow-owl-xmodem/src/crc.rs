//! CRC-16 used by XMODEM-CRC block trailers.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crc::{Algorithm, CRC_16_XMODEM, Crc, NoTable};

/// Polynomial used by XMODEM-CRC (x^16 + x^12 + x^5 + 1).
pub const XMODEM_KEY: u16 = 0x1021;

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute a CRC-16 over `data` with the given polynomial `key`.
///
/// MSB-first, initial value 0, no final XOR. With [`XMODEM_KEY`] this is
/// CRC-16/XMODEM and uses a precomputed table.
pub fn crc_message(key: u16, data: &[u8]) -> u16 {
    if key == XMODEM_KEY {
        return XMODEM.checksum(data);
    }
    Crc::<u16, NoTable>::new(algorithm_for(key)).checksum(data)
}

/// CRC-16/XMODEM parameters with the polynomial replaced, built once per key.
fn algorithm_for(key: u16) -> &'static Algorithm<u16> {
    static ALGORITHMS: OnceLock<Mutex<HashMap<u16, &'static Algorithm<u16>>>> = OnceLock::new();

    let mut algorithms = ALGORITHMS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *algorithms.entry(key).or_insert_with(|| {
        Box::leak(Box::new(Algorithm {
            poly: key,
            check: 0,
            residue: 0,
            ..CRC_16_XMODEM
        }))
    })
}
