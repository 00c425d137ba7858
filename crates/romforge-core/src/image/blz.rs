//! Backward LZ decoding for compressed overlays.
//!
//! A compressed blob ends with an 8-byte footer:
//!
//! ```text
//! len-8  enc_len:u24  hdr_len:u8
//! len-4  inc_len:u32             (decoded size minus encoded size)
//! ```
//!
//! Everything before `len - enc_len` is stored raw. The coded stream is read
//! from its end toward its start and the output is written the same way.

use crate::byteio::read_u32;
use crate::error::{Error, Result};

const FOOTER_SIZE: usize = 8;
const MIN_RUN: usize = 3;
const MIN_DISTANCE: usize = 3;

fn corrupt(message: impl Into<String>) -> Error {
    Error::Decompression(format!("BLZ: {}", message.into()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let len = data.len();
    if len < FOOTER_SIZE {
        return Err(corrupt(format!("{} bytes is too short for a footer", len)));
    }

    let inc_len = read_u32(data, len - 4).unwrap_or_default() as usize;
    if inc_len == 0 {
        // Stored without coding; the zero word is only a marker.
        return Ok(data[..len - 4].to_vec());
    }

    let footer = read_u32(data, len - 8).unwrap_or_default();
    let enc_len = (footer & 0x00FF_FFFF) as usize;
    let hdr_len = (footer >> 24) as usize;
    if enc_len > len || hdr_len < FOOTER_SIZE || hdr_len > enc_len {
        return Err(corrupt(format!(
            "footer enc_len={:#x} hdr_len={:#x} does not fit {:#x} bytes",
            enc_len, hdr_len, len
        )));
    }

    let raw_len = len - enc_len;
    let out_len = len + inc_len;
    let mut out = vec![0u8; out_len];
    out[..raw_len].copy_from_slice(&data[..raw_len]);

    let mut src = len - hdr_len;
    let mut dst = out_len;
    let mut flags = 0u8;
    let mut mask = 0u8;

    while dst > raw_len {
        mask >>= 1;
        if mask == 0 {
            if src == raw_len {
                break;
            }
            src -= 1;
            flags = data[src];
            mask = 0x80;
        }

        if flags & mask == 0 {
            if src == raw_len {
                break;
            }
            src -= 1;
            dst -= 1;
            out[dst] = data[src];
            continue;
        }

        if src - raw_len < 2 {
            break;
        }
        let token = (usize::from(data[src - 1]) << 8) | usize::from(data[src - 2]);
        src -= 2;
        let run = ((token >> 12) + MIN_RUN).min(dst - raw_len);
        let distance = (token & 0x0FFF) + MIN_DISTANCE;
        if dst + distance > out_len {
            return Err(corrupt(format!(
                "back-reference distance {:#x} at output {:#x} leaves the buffer",
                distance, dst
            )));
        }
        for _ in 0..run {
            dst -= 1;
            out[dst] = out[dst + distance];
        }
    }

    if dst != raw_len {
        return Err(corrupt(format!(
            "stream ended with {:#x} output bytes unfilled",
            dst - raw_len
        )));
    }

    Ok(out)
}
