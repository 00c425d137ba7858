//! Overlay table (`y9.bin` / `y7.bin`) entries.

use serde::{Deserialize, Serialize};

use crate::byteio::read_u32;
use crate::error::{Error, Result};

pub const OVERLAY_ENTRY_SIZE: usize = 32;

const FLAG_COMPRESSED: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    pub id: u32,
    pub ram_address: u32,
    pub ram_size: u32,
    pub bss_size: u32,
    pub static_init_start: u32,
    pub static_init_end: u32,
    pub file_id: u32,
    /// Encoded size when compressed (24 bits).
    pub compressed_size: u32,
    pub flags: u8,
}

impl OverlayEntry {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    /// Mark the overlay as stored uncompressed.
    pub fn clear_compression(&mut self) {
        self.flags &= !FLAG_COMPRESSED;
        self.compressed_size = 0;
    }

    fn parse(bytes: &[u8]) -> Self {
        let word = |index: usize| read_u32(bytes, index * 4).unwrap_or_default();
        let last = word(7);
        Self {
            id: word(0),
            ram_address: word(1),
            ram_size: word(2),
            bss_size: word(3),
            static_init_start: word(4),
            static_init_end: word(5),
            file_id: word(6),
            compressed_size: last & 0x00FF_FFFF,
            flags: (last >> 24) as u8,
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        for word in [
            self.id,
            self.ram_address,
            self.ram_size,
            self.bss_size,
            self.static_init_start,
            self.static_init_end,
            self.file_id,
            (self.compressed_size & 0x00FF_FFFF) | (u32::from(self.flags) << 24),
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

pub fn parse_overlay_table(bytes: &[u8]) -> Result<Vec<OverlayEntry>> {
    if bytes.len() % OVERLAY_ENTRY_SIZE != 0 {
        return Err(Error::MalformedOverlayTable(format!(
            "{} bytes is not a multiple of {}",
            bytes.len(),
            OVERLAY_ENTRY_SIZE
        )));
    }

    let entries: Vec<OverlayEntry> = bytes
        .chunks_exact(OVERLAY_ENTRY_SIZE)
        .map(OverlayEntry::parse)
        .collect();

    for (index, entry) in entries.iter().enumerate() {
        if entries[..index].iter().any(|other| other.id == entry.id) {
            return Err(Error::MalformedOverlayTable(format!(
                "overlay id {} appears more than once",
                entry.id
            )));
        }
    }

    Ok(entries)
}

pub fn serialize_overlay_table(entries: &[OverlayEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * OVERLAY_ENTRY_SIZE);
    for entry in entries {
        entry.write(&mut out);
    }
    out
}
