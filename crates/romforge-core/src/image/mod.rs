//! Executable image: the primary code blob plus numbered overlays.
//!
//! Blobs change only through explicit operations (`write_bytes`,
//! `replace_overlay`, `reserve_slack` and the patch applier). The image keeps
//! the set of primary-blob offsets that have already been relocated so a
//! branch is never shifted twice.

pub mod blz;
mod overlay;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;

use tracing::{debug, info};

use crate::container::{Container, ContainerLayout};
use crate::error::{Error, Result};

pub use overlay::{OVERLAY_ENTRY_SIZE, OverlayEntry, parse_overlay_table, serialize_overlay_table};

/// RAM address the ARM9 binary is loaded at.
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x0200_0000;

/// One of the image's code blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Blob {
    Primary,
    Overlay(u32),
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Blob::Primary => f.write_str("primary"),
            Blob::Overlay(id) => write!(f, "overlay {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    primary: Vec<u8>,
    load_address: u32,
    overlays: BTreeMap<u32, Vec<u8>>,
    overlay_table: Vec<OverlayEntry>,
    relocated: BTreeSet<usize>,
}

/// Serialized form of an image, ready to be written back to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParts {
    pub primary: Vec<u8>,
    pub overlay_table: Vec<u8>,
    pub overlays: BTreeMap<u32, Vec<u8>>,
}

impl ExecutableImage {
    pub fn new(primary: Vec<u8>) -> Self {
        Self {
            primary,
            load_address: DEFAULT_LOAD_ADDRESS,
            overlays: BTreeMap::new(),
            overlay_table: Vec::new(),
            relocated: BTreeSet::new(),
        }
    }

    pub fn with_load_address(mut self, load_address: u32) -> Self {
        self.load_address = load_address;
        self
    }

    /// Load the primary blob, its overlay table and the overlay files by id.
    ///
    /// Overlays flagged as compressed are decoded here; their table entries
    /// are rewritten as uncompressed so that [`Self::into_parts`] stays consistent.
    pub fn load(
        primary: Vec<u8>,
        overlay_table: &[u8],
        overlays: BTreeMap<u32, Vec<u8>>,
    ) -> Result<Self> {
        let mut table = parse_overlay_table(overlay_table)?;
        let mut loaded = BTreeMap::new();

        for (id, data) in overlays {
            let entry = table
                .iter_mut()
                .find(|entry| entry.id == id)
                .ok_or(Error::UnknownOverlay(id))?;
            let data = if entry.is_compressed() {
                let decoded = blz::decompress(&data)?;
                debug!(
                    "Overlay {}: decompressed {} -> {} bytes",
                    id,
                    data.len(),
                    decoded.len()
                );
                entry.clear_compression();
                decoded
            } else {
                data
            };
            loaded.insert(id, data);
        }

        info!(
            "Loaded image: primary {} bytes, {} of {} overlays",
            primary.len(),
            loaded.len(),
            table.len()
        );

        Ok(Self {
            primary,
            load_address: DEFAULT_LOAD_ADDRESS,
            overlays: loaded,
            overlay_table: table,
            relocated: BTreeSet::new(),
        })
    }

    /// Add an overlay blob without a table entry.
    pub fn insert_overlay(&mut self, id: u32, data: Vec<u8>) {
        self.overlays.insert(id, data);
    }

    pub fn primary(&self) -> &[u8] {
        &self.primary
    }

    pub fn load_address(&self) -> u32 {
        self.load_address
    }

    pub fn overlay(&self, id: u32) -> Result<&[u8]> {
        self.overlays
            .get(&id)
            .map(Vec::as_slice)
            .ok_or(Error::UnknownOverlay(id))
    }

    pub fn overlay_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.overlays.keys().copied()
    }

    pub fn overlay_table(&self) -> &[OverlayEntry] {
        &self.overlay_table
    }

    pub fn overlay_entry(&self, id: u32) -> Option<&OverlayEntry> {
        self.overlay_table.iter().find(|entry| entry.id == id)
    }

    pub fn blob(&self, blob: Blob) -> Result<&[u8]> {
        match blob {
            Blob::Primary => Ok(&self.primary),
            Blob::Overlay(id) => self.overlay(id),
        }
    }

    pub(crate) fn blob_mut(&mut self, blob: Blob) -> Result<&mut Vec<u8>> {
        match blob {
            Blob::Primary => Ok(&mut self.primary),
            Blob::Overlay(id) => self.overlays.get_mut(&id).ok_or(Error::UnknownOverlay(id)),
        }
    }

    /// Parse an overlay that is itself a packed container.
    pub fn overlay_container(&self, id: u32, layout: ContainerLayout) -> Result<Container> {
        Container::parse(self.overlay(id)?, layout)
    }

    pub fn replace_overlay(&mut self, id: u32, data: Vec<u8>) -> Result<()> {
        let slot = self.overlays.get_mut(&id).ok_or(Error::UnknownOverlay(id))?;
        debug!("Replacing overlay {} ({} -> {} bytes)", id, slot.len(), data.len());
        if let Some(entry) = self.overlay_table.iter_mut().find(|entry| entry.id == id) {
            entry.ram_size = data.len() as u32;
        }
        *slot = data;
        Ok(())
    }

    /// Overwrite bytes in place; the blob never grows here.
    pub fn write_bytes(&mut self, blob: Blob, offset: usize, bytes: &[u8]) -> Result<()> {
        let target = self.blob_mut(blob)?;
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= target.len())
            .ok_or(Error::PatchOutOfBounds {
                origin: offset,
                len: bytes.len(),
                buffer_len: target.len(),
            })?;
        target[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Grow the primary blob by `amount` zero bytes of trailing slack.
    pub fn reserve_slack(&mut self, amount: usize) {
        let len = self.primary.len();
        self.primary.resize(len + amount, 0);
        debug!("Reserved {} bytes of slack after {:#x}", amount, len);
    }

    /// RAM address of a primary-blob offset.
    pub fn address_of(&self, offset: usize) -> u32 {
        self.load_address.wrapping_add(offset as u32)
    }

    pub fn is_relocated(&self, offset: usize) -> bool {
        self.relocated.contains(&offset)
    }

    pub fn relocated_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        self.relocated.iter().copied()
    }

    /// Move tracked offsets inside `block` by `shift`, then record `new_offsets`.
    pub(crate) fn track_relocations(
        &mut self,
        block: Range<usize>,
        shift: usize,
        new_offsets: &[usize],
    ) {
        let moved: Vec<usize> = self.relocated.range(block.clone()).copied().collect();
        for offset in moved {
            self.relocated.remove(&offset);
            self.relocated.insert(offset + shift);
        }
        self.relocated.extend(new_offsets.iter().copied());
    }

    pub fn into_parts(self) -> ImageParts {
        ImageParts {
            primary: self.primary,
            overlay_table: serialize_overlay_table(&self.overlay_table),
            overlays: self.overlays,
        }
    }
}
