//! "Extend and relocate" edits: open a gap inside a code blob by moving a
//! block toward its trailing slack, then repair the branches that crossed
//! the move.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::branch::BranchKind;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// One branch or pointer whose encoded value changes by `adjustment` bytes.
///
/// `offset` is the instruction's position before the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub offset: usize,
    pub kind: BranchKind,
    pub adjustment: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelocationTable {
    entries: Vec<Relocation>,
}

impl RelocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, relocation: Relocation) {
        self.entries.push(relocation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relocation> {
        self.entries.iter()
    }

    /// Derive the adjustments needed when `block` moves up by `shift` bytes.
    ///
    /// `sites` lists candidate instructions (pre-edit offsets). A relative
    /// branch leaving the block gets `-shift`, one entering it from outside
    /// gets `+shift`, and a pointer whose target (`base_address` maps offset
    /// zero) lies in the block gets `+shift`. Sites needing no change are
    /// dropped.
    pub fn for_shift(
        buffer: &[u8],
        base_address: u32,
        block: Range<usize>,
        shift: usize,
        sites: &[(usize, BranchKind)],
    ) -> Result<Self> {
        let shift = shift as i64;
        let in_block = |position: i64| position >= block.start as i64 && position < block.end as i64;

        let mut table = Self::new();
        for &(offset, kind) in sites {
            let target = kind.target(buffer, offset)?;
            let adjustment = if kind.is_relative() {
                match (in_block(offset as i64), in_block(target)) {
                    (true, false) => -shift,
                    (false, true) => shift,
                    _ => 0,
                }
            } else if in_block(target - i64::from(base_address)) {
                shift
            } else {
                0
            };
            if adjustment != 0 {
                table.push(Relocation {
                    offset,
                    kind,
                    adjustment,
                });
            }
        }
        Ok(table)
    }
}

impl From<Vec<Relocation>> for RelocationTable {
    fn from(entries: Vec<Relocation>) -> Self {
        Self { entries }
    }
}

/// A structural edit located by a unique anchor signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralEdit {
    pub anchor: Signature,
    /// Start of the moved block, relative to the anchor match.
    pub block_offset: usize,
    /// Length of the moved block; `None` runs up to the trailing slack.
    #[serde(default)]
    pub block_len: Option<usize>,
    pub shift: usize,
    #[serde(default)]
    pub relocations: RelocationTable,
    /// Written at the start of the opened gap; at most `shift` bytes.
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Written at `anchor + redirect_offset` once everything else is in place.
    #[serde(default)]
    pub redirect: Vec<u8>,
    #[serde(default)]
    pub redirect_offset: usize,
    /// Byte value that marks free space.
    #[serde(default)]
    pub fill: u8,
}

/// Where an applied edit moved things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralOutcome {
    pub anchor: usize,
    /// The moved block, in pre-edit offsets.
    pub block: Range<usize>,
    pub gap: Range<usize>,
    /// Post-edit offsets of every relocated instruction.
    pub relocated: Vec<usize>,
}

/// Validated edit: every byte to write is known before anything is written.
struct Plan {
    anchor: usize,
    block: Range<usize>,
    writes: Vec<(usize, [u8; 4], usize)>,
}

impl StructuralEdit {
    /// Apply the edit to `buffer`, leaving it unmodified on any error.
    pub fn apply(&self, buffer: &mut [u8]) -> Result<StructuralOutcome> {
        let Plan {
            anchor,
            block,
            writes,
        } = self.plan(buffer)?;
        let gap = block.start..block.start + self.shift;

        buffer.copy_within(block.clone(), block.start + self.shift);
        buffer[gap.clone()].fill(self.fill);
        buffer[gap.start..gap.start + self.payload.len()].copy_from_slice(&self.payload);

        let mut relocated = Vec::with_capacity(writes.len());
        for (position, bytes, width) in &writes {
            buffer[*position..*position + *width].copy_from_slice(&bytes[..*width]);
            relocated.push(*position);
        }

        let redirect_at = anchor + self.redirect_offset;
        buffer[redirect_at..redirect_at + self.redirect.len()].copy_from_slice(&self.redirect);

        info!(
            "Moved block {:#x}..{:#x} up by {:#x}, relocated {} sites",
            block.start,
            block.end,
            self.shift,
            relocated.len()
        );

        Ok(StructuralOutcome {
            anchor,
            block,
            gap,
            relocated,
        })
    }

    fn plan(&self, buffer: &[u8]) -> Result<Plan> {
        let len = buffer.len();
        let anchor = self.anchor.find(buffer)?;
        debug!("Anchor {} found at {:#x}", self.anchor, anchor);

        let start = anchor
            .checked_add(self.block_offset)
            .filter(|start| *start <= len)
            .ok_or(Error::PatchOutOfBounds {
                origin: anchor,
                len: self.block_offset,
                buffer_len: len,
            })?;
        let end = match self.block_len {
            Some(block_len) => start
                .checked_add(block_len)
                .filter(|end| *end <= len)
                .ok_or(Error::PatchOutOfBounds {
                    origin: start,
                    len: block_len,
                    buffer_len: len,
                })?,
            None => {
                let used = buffer[start..]
                    .iter()
                    .rposition(|&byte| byte != self.fill)
                    .map_or(0, |last| last + 1);
                start + used
            }
        };

        let available = buffer[end..]
            .iter()
            .take_while(|&&byte| byte == self.fill)
            .count();
        if available < self.shift {
            return Err(Error::InsufficientSpace {
                required: self.shift,
                available,
            });
        }

        if self.payload.len() > self.shift {
            return Err(Error::MalformedPatch(format!(
                "payload of {} bytes does not fit a {}-byte gap",
                self.payload.len(),
                self.shift
            )));
        }

        let redirect_end = anchor + self.redirect_offset + self.redirect.len();
        if redirect_end > len {
            return Err(Error::PatchOutOfBounds {
                origin: anchor + self.redirect_offset,
                len: self.redirect.len(),
                buffer_len: len,
            });
        }

        let block = start..end;
        // The move lands the block's tail on these bytes.
        let slack = block.end..block.end + self.shift;
        let mut writes: Vec<(usize, [u8; 4], usize)> = Vec::with_capacity(self.relocations.len());
        for relocation in self.relocations.iter() {
            let width = relocation.kind.width();
            let site = relocation.offset..relocation.offset + width;
            let position = if block.contains(&relocation.offset) {
                if site.end > block.end {
                    return Err(Error::PatchOutOfBounds {
                        origin: relocation.offset,
                        len: width,
                        buffer_len: block.end,
                    });
                }
                relocation.offset + self.shift
            } else if overlaps(&site, &slack) {
                return Err(Error::MalformedPatch(format!(
                    "relocation at {:#x} lies in the slack {:#x}..{:#x} taken by the move",
                    relocation.offset, slack.start, slack.end
                )));
            } else if site.start < block.start && site.end > block.start {
                return Err(Error::MalformedPatch(format!(
                    "relocation at {:#x} straddles the block start {:#x}",
                    relocation.offset, block.start
                )));
            } else {
                relocation.offset
            };
            if writes.iter().any(|(other, _, _)| *other == position) {
                return Err(Error::AlreadyRelocated(relocation.offset));
            }

            let bytes = relocation
                .kind
                .relocated(buffer, relocation.offset, relocation.adjustment)?;
            debug!(
                "Relocating {} at {:#x} -> {:#x} ({:+})",
                relocation.kind, relocation.offset, position, relocation.adjustment
            );
            writes.push((position, bytes, width));
        }

        let redirect_at = anchor + self.redirect_offset;
        let redirect = redirect_at..redirect_end;
        let gap = block.start..block.start + self.shift;
        if !redirect.is_empty() {
            if overlaps(&redirect, &gap) {
                return Err(Error::MalformedPatch(format!(
                    "redirect at {:#x} overlaps the gap {:#x}..{:#x}",
                    redirect_at, gap.start, gap.end
                )));
            }
            if let Some((position, _, _)) = writes
                .iter()
                .find(|(position, _, width)| overlaps(&redirect, &(*position..*position + *width)))
            {
                return Err(Error::MalformedPatch(format!(
                    "redirect at {:#x} overwrites the relocated site at {:#x}",
                    redirect_at, position
                )));
            }
        }

        Ok(Plan {
            anchor,
            block,
            writes,
        })
    }
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}
