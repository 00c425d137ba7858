//! Packed sub-file containers.
//!
//! A [`Container`] is an ordered list of sub-files read from an offset table.
//! The header shape comes from a [`ContainerLayout`] value; everything else
//! (lookup, replacement, serialization) is shared.
//!
//! Parsing followed by [`Container::serialize`] with no replacements
//! reproduces the input byte for byte: alignment gaps between payloads and any
//! bytes the layout does not interpret are carried along verbatim.

mod narc;
mod packed;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::byteio::align_up;
use crate::error::{Error, Result};

pub use narc::NARC_MAGIC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ContainerLayout {
    /// Nitro archive: `NARC` header with `BTAF`, `BTNF` and `GMIF` sections.
    Narc,
    /// `u32` count, then `(u32 offset, u32 length)` pairs with absolute offsets.
    Packed { alignment: u32 },
}

impl ContainerLayout {
    /// Recognize a layout from its magic, if it has one.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(NARC_MAGIC) {
            Some(Self::Narc)
        } else {
            None
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            Self::Narc => narc::ALIGNMENT,
            Self::Packed { alignment } => (*alignment).max(1) as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    data: Vec<u8>,
    /// Bytes between the end of this payload and the next one.
    padding: Vec<u8>,
    replaced: bool,
}

/// Layout-specific header state that is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Header {
    Narc(narc::NarcHeader),
    Packed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    layout: ContainerLayout,
    header: Header,
    entries: Vec<Entry>,
    /// Entry indices in the order their payloads are stored.
    order: Vec<usize>,
    /// Bytes between the offset table and the first payload.
    lead: Vec<u8>,
    /// Bytes after everything the header accounts for.
    trailer: Vec<u8>,
}

/// Payload boundaries read from an offset table, relative to the payload region.
struct Span {
    start: usize,
    end: usize,
}

impl Container {
    pub fn parse(bytes: &[u8], layout: ContainerLayout) -> Result<Self> {
        let container = match layout {
            ContainerLayout::Narc => narc::parse(bytes)?,
            ContainerLayout::Packed { .. } => packed::parse(bytes, layout)?,
        };
        debug!(
            "Parsed {:?} container: {} sub-files, {} bytes",
            layout,
            container.len(),
            bytes.len()
        );
        Ok(container)
    }

    /// Build a container from scratch; every payload is padded to the layout's alignment.
    pub fn from_files(layout: ContainerLayout, files: Vec<Vec<u8>>) -> Self {
        let header = match layout {
            ContainerLayout::Narc => Header::Narc(narc::NarcHeader::default()),
            ContainerLayout::Packed { .. } => Header::Packed,
        };
        Self {
            layout,
            header,
            order: (0..files.len()).collect(),
            entries: files
                .into_iter()
                .map(|data| Entry {
                    data,
                    padding: Vec::new(),
                    replaced: true,
                })
                .collect(),
            lead: Vec::new(),
            trailer: Vec::new(),
        }
    }

    pub fn layout(&self) -> ContainerLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&[u8]> {
        self.entries
            .get(index)
            .map(|entry| entry.data.as_slice())
            .ok_or(Error::IndexOutOfRange {
                index,
                count: self.entries.len(),
            })
    }

    /// Mutable access for in-place patching; the sub-file may also be resized.
    pub fn get_mut(&mut self, index: usize) -> Result<&mut Vec<u8>> {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, count })?;
        entry.replaced = true;
        Ok(&mut entry.data)
    }

    pub fn set(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        let count = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, count })?;
        debug!(
            "Replacing sub-file {} ({} -> {} bytes)",
            index,
            entry.data.len(),
            data.len()
        );
        entry.data = data;
        entry.replaced = true;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|entry| entry.data.as_slice())
    }

    pub fn into_files(self) -> Vec<Vec<u8>> {
        self.entries.into_iter().map(|entry| entry.data).collect()
    }

    pub fn serialize(&self) -> Vec<u8> {
        match &self.header {
            Header::Narc(header) => narc::serialize(self, header),
            Header::Packed => packed::serialize(self),
        }
    }

    /// Lay out the payload region and each sub-file's `(start, end)`.
    ///
    /// `origin` is the position the offset table uses for the first byte of
    /// the region, so alignment is computed in the table's own terms.
    fn layout_payloads(&self, origin: usize) -> (Vec<u8>, Vec<(usize, usize)>) {
        let alignment = self.layout.alignment();
        let mut region = Vec::with_capacity(self.payload_size_hint());
        region.extend_from_slice(&self.lead);
        let mut spans = vec![(origin, origin); self.entries.len()];

        for &index in &self.order {
            let entry = &self.entries[index];
            let start = origin + region.len();
            region.extend_from_slice(&entry.data);
            let end = origin + region.len();
            spans[index] = (start, end);

            if entry.replaced {
                let pad_len = align_up(end, alignment) - end;
                if pad_len == entry.padding.len() {
                    region.extend_from_slice(&entry.padding);
                } else {
                    region.resize(region.len() + pad_len, 0);
                }
            } else {
                region.extend_from_slice(&entry.padding);
            }
        }

        (region, spans)
    }

    fn payload_size_hint(&self) -> usize {
        self.lead.len()
            + self
                .entries
                .iter()
                .map(|entry| entry.data.len() + entry.padding.len())
                .sum::<usize>()
    }

    /// Split `region` into entries from spans relative to the region start.
    ///
    /// Spans may appear in any order; the returned storage order sorts them
    /// by position so padding is attributed to the payload it follows.
    fn entries_from_spans(
        region: &[u8],
        spans: &[Span],
    ) -> Result<(Vec<u8>, Vec<Entry>, Vec<usize>)> {
        for (index, span) in spans.iter().enumerate() {
            if span.end < span.start {
                return Err(Error::MalformedContainer(format!(
                    "sub-file {} ends ({:#x}) before it starts ({:#x})",
                    index, span.end, span.start
                )));
            }
            if span.end > region.len() {
                return Err(Error::MalformedContainer(format!(
                    "sub-file {} ends at {:#x}, beyond the {:#x}-byte payload region",
                    index,
                    span.end,
                    region.len()
                )));
            }
        }

        let mut order: Vec<usize> = (0..spans.len()).collect();
        order.sort_by_key(|&index| (spans[index].start, spans[index].end));

        let mut cursor = 0usize;
        for &index in &order {
            let span = &spans[index];
            if span.start < cursor {
                return Err(Error::MalformedContainer(format!(
                    "sub-file {} at {:#x} overlaps another one (ends {:#x})",
                    index, span.start, cursor
                )));
            }
            cursor = span.end;
        }

        let mut padding = vec![Vec::new(); spans.len()];
        for (position, &index) in order.iter().enumerate() {
            let next = order
                .get(position + 1)
                .map_or(region.len(), |&next| spans[next].start);
            padding[index] = region[spans[index].end..next].to_vec();
        }
        let entries = spans
            .iter()
            .zip(padding)
            .map(|(span, padding)| Entry {
                data: region[span.start..span.end].to_vec(),
                padding,
                replaced: false,
            })
            .collect();

        let lead_end = order.first().map_or(region.len(), |&first| spans[first].start);
        Ok((region[..lead_end].to_vec(), entries, order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_files() -> Vec<Vec<u8>> {
        vec![vec![0x11; 8], Vec::new(), (0..12).collect()]
    }

    #[test]
    fn test_index_out_of_range() {
        let mut container = Container::from_files(ContainerLayout::Narc, scenario_files());
        assert!(matches!(
            container.get(3),
            Err(Error::IndexOutOfRange { index: 3, count: 3 })
        ));
        assert!(matches!(
            container.set(7, vec![1]),
            Err(Error::IndexOutOfRange { index: 7, count: 3 })
        ));
        assert_eq!(container.len(), 3);
    }

    #[test]
    fn test_reserialize_is_stable_for_both_layouts() {
        for layout in [ContainerLayout::Narc, ContainerLayout::Packed { alignment: 4 }] {
            let built = Container::from_files(layout, scenario_files()).serialize();
            let reparsed = Container::parse(&built, layout).unwrap();
            assert_eq!(reparsed.serialize(), built);
            assert_eq!(reparsed.get(0).unwrap(), &[0x11; 8]);
            assert!(reparsed.get(1).unwrap().is_empty());
            assert_eq!(reparsed.get(2).unwrap().len(), 12);
        }
    }

    #[test]
    fn test_get_mut_resizes_sub_file() {
        let layout = ContainerLayout::Packed { alignment: 1 };
        let bytes = Container::from_files(layout, scenario_files()).serialize();
        let mut container = Container::parse(&bytes, layout).unwrap();
        container.get_mut(1).unwrap().extend_from_slice(&[9, 9]);
        let out = container.serialize();
        assert_eq!(out.len(), bytes.len() + 2);
        let reparsed = Container::parse(&out, layout).unwrap();
        assert_eq!(reparsed.get(1).unwrap(), &[9, 9]);
        assert_eq!(reparsed.get(2).unwrap(), container.get(2).unwrap());
    }

    #[test]
    fn test_detect_layout() {
        let narc = Container::from_files(ContainerLayout::Narc, vec![vec![1, 2, 3]]).serialize();
        assert_eq!(ContainerLayout::detect(&narc), Some(ContainerLayout::Narc));
        assert_eq!(ContainerLayout::detect(&[0, 0, 0, 0]), None);
    }

    #[test]
    fn test_layout_serde_form() {
        let json = serde_json::to_string(&ContainerLayout::Packed { alignment: 4 }).unwrap();
        assert_eq!(json, r#"{"format":"packed","alignment":4}"#);
        let narc: ContainerLayout = serde_json::from_str(r#"{"format":"narc"}"#).unwrap();
        assert_eq!(narc, ContainerLayout::Narc);
    }
}
