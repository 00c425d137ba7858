//! Flat offset-table layout: `count:u32` then `(offset:u32, length:u32) * count`.

use super::{Container, ContainerLayout, Header, Span};
use crate::byteio::read_u32;
use crate::error::{Error, Result};

const ENTRY_SIZE: usize = 8;

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedContainer(format!("packed table: {}", message.into()))
}

pub(super) fn parse(bytes: &[u8], layout: ContainerLayout) -> Result<Container> {
    let count = read_u32(bytes, 0).ok_or_else(|| malformed("missing file count"))? as usize;
    let table_end = count
        .checked_mul(ENTRY_SIZE)
        .and_then(|size| size.checked_add(4))
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            malformed(format!(
                "{} entries do not fit in {} bytes",
                count,
                bytes.len()
            ))
        })?;

    let mut spans = Vec::with_capacity(count);
    for index in 0..count {
        let entry = 4 + index * ENTRY_SIZE;
        let offset = read_u32(bytes, entry).unwrap_or_default() as usize;
        let length = read_u32(bytes, entry + 4).unwrap_or_default() as usize;
        if offset < table_end {
            return Err(malformed(format!(
                "sub-file {} at {:#x} starts inside the offset table",
                index, offset
            )));
        }
        let start = offset - table_end;
        spans.push(Span {
            start,
            end: start + length,
        });
    }

    let payload_end = table_end + spans.iter().map(|span| span.end).max().unwrap_or(0);
    if payload_end > bytes.len() {
        return Err(malformed(format!(
            "payloads end at {:#x}, beyond buffer of {:#x} bytes",
            payload_end,
            bytes.len()
        )));
    }

    let (lead, entries, order) =
        Container::entries_from_spans(&bytes[table_end..payload_end], &spans)?;

    Ok(Container {
        layout,
        header: Header::Packed,
        entries,
        order,
        lead,
        trailer: bytes[payload_end..].to_vec(),
    })
}

pub(super) fn serialize(container: &Container) -> Vec<u8> {
    let table_end = 4 + container.entries.len() * ENTRY_SIZE;
    let (region, spans) = container.layout_payloads(table_end);

    let mut out = Vec::with_capacity(table_end + region.len() + container.trailer.len());
    out.extend_from_slice(&(spans.len() as u32).to_le_bytes());
    for (start, end) in &spans {
        out.extend_from_slice(&(*start as u32).to_le_bytes());
        out.extend_from_slice(&((end - start) as u32).to_le_bytes());
    }
    out.extend_from_slice(&region);
    out.extend_from_slice(&container.trailer);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: ContainerLayout = ContainerLayout::Packed { alignment: 4 };

    fn header_lengths(bytes: &[u8]) -> Vec<u32> {
        let count = read_u32(bytes, 0).unwrap() as usize;
        (0..count)
            .map(|i| read_u32(bytes, 4 + i * 8 + 4).unwrap())
            .collect()
    }

    fn sample() -> Vec<u8> {
        // Three sub-files of 8, 0 and 12 bytes, then a 2-byte footer.
        let mut out = Vec::new();
        out.extend_from_slice(&3u32.to_le_bytes());
        for (offset, length) in [(28u32, 8u32), (36, 0), (36, 12)] {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&length.to_le_bytes());
        }
        out.extend_from_slice(&[0xA0; 8]);
        out.extend_from_slice(&[0xC0; 12]);
        out.extend_from_slice(&[0xEE, 0xEE]);
        out
    }

    #[test]
    fn test_scenario_lengths_after_replacement() {
        let raw = sample();
        let mut container = Container::parse(&raw, LAYOUT).unwrap();
        assert_eq!(container.len(), 3);
        assert!(container.get(1).unwrap().is_empty());
        assert_eq!(container.serialize(), raw);

        container.set(0, vec![0x55; 20]).unwrap();
        let out = container.serialize();
        assert_eq!(header_lengths(&out), vec![20, 0, 12]);
        assert_eq!(out.len(), raw.len() + 12);
        assert_eq!(&out[out.len() - 2..], &[0xEE, 0xEE]);

        let reparsed = Container::parse(&out, LAYOUT).unwrap();
        assert_eq!(reparsed.get(2).unwrap(), &[0xC0; 12]);
    }

    #[test]
    fn test_preserves_gap_before_first_payload() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&16u32.to_le_bytes());
        raw.extend_from_slice(&3u32.to_le_bytes());
        raw.extend_from_slice(&[0xFF; 4]);
        raw.extend_from_slice(&[1, 2, 3]);
        let container = Container::parse(&raw, LAYOUT).unwrap();
        assert_eq!(container.get(0).unwrap(), &[1, 2, 3]);
        assert_eq!(container.serialize(), raw);
    }

    #[test]
    fn test_rejects_inconsistent_tables() {
        // Count larger than the buffer can hold.
        let mut raw = sample();
        raw[0..4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            Container::parse(&raw, LAYOUT),
            Err(Error::MalformedContainer(_))
        ));

        // Length running past the end.
        let mut raw = sample();
        raw[4 + 2 * 8 + 4..4 + 2 * 8 + 8].copy_from_slice(&400u32.to_le_bytes());
        assert!(matches!(
            Container::parse(&raw, LAYOUT),
            Err(Error::MalformedContainer(_))
        ));

        // Offset pointing into the table.
        let mut raw = sample();
        raw[4..8].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            Container::parse(&raw, LAYOUT),
            Err(Error::MalformedContainer(_))
        ));

        assert!(Container::parse(&[1, 0], LAYOUT).is_err());
    }

    #[test]
    fn test_overlapping_sub_files_are_rejected() {
        let mut raw = sample();
        // Second file starts inside the first.
        raw[12..16].copy_from_slice(&30u32.to_le_bytes());
        assert!(matches!(
            Container::parse(&raw, LAYOUT),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_payloads_stored_out_of_index_order() {
        // Sub-file 1 is stored before sub-file 0.
        let mut raw = Vec::new();
        raw.extend_from_slice(&2u32.to_le_bytes());
        for (offset, length) in [(24u32, 4u32), (20, 4)] {
            raw.extend_from_slice(&offset.to_le_bytes());
            raw.extend_from_slice(&length.to_le_bytes());
        }
        raw.extend_from_slice(&[0xB1; 4]);
        raw.extend_from_slice(&[0xA0; 4]);

        let mut container = Container::parse(&raw, LAYOUT).unwrap();
        assert_eq!(container.get(0).unwrap(), &[0xA0; 4]);
        assert_eq!(container.get(1).unwrap(), &[0xB1; 4]);
        assert_eq!(container.serialize(), raw);

        container.set(1, vec![0xB2; 6]).unwrap();
        let out = container.serialize();
        assert_eq!(read_u32(&out, 4).unwrap(), 28);
        assert_eq!(read_u32(&out, 12).unwrap(), 20);
        let reparsed = Container::parse(&out, LAYOUT).unwrap();
        assert_eq!(reparsed.get(0).unwrap(), &[0xA0; 4]);
        assert_eq!(reparsed.get(1).unwrap(), &[0xB2; 6]);
    }
}
