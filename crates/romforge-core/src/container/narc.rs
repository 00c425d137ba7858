//! Nitro archive (`NARC`) layout.
//!
//! ```text
//! 0x00  "NARC"  bom:u16  version:u16  file_size:u32  header_size:u16  sections:u16
//! BTAF  size:u32  count:u16  reserved:u16  (start:u32 end:u32) * count
//! BTNF  size:u32  name table (kept verbatim)
//! GMIF  size:u32  payloads, offsets relative to the start of this data
//! ```

use super::{Container, ContainerLayout, Header, Span};
use crate::byteio::{read_u16, read_u32};
use crate::error::{Error, Result};

pub const NARC_MAGIC: &[u8; 4] = b"NARC";
const FAT_MAGIC: &[u8; 4] = b"BTAF";
const FNT_MAGIC: &[u8; 4] = b"BTNF";
const IMG_MAGIC: &[u8; 4] = b"GMIF";

pub(super) const ALIGNMENT: usize = 4;
const HEADER_SIZE: usize = 0x10;
const SECTION_HEADER_SIZE: usize = 8;
const FAT_ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct NarcHeader {
    bom: u16,
    version: u16,
    section_count: u16,
    /// Header bytes past the standard 16 when `header_size` is larger.
    header_extra: Vec<u8>,
    fat_reserved: u16,
    fat_tail: Vec<u8>,
    /// Whole `BTNF` section, header included.
    fnt_section: Vec<u8>,
    /// Sections between `GMIF` and the declared file size.
    extra_sections: Vec<u8>,
}

impl Default for NarcHeader {
    fn default() -> Self {
        // Root directory only: first-file id 0, one directory.
        let mut fnt_section = Vec::with_capacity(16);
        fnt_section.extend_from_slice(FNT_MAGIC);
        fnt_section.extend_from_slice(&16u32.to_le_bytes());
        fnt_section.extend_from_slice(&[0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);

        Self {
            bom: 0xFFFE,
            version: 0x0100,
            section_count: 3,
            header_extra: Vec::new(),
            fat_reserved: 0,
            fat_tail: Vec::new(),
            fnt_section,
            extra_sections: Vec::new(),
        }
    }
}

fn malformed(message: impl Into<String>) -> Error {
    Error::MalformedContainer(format!("NARC: {}", message.into()))
}

/// Read a section header at `pos`, returning its declared size.
fn section(bytes: &[u8], pos: usize, magic: &[u8; 4], limit: usize) -> Result<usize> {
    let tag = bytes
        .get(pos..pos + 4)
        .ok_or_else(|| malformed(format!("truncated before section at {:#x}", pos)))?;
    if tag != magic {
        return Err(malformed(format!(
            "expected {} at {:#x}, found {:02X?}",
            String::from_utf8_lossy(magic),
            pos,
            tag
        )));
    }
    let size = read_u32(bytes, pos + 4)
        .ok_or_else(|| malformed(format!("truncated section size at {:#x}", pos + 4)))?
        as usize;
    if size < SECTION_HEADER_SIZE || pos + size > limit {
        return Err(malformed(format!(
            "{} section size {:#x} at {:#x} does not fit in {:#x} bytes",
            String::from_utf8_lossy(magic),
            size,
            pos,
            limit
        )));
    }
    Ok(size)
}

pub(super) fn parse(bytes: &[u8]) -> Result<Container> {
    if bytes.len() < HEADER_SIZE || &bytes[0..4] != NARC_MAGIC {
        return Err(malformed("missing NARC header"));
    }

    // Header fields are in bounds after the length check above.
    let bom = read_u16(bytes, 4).unwrap_or_default();
    let version = read_u16(bytes, 6).unwrap_or_default();
    let file_size = read_u32(bytes, 8).unwrap_or_default() as usize;
    let header_size = read_u16(bytes, 12).unwrap_or_default() as usize;
    let section_count = read_u16(bytes, 14).unwrap_or_default();

    if file_size > bytes.len() {
        return Err(malformed(format!(
            "declared size {:#x} exceeds buffer of {:#x} bytes",
            file_size,
            bytes.len()
        )));
    }
    if header_size < HEADER_SIZE || header_size > file_size {
        return Err(malformed(format!("invalid header size {:#x}", header_size)));
    }

    let fat_pos = header_size;
    let fat_size = section(bytes, fat_pos, FAT_MAGIC, file_size)?;
    if fat_size < SECTION_HEADER_SIZE + 4 {
        return Err(malformed("BTAF section too small for its file count"));
    }
    let count = read_u16(bytes, fat_pos + 8).unwrap_or_default() as usize;
    let fat_reserved = read_u16(bytes, fat_pos + 10).unwrap_or_default();
    let table_end = fat_pos + SECTION_HEADER_SIZE + 4 + count * FAT_ENTRY_SIZE;
    if table_end > fat_pos + fat_size {
        return Err(malformed(format!(
            "BTAF declares {} files but holds only {:#x} bytes",
            count, fat_size
        )));
    }

    let spans: Vec<Span> = (0..count)
        .map(|i| {
            let entry = fat_pos + SECTION_HEADER_SIZE + 4 + i * FAT_ENTRY_SIZE;
            Span {
                start: read_u32(bytes, entry).unwrap_or_default() as usize,
                end: read_u32(bytes, entry + 4).unwrap_or_default() as usize,
            }
        })
        .collect();
    let fat_tail = bytes[table_end..fat_pos + fat_size].to_vec();

    let fnt_pos = fat_pos + fat_size;
    let fnt_size = section(bytes, fnt_pos, FNT_MAGIC, file_size)?;
    let fnt_section = bytes[fnt_pos..fnt_pos + fnt_size].to_vec();

    let img_pos = fnt_pos + fnt_size;
    let img_size = section(bytes, img_pos, IMG_MAGIC, file_size)?;
    let region = &bytes[img_pos + SECTION_HEADER_SIZE..img_pos + img_size];

    let (lead, entries, order) = Container::entries_from_spans(region, &spans)?;
    let img_end = img_pos + img_size;

    Ok(Container {
        layout: ContainerLayout::Narc,
        header: Header::Narc(NarcHeader {
            bom,
            version,
            section_count,
            header_extra: bytes[HEADER_SIZE..header_size].to_vec(),
            fat_reserved,
            fat_tail,
            fnt_section,
            extra_sections: bytes[img_end..file_size].to_vec(),
        }),
        entries,
        order,
        lead,
        trailer: bytes[file_size..].to_vec(),
    })
}

pub(super) fn serialize(container: &Container, header: &NarcHeader) -> Vec<u8> {
    let (region, spans) = container.layout_payloads(0);
    let header_size = HEADER_SIZE + header.header_extra.len();
    let fat_size = SECTION_HEADER_SIZE + 4 + spans.len() * FAT_ENTRY_SIZE + header.fat_tail.len();
    let img_size = SECTION_HEADER_SIZE + region.len();
    let file_size =
        header_size + fat_size + header.fnt_section.len() + img_size + header.extra_sections.len();

    let mut out = Vec::with_capacity(file_size + container.trailer.len());
    out.extend_from_slice(NARC_MAGIC);
    out.extend_from_slice(&header.bom.to_le_bytes());
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&(file_size as u32).to_le_bytes());
    out.extend_from_slice(&(header_size as u16).to_le_bytes());
    out.extend_from_slice(&header.section_count.to_le_bytes());
    out.extend_from_slice(&header.header_extra);

    out.extend_from_slice(FAT_MAGIC);
    out.extend_from_slice(&(fat_size as u32).to_le_bytes());
    out.extend_from_slice(&(spans.len() as u16).to_le_bytes());
    out.extend_from_slice(&header.fat_reserved.to_le_bytes());
    for (start, end) in &spans {
        out.extend_from_slice(&(*start as u32).to_le_bytes());
        out.extend_from_slice(&(*end as u32).to_le_bytes());
    }
    out.extend_from_slice(&header.fat_tail);

    out.extend_from_slice(&header.fnt_section);

    out.extend_from_slice(IMG_MAGIC);
    out.extend_from_slice(&(img_size as u32).to_le_bytes());
    out.extend_from_slice(&region);

    out.extend_from_slice(&header.extra_sections);
    debug_assert_eq!(out.len(), file_size);
    out.extend_from_slice(&container.trailer);
    out
}
