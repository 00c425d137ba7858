//! Flat byte-diff patches and the repository they are looked up in.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};

const IPS_MAGIC: &[u8] = b"PATCH";
const IPS_EOF: u32 = 0x45_4F_46;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub origin: usize,
    pub data: Vec<u8>,
}

impl PatchRecord {
    pub fn end(&self) -> usize {
        self.origin + self.data.len()
    }
}

/// A named list of `(origin, bytes)` records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatPatch {
    pub id: String,
    pub records: Vec<PatchRecord>,
    /// Length to cut the target down to after the records are written.
    pub truncate: Option<usize>,
}

impl FlatPatch {
    pub fn new(id: impl Into<String>, records: Vec<PatchRecord>) -> Self {
        Self {
            id: id.into(),
            records,
            truncate: None,
        }
    }

    /// A patch with one record.
    pub fn single(id: impl Into<String>, origin: usize, data: Vec<u8>) -> Self {
        Self::new(id, vec![PatchRecord { origin, data }])
    }

    /// Parse an IPS file, including RLE records and the truncate extension.
    pub fn from_ips(id: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let id = id.into();
        let malformed = |message: String| Error::MalformedPatch(format!("{}: {}", id, message));

        if !bytes.starts_with(IPS_MAGIC) {
            return Err(malformed("missing PATCH header".to_string()));
        }

        let mut pos = IPS_MAGIC.len();
        let mut records = Vec::new();
        let be = |at: usize, len: usize| -> Option<u32> {
            let field = bytes.get(at..at + len)?;
            Some(field.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
        };

        loop {
            let offset = be(pos, 3).ok_or_else(|| malformed(format!("truncated at {:#x}", pos)))?;
            pos += 3;
            if offset == IPS_EOF {
                break;
            }

            let size = be(pos, 2)
                .ok_or_else(|| malformed(format!("truncated size at {:#x}", pos)))?
                as usize;
            pos += 2;

            let data = if size == 0 {
                let run = be(pos, 2)
                    .ok_or_else(|| malformed(format!("truncated RLE record at {:#x}", pos)))?
                    as usize;
                let value = *bytes
                    .get(pos + 2)
                    .ok_or_else(|| malformed(format!("truncated RLE record at {:#x}", pos)))?;
                pos += 3;
                vec![value; run]
            } else {
                let data = bytes
                    .get(pos..pos + size)
                    .ok_or_else(|| malformed(format!("record at {:#x} runs past the end", pos)))?
                    .to_vec();
                pos += size;
                data
            };

            records.push(PatchRecord {
                origin: offset as usize,
                data,
            });
        }

        let truncate = match bytes.len() - pos {
            0 => None,
            3 => be(pos, 3).map(|len| len as usize),
            extra => {
                return Err(malformed(format!("{} unexpected bytes after EOF", extra)));
            }
        };

        debug!("Parsed IPS patch {}: {} records", id, records.len());
        Ok(Self {
            id,
            records,
            truncate,
        })
    }

    /// Highest byte position any record touches.
    pub fn extent(&self) -> usize {
        self.records.iter().map(PatchRecord::end).max().unwrap_or(0)
    }

    /// Write every record into `buffer`.
    ///
    /// All records are bounds-checked first; on error the buffer is untouched.
    pub fn apply(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if let Some(record) = self.records.iter().find(|record| record.end() > buffer.len()) {
            return Err(Error::PatchOutOfBounds {
                origin: record.origin,
                len: record.data.len(),
                buffer_len: buffer.len(),
            });
        }

        for record in &self.records {
            buffer[record.origin..record.end()].copy_from_slice(&record.data);
        }
        if let Some(len) = self.truncate
            && len < buffer.len()
        {
            buffer.truncate(len);
        }
        Ok(())
    }
}

/// Where flat patches are looked up by id.
pub trait PatchSource {
    fn patch(&self, id: &str) -> Option<&FlatPatch>;
}

/// In-memory patch repository for one revision.
#[derive(Debug, Clone, Default)]
pub struct PatchTable {
    patches: BTreeMap<String, FlatPatch>,
}

impl PatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, patch: FlatPatch) {
        self.patches.insert(patch.id.clone(), patch);
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.patches.keys().map(String::as_str)
    }

    /// Read the IPS file for each `id -> file name` entry from `dir`.
    ///
    /// A listed file that does not exist leaves that id undefined.
    pub fn load_dir<P: AsRef<Path>>(dir: P, files: &BTreeMap<String, String>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut table = Self::new();

        for (id, file) in files {
            let path = dir.join(file);
            let bytes = match fs::read(&path).map_err(Error::from) {
                Ok(bytes) => bytes,
                Err(e) if e.is_file_not_found() => {
                    warn!("Patch {} not found at {}, skipping", id, path.display());
                    continue;
                }
                Err(e) => return Err(e),
            };
            table.insert(FlatPatch::from_ips(id.clone(), &bytes)?);
        }

        debug!("Loaded {} patches from {}", table.len(), dir.display());
        Ok(table)
    }
}

impl PatchSource for PatchTable {
    fn patch(&self, id: &str) -> Option<&FlatPatch> {
        self.patches.get(id)
    }
}

impl FromIterator<FlatPatch> for PatchTable {
    fn from_iter<I: IntoIterator<Item = FlatPatch>>(iter: I) -> Self {
        let mut table = Self::new();
        for patch in iter {
            table.insert(patch);
        }
        table
    }
}
