//! CRC-32 checksums of binary components.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A standard CRC-32 (IEEE, reflected, as used by zip) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(pub u32);

impl Checksum {
    pub fn of(data: &[u8]) -> Self {
        Self(crc32(data))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let hex = s.trim().trim_start_matches("0x").trim_start_matches("0X");
        u32::from_str_radix(hex, 16)
            .map(Checksum)
            .map_err(|e| Error::InvalidChecksum(format!("'{}': {}", s, e)))
    }
}

impl TryFrom<String> for Checksum {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
