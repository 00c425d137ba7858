//! Byte-signature location inside opaque code blobs.
//!
//! Anchors for patches must resolve to exactly one match. A pattern that is
//! missing yields [`Error::NotFound`], one that occurs more than once yields
//! [`Error::Ambiguous`]; there is no first-match fallback.

use std::fmt;
use std::str::FromStr;

use memchr::memmem;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A decoded byte pattern, `None` entries match any byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature {
    bytes: Vec<Option<u8>>,
}

impl Signature {
    /// Parse hex text, either contiguous (`"4A6B00"`) or spaced (`"4A 6B ?? 00"`).
    pub fn parse(text: &str) -> Result<Self> {
        parse_pattern(text).map(|bytes| Self { bytes })
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.iter().copied().map(Some).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn has_wildcards(&self) -> bool {
        self.bytes.iter().any(Option::is_none)
    }

    pub fn pattern_bytes(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// Every offset where the pattern matches, ascending, overlapping matches included.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<usize> {
        if self.has_wildcards() {
            find_matches_with_wildcards(haystack, &self.bytes)
        } else {
            let exact: Vec<u8> = self.bytes.iter().flatten().copied().collect();
            find_all(haystack, &exact)
        }
    }

    /// The single offset of the pattern in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Result<usize> {
        self.find_after(haystack, 0)
    }

    /// The single offset of the pattern at or after `start`.
    pub fn find_after(&self, haystack: &[u8], start: usize) -> Result<usize> {
        if start > haystack.len() {
            return Err(Error::NotFound);
        }
        let matches: Vec<usize> = self
            .find_all(&haystack[start..])
            .into_iter()
            .map(|pos| pos + start)
            .collect();
        unique(&matches, || self.to_string())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Signature {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Signature> for String {
    fn from(value: Signature) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_pattern(&self.bytes))
    }
}

pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "?" {
            bytes.push(None);
            continue;
        }
        if token.len() % 2 != 0 {
            return Err(Error::InvalidPattern(format!(
                "'{}' is not a whole number of byte pairs",
                token
            )));
        }

        for pair in token.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair)
                .map_err(|_| Error::InvalidPattern(format!("non-ASCII token '{}'", token)))?;
            if pair == "??" {
                bytes.push(None);
                continue;
            }
            if !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::InvalidPattern(format!(
                    "invalid hex byte '{}' in '{}'",
                    pair, token
                )));
            }
            let value = u8::from_str_radix(pair, 16)
                .map_err(|e| Error::InvalidPattern(format!("'{}': {}", pair, e)))?;
            bytes.push(Some(value));
        }
    }

    if bytes.is_empty() {
        return Err(Error::InvalidPattern("pattern is empty".to_string()));
    }

    Ok(bytes)
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Every offset of `needle` in `haystack`, overlapping matches included.
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return Vec::new();
    }

    let finder = memmem::Finder::new(needle);
    let mut results = Vec::new();
    let mut pos = 0;
    while let Some(found) = finder.find(&haystack[pos..]) {
        results.push(pos + found);
        pos += found + 1;
        if pos > haystack.len() - needle.len() {
            break;
        }
    }
    results
}

/// The single offset of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Result<usize> {
    if needle.is_empty() {
        return Err(Error::InvalidPattern("pattern is empty".to_string()));
    }
    let matches = find_all(haystack, needle);
    unique(&matches, || format_pattern(&Signature::from_bytes(needle).bytes))
}

/// Decode `pattern` as hex text and locate its single occurrence.
pub fn find_hex(haystack: &[u8], pattern: &str) -> Result<usize> {
    Signature::parse(pattern)?.find(haystack)
}

/// First aligned run of `amount` bytes equal to `fill`, at or after `start`.
///
/// The byte just before the run must also be `fill`, so a terminator that
/// happens to equal the fill value is never claimed.
pub fn find_free_space(
    haystack: &[u8],
    fill: u8,
    amount: usize,
    start: usize,
    alignment: usize,
) -> Result<usize> {
    let alignment = alignment.max(1);
    if amount == 0 {
        return Err(Error::InvalidPattern("free space amount is zero".to_string()));
    }

    let mut pos = start.min(haystack.len());
    while pos < haystack.len() {
        let Some(run_start) = haystack[pos..].iter().position(|&b| b == fill) else {
            break;
        };
        let run_start = pos + run_start;
        let run_end = haystack[run_start..]
            .iter()
            .position(|&b| b != fill)
            .map_or(haystack.len(), |len| run_start + len);

        // A run that `start` lands inside is already preceded by fill.
        let first = if run_start > 0 && haystack[run_start - 1] == fill {
            run_start
        } else {
            run_start + 1
        };
        let candidate = first.div_ceil(alignment) * alignment;
        if candidate + amount <= run_end {
            debug!(
                "Free space: {} x {:02X} at {:#x} (run {:#x}..{:#x})",
                amount, fill, candidate, run_start, run_end
            );
            return Ok(candidate);
        }
        pos = run_end;
    }

    Err(Error::NotFound)
}

fn find_matches_with_wildcards(buffer: &[u8], pattern: &[Option<u8>]) -> Vec<usize> {
    if pattern.is_empty() || buffer.len() < pattern.len() {
        return Vec::new();
    }

    let mut results = Vec::new();
    let last = buffer.len() - pattern.len();

    'outer: for i in 0..=last {
        for (j, byte) in pattern.iter().enumerate() {
            if let Some(value) = byte
                && buffer[i + j] != *value
            {
                continue 'outer;
            }
        }
        results.push(i);
    }

    results
}

fn unique(matches: &[usize], describe: impl FnOnce() -> String) -> Result<usize> {
    match matches {
        [] => Err(Error::NotFound),
        [offset] => {
            debug!("Signature {} resolved at {:#x}", describe(), offset);
            Ok(*offset)
        }
        _ => {
            debug!(
                "Signature {} is ambiguous: {} matches (first {:#x})",
                describe(),
                matches.len(),
                matches[0]
            );
            Err(Error::Ambiguous {
                count: matches.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kib_buffer() -> Vec<u8> {
        (0..1024u32).map(|i| (i % 251) as u8 ^ 0x5A).collect()
    }

    #[test]
    fn test_parse_pattern_with_wildcards() {
        let bytes = parse_pattern("48 8D 0D ?? ?? ?? ??").unwrap();
        assert_eq!(bytes.len(), 7);
        assert_eq!(bytes[0], Some(0x48));
        assert_eq!(bytes[1], Some(0x8D));
        assert_eq!(bytes[2], Some(0x0D));
        assert_eq!(bytes[3], None);
    }

    #[test]
    fn test_parse_pattern_contiguous() {
        let bytes = parse_pattern("4A6B00ff").unwrap();
        assert_eq!(bytes, vec![Some(0x4A), Some(0x6B), Some(0x00), Some(0xFF)]);
    }

    #[test]
    fn test_parse_pattern_rejects_odd_length() {
        assert!(matches!(
            parse_pattern("4A6"),
            Err(Error::InvalidPattern(_))
        ));
        assert!(matches!(parse_pattern(""), Err(Error::InvalidPattern(_))));
        assert!(matches!(parse_pattern("ZZ"), Err(Error::InvalidPattern(_))));
        assert!(matches!(parse_pattern("+1"), Err(Error::InvalidPattern(_))));
    }

    #[test]
    fn test_format_pattern_roundtrip() {
        let pattern = vec![Some(0x48), Some(0x8D), Some(0x0D), None, Some(0xFF)];
        let formatted = format_pattern(&pattern);
        assert_eq!(formatted, "48 8D 0D ?? FF");
        let parsed = parse_pattern(&formatted).unwrap();
        assert_eq!(parsed, pattern);
    }

    #[test]
    fn test_find_unique_offset() {
        let mut buffer = kib_buffer();
        let pattern = [0xDE, 0xAD, 0xBE, 0xEF];
        buffer[512..516].copy_from_slice(&pattern);
        assert_eq!(find(&buffer, &pattern).unwrap(), 512);
    }

    #[test]
    fn test_find_duplicate_is_ambiguous() {
        let mut buffer = kib_buffer();
        let pattern = [0xDE, 0xAD, 0xBE, 0xEF];
        buffer[512..516].copy_from_slice(&pattern);
        buffer[768..772].copy_from_slice(&pattern);
        assert!(matches!(
            find(&buffer, &pattern),
            Err(Error::Ambiguous { count: 2 })
        ));
    }

    #[test]
    fn test_find_missing_is_not_found() {
        let buffer = vec![0u8; 64];
        assert!(matches!(find(&buffer, &[1, 2, 3]), Err(Error::NotFound)));
    }

    #[test]
    fn test_overlapping_matches_count_as_ambiguous() {
        let buffer = [0xAA; 5];
        assert_eq!(find_all(&buffer, &[0xAA; 4]), vec![0, 1]);
        assert!(matches!(
            find(&buffer, &[0xAA; 4]),
            Err(Error::Ambiguous { count: 2 })
        ));
    }

    #[test]
    fn test_wildcard_signature() {
        let buffer = [0x00, 0x10, 0x47, 0x99, 0x70, 0x47, 0x00];
        let sig = Signature::parse("47 ?? 70").unwrap();
        assert_eq!(sig.find(&buffer).unwrap(), 2);
    }

    #[test]
    fn test_find_after_skips_earlier_match() {
        let buffer = [1, 2, 3, 0, 1, 2, 3];
        let sig = Signature::from_bytes(&[1, 2, 3]);
        assert!(matches!(sig.find(&buffer), Err(Error::Ambiguous { .. })));
        assert_eq!(sig.find_after(&buffer, 1).unwrap(), 4);
        assert!(matches!(
            sig.find_after(&buffer, 5),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_find_hex() {
        let buffer = [0x00, 0x4A, 0x6B, 0x00, 0x12];
        assert_eq!(find_hex(&buffer, "4A6B00").unwrap(), 1);
        assert!(matches!(
            find_hex(&buffer, "4A6"),
            Err(Error::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_signature_serde_as_text() {
        let sig: Signature = serde_json::from_str("\"01 ?? 03\"").unwrap();
        assert_eq!(sig.len(), 3);
        assert_eq!(serde_json::to_string(&sig).unwrap(), "\"01 ?? 03\"");
    }

    #[test]
    fn test_find_free_space_requires_leading_fill() {
        let mut rom = vec![0x11u8; 64];
        for b in &mut rom[16..40] {
            *b = 0xFF;
        }
        // Run starts at 16, so the first usable aligned offset is 20.
        assert_eq!(find_free_space(&rom, 0xFF, 8, 0, 4).unwrap(), 20);
        assert_eq!(find_free_space(&rom, 0xFF, 8, 0, 1).unwrap(), 17);
        assert!(matches!(
            find_free_space(&rom, 0xFF, 24, 0, 1),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_find_free_space_from_inside_a_run() {
        let mut rom = vec![0x11u8; 64];
        rom[16..40].fill(0xFF);
        assert_eq!(find_free_space(&rom, 0xFF, 8, 24, 4).unwrap(), 24);
        assert_eq!(find_free_space(&rom, 0xFF, 16, 24, 1).unwrap(), 24);
        assert_eq!(find_free_space(&rom, 0xFF, 8, 16, 1).unwrap(), 17);
        assert!(matches!(
            find_free_space(&rom, 0xFF, 17, 24, 1),
            Err(Error::NotFound)
        ));
    }
}
