//! Argument parsing helpers.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, anyhow};

/// Parse a hex offset string (with or without 0x prefix).
pub fn parse_hex_usize(s: &str) -> Result<usize> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    usize::from_str_radix(s, 16).map_err(|e| anyhow!("Invalid hex offset: {}", e))
}

pub fn parse_hex_byte(s: &str) -> Result<u8> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(s, 16).map_err(|e| anyhow!("Invalid hex byte: {}", e))
}

/// Parse `KEY=PATH`.
pub fn parse_key_value<K>(s: &str) -> Result<(K, PathBuf)>
where
    K: FromStr,
    K::Err: std::fmt::Display,
{
    let (key, path) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=PATH, got '{}'", s))?;
    let key = key
        .parse()
        .map_err(|e| anyhow!("Invalid key '{}': {}", key, e))?;
    Ok((key, PathBuf::from(path)))
}

/// Format an offset as a hex string with 0x prefix.
pub fn format_hex_offset(offset: usize) -> String {
    format!("0x{:X}", offset)
}
