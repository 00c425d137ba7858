//! Find and free-space command implementations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use romforge_core::{Error, Signature, find_free_space};

use super::hex_utils::format_hex_offset;

/// Run the find command
pub fn run(file: &Path, pattern: &str, all: bool, start: usize) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let signature: Signature = pattern.parse()?;

    println!(
        "Searching {} ({} bytes) for {} ({} bytes)",
        file.display(),
        data.len(),
        signature,
        signature.len()
    );

    if all {
        let matches: Vec<usize> = signature
            .find_all(data.get(start..).unwrap_or_default())
            .into_iter()
            .map(|offset| offset + start)
            .collect();
        for offset in &matches {
            println!("  {}", format_hex_offset(*offset));
        }
        println!("{} matches", matches.len());
        return Ok(());
    }

    match signature.find_after(&data, start) {
        Ok(offset) => println!("Found at {}", format_hex_offset(offset)),
        Err(Error::Ambiguous { count }) => {
            anyhow::bail!("Pattern matches {} times; use --all to list them", count)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Run the free-space command
pub fn run_free_space(
    file: &Path,
    amount: usize,
    fill: u8,
    start: usize,
    align: usize,
) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let offset = find_free_space(&data, fill, amount, start, align).with_context(|| {
        format!(
            "No run of {} x 0x{:02X} at or after {}",
            amount,
            fill,
            format_hex_offset(start)
        )
    })?;
    println!("{} free bytes at {}", amount, format_hex_offset(offset));
    Ok(())
}
