//! Checksum command implementation.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use romforge_core::Checksum;

/// Run the checksum command
pub fn run(files: &[PathBuf]) -> Result<()> {
    for path in files {
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        println!("{}  {}", Checksum::of(&data), path.display());
    }
    Ok(())
}
