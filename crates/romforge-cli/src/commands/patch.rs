//! Patch command implementation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use romforge_core::{Checksum, FlatPatch, PatchApplier, PatchTable};
use tracing::info;

/// Run the patch command
///
/// The output file is written only after every record applied cleanly.
pub fn run(target: &Path, ips: &Path, output: &Path) -> Result<()> {
    let mut buffer =
        fs::read(target).with_context(|| format!("Failed to read {}", target.display()))?;
    let ips_bytes = fs::read(ips).with_context(|| format!("Failed to read {}", ips.display()))?;

    let id = ips
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "patch".to_string());
    let patch = FlatPatch::from_ips(id.clone(), &ips_bytes)?;
    let records = patch.records.len();
    let table: PatchTable = std::iter::once(patch).collect();

    let before = Checksum::of(&buffer);
    PatchApplier::new(&table)
        .apply_flat(&mut buffer, &id)
        .with_context(|| format!("Failed to apply {} to {}", id, target.display()))?;

    fs::write(output, &buffer).with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {} ({} bytes)", output.display(), buffer.len());
    println!(
        "Applied {} records: {} -> {}",
        records,
        before,
        Checksum::of(&buffer)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_writes_output_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("arm9.bin");
        let ips = dir.path().join("fast_text.ips");
        let output = dir.path().join("arm9_patched.bin");
        fs::write(&target, [0u8; 8]).unwrap();

        let mut patch = b"PATCH".to_vec();
        patch.extend_from_slice(&[0x00, 0x00, 0x02, 0x00, 0x02, 0xAB, 0xCD]);
        patch.extend_from_slice(b"EOF");
        fs::write(&ips, &patch).unwrap();

        run(&target, &ips, &output).unwrap();
        assert_eq!(
            fs::read(&output).unwrap(),
            vec![0, 0, 0xAB, 0xCD, 0, 0, 0, 0]
        );

        let mut oversized = b"PATCH".to_vec();
        oversized.extend_from_slice(&[0x00, 0x00, 0x07, 0x00, 0x02, 0xAB, 0xCD]);
        oversized.extend_from_slice(b"EOF");
        fs::write(&ips, &oversized).unwrap();
        let second = dir.path().join("second.bin");
        assert!(run(&target, &ips, &second).is_err());
        assert!(!second.exists());
    }
}
