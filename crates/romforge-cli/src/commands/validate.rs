//! Validate command implementation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use romforge_core::{ExecutableImage, RevisionGate, ValidationReport, load_profiles};
use tracing::{info, warn};

use crate::cli::ValidateArgs;

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Run the validate command, returning whether every checksum matched.
pub fn run(args: &ValidateArgs) -> Result<bool> {
    let profiles = load_profiles(&args.profiles)
        .with_context(|| format!("Failed to load profiles from {}", args.profiles.display()))?;
    let profile = profiles.find(&args.code, args.version)?;
    info!(
        "Validating against {} ({} v{})",
        profile.name, profile.code, profile.version
    );

    let primary = read(&args.arm9)?;
    let mut overlays = BTreeMap::new();
    for (id, path) in &args.overlays {
        overlays.insert(*id, read(path)?);
    }

    let image = match &args.overlay_table {
        Some(table) => ExecutableImage::load(primary, &read(table)?, overlays)?,
        None => {
            let mut image = ExecutableImage::new(primary);
            for (id, data) in overlays {
                image.insert_overlay(id, data);
            }
            image
        }
    };

    let mut files = Vec::with_capacity(args.files.len());
    for (name, path) in &args.files {
        files.push((name.as_str(), read(path)?));
    }
    let tracked: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(name, data)| (*name, data.as_slice()))
        .collect();

    let gate = RevisionGate::from_profile(profile);
    let snapshot = gate.compute_actual(&image, &tracked);
    let report = gate.report(&snapshot);
    print_report(&report);

    if !report.is_valid() {
        warn!("Revision check failed; patches may not apply to this image");
    }
    Ok(report.is_valid())
}

fn print_report(report: &ValidationReport) {
    for component in &report.matched {
        println!("  {}  {}", "OK      ".green(), component);
    }
    for mismatch in &report.mismatched {
        println!(
            "  {}  {} (expected {}, got {})",
            "MISMATCH".red(),
            mismatch.component,
            mismatch.expected,
            mismatch.actual
        );
    }
    for component in &report.missing {
        println!("  {}  {}", "MISSING ".yellow(), component);
    }

    if report.is_valid() {
        println!("{}", "Revision matches".green().bold());
    } else {
        println!(
            "{}",
            format!(
                "{} mismatched, {} missing",
                report.mismatched.len(),
                report.missing.len()
            )
            .red()
            .bold()
        );
    }
}
