//! Revision gating: checksum every mutable component and compare the result
//! against the expectation table of a known revision.
//!
//! The gate is advisory. [`RevisionGate::validate`] answers yes or no and
//! [`RevisionGate::report`] says which components differ; what to do about a
//! mismatch is up to the caller.

mod profile;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checksum::Checksum;
use crate::error::{Error, Result};
use crate::image::ExecutableImage;

pub use profile::{ProfileSet, RevisionProfile, load_profiles, save_profiles};

/// A checksummed part of the ROM.
///
/// Text form: `arm9`, `overlay:<id>` or `file:<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComponentId {
    Primary,
    Overlay(u32),
    File(String),
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Primary => f.write_str("arm9"),
            ComponentId::Overlay(id) => write!(f, "overlay:{}", id),
            ComponentId::File(path) => write!(f, "file:{}", path),
        }
    }
}

impl FromStr for ComponentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "arm9" {
            return Ok(ComponentId::Primary);
        }
        if let Some(id) = s.strip_prefix("overlay:") {
            return id
                .parse()
                .map(ComponentId::Overlay)
                .map_err(|e| Error::InvalidComponent(format!("'{}': {}", s, e)));
        }
        match s.strip_prefix("file:") {
            Some(path) if !path.is_empty() => Ok(ComponentId::File(path.to_string())),
            _ => Err(Error::InvalidComponent(s.to_string())),
        }
    }
}

impl TryFrom<String> for ComponentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ComponentId> for String {
    fn from(value: ComponentId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub component: ComponentId,
    pub checksum: Checksum,
}

/// Actual checksums, one per component that was hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumSnapshot {
    records: BTreeMap<ComponentId, Checksum>,
}

impl ChecksumSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component: ComponentId, checksum: Checksum) {
        self.records.insert(component, checksum);
    }

    pub fn record(&mut self, component: ComponentId, data: &[u8]) {
        self.insert(component, Checksum::of(data));
    }

    pub fn get(&self, component: &ComponentId) -> Option<Checksum> {
        self.records.get(component).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentId, Checksum)> {
        self.records.iter().map(|(id, sum)| (id, *sum))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub component: ComponentId,
    pub expected: Checksum,
    pub actual: Checksum,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub matched: Vec<ComponentId>,
    pub mismatched: Vec<Mismatch>,
    /// Expected components with no actual checksum.
    pub missing: Vec<ComponentId>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }

    pub fn mismatch(&self, component: &ComponentId) -> Option<&Mismatch> {
        self.mismatched
            .iter()
            .find(|mismatch| &mismatch.component == component)
    }
}

#[derive(Debug, Clone)]
pub struct RevisionGate {
    expected: Vec<ChecksumRecord>,
}

impl RevisionGate {
    pub fn new(expected: Vec<ChecksumRecord>) -> Self {
        Self { expected }
    }

    pub fn from_profile(profile: &RevisionProfile) -> Self {
        Self::new(profile.checksums.clone())
    }

    pub fn expected(&self) -> &[ChecksumRecord] {
        &self.expected
    }

    /// Hash the primary blob, every expected overlay the image holds, and each tracked file.
    pub fn compute_actual(
        &self,
        image: &ExecutableImage,
        tracked_files: &[(&str, &[u8])],
    ) -> ChecksumSnapshot {
        let mut snapshot = ChecksumSnapshot::new();
        snapshot.record(ComponentId::Primary, image.primary());

        for record in &self.expected {
            if let ComponentId::Overlay(id) = record.component
                && let Ok(data) = image.overlay(id)
            {
                snapshot.record(ComponentId::Overlay(id), data);
            }
        }

        for (path, data) in tracked_files {
            snapshot.record(ComponentId::File((*path).to_string()), data);
        }

        debug!("Computed {} checksums", snapshot.len());
        snapshot
    }

    pub fn validate(&self, snapshot: &ChecksumSnapshot) -> bool {
        self.report(snapshot).is_valid()
    }

    pub fn report(&self, snapshot: &ChecksumSnapshot) -> ValidationReport {
        let mut report = ValidationReport::default();

        for record in &self.expected {
            match snapshot.get(&record.component) {
                Some(actual) if actual == record.checksum => {
                    report.matched.push(record.component.clone());
                }
                Some(actual) => {
                    warn!(
                        "Checksum mismatch for {}: expected {}, got {}",
                        record.component, record.checksum, actual
                    );
                    report.mismatched.push(Mismatch {
                        component: record.component.clone(),
                        expected: record.checksum,
                        actual,
                    });
                }
                None => {
                    warn!("No checksum computed for {}", record.component);
                    report.missing.push(record.component.clone());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_text_form() {
        for text in ["arm9", "overlay:12", "file:a/b/c.narc"] {
            let id: ComponentId = text.parse().unwrap();
            assert_eq!(id.to_string(), text);
        }
        assert!("overlay:x".parse::<ComponentId>().is_err());
        assert!("file:".parse::<ComponentId>().is_err());
        assert!("arm7".parse::<ComponentId>().is_err());
    }

    #[test]
    fn test_one_mismatch_is_identifiable() {
        let primary = vec![1u8, 2, 3, 4];
        let overlay = vec![5u8; 16];
        let mut image = ExecutableImage::new(primary.clone());
        image.insert_overlay(9, overlay.clone());

        let gate = RevisionGate::new(vec![
            ChecksumRecord {
                component: ComponentId::Primary,
                checksum: Checksum::of(&primary),
            },
            ChecksumRecord {
                component: ComponentId::Overlay(9),
                checksum: Checksum(0xDEAD_BEEF),
            },
        ]);

        let snapshot = gate.compute_actual(&image, &[]);
        assert!(!gate.validate(&snapshot));

        let report = gate.report(&snapshot);
        assert_eq!(report.matched, vec![ComponentId::Primary]);
        let mismatch = report.mismatch(&ComponentId::Overlay(9)).unwrap();
        assert_eq!(mismatch.actual, Checksum::of(&overlay));
        assert_eq!(mismatch.expected, Checksum(0xDEAD_BEEF));
    }

    #[test]
    fn test_missing_component_fails_and_extras_are_ignored() {
        let image = ExecutableImage::new(vec![0; 8]);
        let narc = [7u8; 12];
        let gate = RevisionGate::new(vec![
            ChecksumRecord {
                component: ComponentId::Overlay(3),
                checksum: Checksum(0),
            },
            ChecksumRecord {
                component: ComponentId::File("a/0/1/1".to_string()),
                checksum: Checksum::of(&narc),
            },
        ]);

        let tracked = [("a/0/1/1", &narc[..]), ("unlisted", &narc[..])];
        let snapshot = gate.compute_actual(&image, &tracked);
        assert_eq!(snapshot.len(), 3);
        let report = gate.report(&snapshot);
        assert_eq!(report.missing, vec![ComponentId::Overlay(3)]);
        assert_eq!(report.matched.len(), 1);
        assert!(!report.is_valid());

        let gate = RevisionGate::new(gate.expected()[1..].to_vec());
        assert!(gate.validate(&snapshot));
    }

    #[test]
    fn test_record_serde() {
        let record = ChecksumRecord {
            component: ComponentId::Overlay(1),
            checksum: Checksum(0x0123_ABCD),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"component":"overlay:1","checksum":"0123ABCD"}"#);
        let back: ChecksumRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
