use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::ChecksumRecord;
use crate::error::{Error, Result};

/// Everything known about one binary revision of one title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionProfile {
    /// Four-character game code, e.g. `IPKE`.
    pub code: String,
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub checksums: Vec<ChecksumRecord>,
    /// Patch id to IPS file name.
    #[serde(default)]
    pub patches: BTreeMap<String, String>,
    #[serde(default)]
    pub offsets: BTreeMap<String, usize>,
}

impl RevisionProfile {
    pub fn offset(&self, name: &str) -> Result<usize> {
        self.offsets
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownOffset(name.to_string()))
    }

    pub fn patch_file(&self, patch_id: &str) -> Option<&str> {
        self.patches.get(patch_id).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub profiles: Vec<RevisionProfile>,
}

impl ProfileSet {
    pub fn find(&self, code: &str, version: u32) -> Result<&RevisionProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.code.eq_ignore_ascii_case(code) && profile.version == version)
            .ok_or_else(|| Error::ProfileNotFound {
                code: code.to_string(),
                version,
            })
    }
}

pub fn load_profiles<P: AsRef<Path>>(path: P) -> Result<ProfileSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_profiles<P: AsRef<Path>>(path: P, profiles: &ProfileSet) -> Result<()> {
    let content = serde_json::to_string_pretty(profiles)?;
    fs::write(path, content)?;
    Ok(())
}
