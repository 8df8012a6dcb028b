//! Artifact registry derived from the output directory
//!
//! The registry is never persisted. Every [`ArtifactRegistry::build`] rescans
//! the four tier directories, so the registry always matches what is on disk.

use chrono::{DateTime, Utc};
use kiln_core::fail_open::fail_open_or;
use kiln_core::{ArtifactRecord, KilnError, Result, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File extension of an artifact source file
pub const ARTIFACT_EXTENSION: &str = "tsx";

/// Root of canonical import paths
pub const IMPORT_PREFIX: &str = "@/ui";

/// Directory holding one artifact: `<root>/<tier>/<name>`
pub fn artifact_dir(root: &Path, tier: Tier, name: &str) -> PathBuf {
    root.join(tier.dir_name()).join(name)
}

/// Source file of one artifact: `<root>/<tier>/<name>/<name>.tsx`
pub fn artifact_path(root: &Path, tier: Tier, name: &str) -> PathBuf {
    artifact_dir(root, tier, name).join(format!("{}.{}", name, ARTIFACT_EXTENSION))
}

/// Story file next to an artifact: `<root>/<tier>/<name>/<name>.stories.tsx`
pub fn story_path(root: &Path, tier: Tier, name: &str) -> PathBuf {
    artifact_dir(root, tier, name).join(format!("{}.stories.{}", name, ARTIFACT_EXTENSION))
}

/// Canonical import path of an artifact, a pure function of `(tier, name)`
pub fn import_path(tier: Tier, name: &str) -> String {
    format!("{}/{}/{}", IMPORT_PREFIX, tier.dir_name(), name)
}

/// Scan the four tier directories under `root`
///
/// Missing tier directories contribute nothing. Any other I/O error is logged
/// and the scan yields no records; it never aborts the caller.
pub fn scan(root: &Path) -> Vec<ArtifactRecord> {
    fail_open_or("registry::scan", Vec::new(), || try_scan(root))
}

fn try_scan(root: &Path) -> Result<Vec<ArtifactRecord>> {
    let mut records = Vec::new();

    for tier in Tier::ALL {
        let tier_dir = root.join(tier.dir_name());
        if !tier_dir.is_dir() {
            debug!(tier = %tier, "tier directory missing, skipping");
            continue;
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(&tier_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            // Only `<Name>/<Name>.tsx` counts; stories and helpers do not
            let path = artifact_path(root, tier, &name);
            if !path.is_file() {
                continue;
            }

            let modified = std::fs::metadata(&path)?.modified()?;
            found.push(ArtifactRecord {
                name,
                tier,
                path,
                added_at: DateTime::<Utc>::from(modified),
            });
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        records.extend(found);
    }

    debug!(root = %root.display(), count = records.len(), "registry scan complete");
    Ok(records)
}

/// Inventory of generated artifacts, grouped by tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRegistry {
    root: PathBuf,
    tiers: BTreeMap<Tier, Vec<ArtifactRecord>>,
    import_map: BTreeMap<String, String>,
}

impl ArtifactRegistry {
    /// Empty registry rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tiers: Tier::ALL.iter().map(|t| (*t, Vec::new())).collect(),
            import_map: BTreeMap::new(),
        }
    }

    /// Rebuild the registry from the filesystem
    pub fn build(root: &Path) -> Self {
        Self::from_records(root, scan(root))
    }

    /// Fold records into tiers, deriving import paths
    pub fn from_records(root: &Path, records: Vec<ArtifactRecord>) -> Self {
        let mut registry = Self::new(root);
        for record in records {
            registry.upsert(record);
        }
        registry
    }

    /// Insert a record, replacing an existing record with the same `(tier, name)` in place
    pub fn upsert(&mut self, record: ArtifactRecord) {
        let bucket = self.tiers.entry(record.tier).or_default();
        match bucket.iter_mut().find(|r| r.name == record.name) {
            Some(existing) => *existing = record,
            None => bucket.push(record),
        }
        self.rebuild_import_map();
    }

    /// Names resolve by tier priority, so duplicates keep the first tier's path
    fn rebuild_import_map(&mut self) {
        self.import_map.clear();
        for tier in Tier::ALL {
            for record in self.tiers.get(&tier).into_iter().flatten() {
                self.import_map
                    .entry(record.name.clone())
                    .or_insert_with(|| import_path(tier, &record.name));
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First artifact with `name`, searching elements, components, modules, icons
    pub fn find_by_name(&self, name: &str) -> Option<&ArtifactRecord> {
        Tier::ALL
            .iter()
            .flat_map(|tier| self.get_by_tier(*tier))
            .find(|r| r.name == name)
    }

    /// Like [`find_by_name`](Self::find_by_name) but an error when absent
    pub fn require(&self, name: &str) -> Result<&ArtifactRecord> {
        self.find_by_name(name)
            .ok_or_else(|| KilnError::Registry(format!("Artifact not found: {}", name)))
    }

    /// All artifacts in tier order
    pub fn get_all(&self) -> Vec<&ArtifactRecord> {
        Tier::ALL
            .iter()
            .flat_map(|tier| self.get_by_tier(*tier))
            .collect()
    }

    pub fn get_by_tier(&self, tier: Tier) -> &[ArtifactRecord] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn import_map(&self) -> &BTreeMap<String, String> {
        &self.import_map
    }

    pub fn import_path_of(&self, name: &str) -> Option<&str> {
        self.import_map.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tiers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-tier counts, in lookup order
    pub fn tier_counts(&self) -> Vec<(Tier, usize)> {
        Tier::ALL
            .iter()
            .map(|t| (*t, self.get_by_tier(*t).len()))
            .collect()
    }
}
