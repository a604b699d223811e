//! Persistence for rules, detections, and honeypot targets
//!
//! Records are stored as ordered JSON sequences behind the `Store` trait
//! so the detection engine stays testable without touching the
//! filesystem. Unreadable or malformed data always recovers to an empty
//! collection; startup never fails on store content.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::models::{Detection, Rule, Target};

/// Detections are capped to the most recent entries on every save.
pub const MAX_DETECTIONS: usize = 1000;

/// Load/save interface for the three persisted record sequences.
pub trait Store: Send + Sync {
    fn load_rules(&self) -> Result<Vec<Rule>>;
    fn save_rules(&self, rules: &[Rule]) -> Result<()>;

    fn load_detections(&self) -> Result<Vec<Detection>>;
    fn save_detections(&self, detections: &[Detection]) -> Result<()>;

    fn load_targets(&self) -> Result<Vec<Target>>;
    fn save_targets(&self, targets: &[Target]) -> Result<()>;
}

/// Flat-file store: one pretty-printed JSON file per record type under a
/// data directory.
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn rules_path(&self) -> PathBuf {
        self.dir.join("rules.json")
    }

    fn detections_path(&self) -> PathBuf {
        self.dir.join("detections.json")
    }

    fn targets_path(&self) -> PathBuf {
        self.dir.join("targets.json")
    }

    /// Read a JSON sequence, treating a missing or broken file as empty.
    fn load_seq<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Vec<T> {
        if !path.exists() {
            return Vec::new();
        }

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("failed to read {}: {e}", path.display());
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    "malformed data in {}, starting with empty collection: {e}",
                    path.display()
                );
                Vec::new()
            }
        }
    }

    fn save_seq<T: serde::Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create data directory {}", self.dir.display()))?;

        let json = serde_json::to_string_pretty(items)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.load_seq(&self.rules_path()))
    }

    fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        self.save_seq(&self.rules_path(), rules)
    }

    fn load_detections(&self) -> Result<Vec<Detection>> {
        Ok(self.load_seq(&self.detections_path()))
    }

    fn save_detections(&self, detections: &[Detection]) -> Result<()> {
        let start = detections.len().saturating_sub(MAX_DETECTIONS);
        self.save_seq(&self.detections_path(), &detections[start..])
    }

    fn load_targets(&self) -> Result<Vec<Target>> {
        Ok(self.load_seq(&self.targets_path()))
    }

    fn save_targets(&self, targets: &[Target]) -> Result<()> {
        self.save_seq(&self.targets_path(), targets)
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<Vec<Rule>>,
    detections: Mutex<Vec<Detection>>,
    targets: Mutex<Vec<Target>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: Vec<Target>) -> Self {
        let store = Self::new();
        *store.targets.lock().unwrap() = targets;
        store
    }
}

impl Store for MemoryStore {
    fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.lock().unwrap().clone())
    }

    fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        *self.rules.lock().unwrap() = rules.to_vec();
        Ok(())
    }

    fn load_detections(&self) -> Result<Vec<Detection>> {
        Ok(self.detections.lock().unwrap().clone())
    }

    fn save_detections(&self, detections: &[Detection]) -> Result<()> {
        let start = detections.len().saturating_sub(MAX_DETECTIONS);
        *self.detections.lock().unwrap() = detections[start..].to_vec();
        Ok(())
    }

    fn load_targets(&self) -> Result<Vec<Target>> {
        Ok(self.targets.lock().unwrap().clone())
    }

    fn save_targets(&self, targets: &[Target]) -> Result<()> {
        *self.targets.lock().unwrap() = targets.to_vec();
        Ok(())
    }
}
