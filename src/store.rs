// src/store.rs

//! Installed-state store: the durable record of what is on the system
//!
//! One store per target root, passed by reference into resolver, checker,
//! and engine calls -- there is no ambient global. On disk the store is a
//! single JSON document replaced atomically on every persist (write to a
//! temporary file in the same directory, then rename), so a reader sees
//! either the last committed state or an explicit corruption error,
//! never a half-written file.

use crate::error::{Error, Result};
use crate::index::{ConflictSpec, DependencySpec};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Format version of the on-disk store document
const STORE_FORMAT: u32 = 1;

/// One installed package: name, version, and the exact manifest as
/// installed (which may differ from the current index if the index has
/// since moved on). Dependency and conflict constraints are recorded at
/// install time so removal requests and later resolutions can be
/// validated without consulting an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub name: String,
    #[serde(with = "crate::version::lenient")]
    pub version: Version,
    pub manifest: Vec<String>,
    #[serde(default)]
    pub requires: Vec<DependencySpec>,
    #[serde(default)]
    pub conflicts: Vec<ConflictSpec>,
    pub installed_at: DateTime<Utc>,
}

/// On-disk document shape
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    format: u32,
    packages: Vec<InstalledRecord>,
}

/// Durable mapping from package name to [`InstalledRecord`]
#[derive(Debug, Clone)]
pub struct InstalledStore {
    path: PathBuf,
    records: BTreeMap<String, InstalledRecord>,
}

impl InstalledStore {
    /// Load the store for a target root, or start empty if no store file
    /// exists yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            debug!("No installed-state store at {}, starting empty", path.display());
            return Ok(Self {
                path,
                records: BTreeMap::new(),
            });
        }

        let data = std::fs::read(&path)?;
        let doc: StoreDocument = serde_json::from_slice(&data).map_err(|e| {
            Error::state(format!(
                "installed-state store {} is corrupt: {}",
                path.display(),
                e
            ))
        })?;
        if doc.format != STORE_FORMAT {
            return Err(Error::state(format!(
                "installed-state store {} has unsupported format {}",
                path.display(),
                doc.format
            )));
        }

        let records = doc
            .packages
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect::<BTreeMap<_, _>>();
        debug!(
            "Loaded installed-state store with {} package(s) from {}",
            records.len(),
            path.display()
        );
        Ok(Self { path, records })
    }

    /// Persist the current state durably via atomic replace-on-write
    pub fn persist(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::state("store path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;

        let doc = StoreDocument {
            format: STORE_FORMAT,
            packages: self.records.values().cloned().collect(),
        };
        let payload = serde_json::to_vec_pretty(&doc)
            .map_err(|e| Error::state(format!("failed to encode store: {}", e)))?;

        // Temp file in the same directory so the rename stays on one
        // filesystem and is atomic.
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&payload)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)
            .map_err(|e| Error::state(format!("failed to replace store file: {}", e.error)))?;

        info!(
            "Persisted installed-state store ({} package(s))",
            self.records.len()
        );
        Ok(())
    }

    /// Path of the backing store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a record by package name
    pub fn get(&self, name: &str) -> Option<&InstalledRecord> {
        self.records.get(name)
    }

    /// Whether a package name is installed
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Iterate installed records in name order
    pub fn records(&self) -> impl Iterator<Item = &InstalledRecord> {
        self.records.values()
    }

    /// Number of installed packages
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no packages are installed
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The installed package owning `path`, if any
    pub fn owner_of(&self, path: &str) -> Option<&InstalledRecord> {
        self.records
            .values()
            .find(|record| record.manifest.iter().any(|p| p == path))
    }

    /// Installed packages whose recorded constraints name `name`
    pub fn direct_dependents(&self, name: &str) -> Vec<&InstalledRecord> {
        self.records
            .values()
            .filter(|record| record.requires.iter().any(|dep| dep.name == name))
            .collect()
    }

    /// Insert or replace a record (in memory only; call [`persist`] to
    /// make it durable)
    ///
    /// [`persist`]: InstalledStore::persist
    pub fn upsert(&mut self, record: InstalledRecord) {
        self.records.insert(record.name.clone(), record);
    }

    /// Remove a record by name, returning it if present
    pub fn remove(&mut self, name: &str) -> Option<InstalledRecord> {
        self.records.remove(name)
    }
}

/// Build an [`InstalledRecord`] for a package at install time
pub fn record_for(
    name: &str,
    version: &Version,
    manifest: &[String],
    requires: &[DependencySpec],
    conflicts: &[ConflictSpec],
) -> InstalledRecord {
    InstalledRecord {
        name: name.to_string(),
        version: version.clone(),
        manifest: manifest.to_vec(),
        requires: requires.to_vec(),
        conflicts: conflicts.to_vec(),
        installed_at: Utc::now(),
    }
}
