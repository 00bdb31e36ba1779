// src/engine.rs

//! Transactional execution engine
//!
//! Applies a resolved, conflict-checked plan to the filesystem with
//! all-or-nothing semantics. Work is split into two phases:
//!
//! * staging: download (or reuse from cache) and extract every incoming
//!   archive into a private directory, verifying checksums and manifests.
//!   Nothing visible is touched; any failure aborts cleanly.
//! * commit: apply steps in plan order while journaling an undo action
//!   for every live mutation. On failure the journal is replayed in
//!   reverse, restoring removed files byte for byte from backups.
//!
//! The installed-state store is only persisted after all filesystem
//! mutations succeed, and the store file itself is replaced atomically,
//! so an interrupted transaction can diverge from the store by at most
//! the window between the last file operation and the store rename. A
//! marker file brackets that whole mutation window; if a previous run
//! died inside it, the engine refuses to start until the operator has
//! inspected the root and removed the marker.

use crate::archive;
use crate::cache::ArchiveCache;
use crate::error::{Error, Result};
use crate::plan::{Step, TransactionPlan};
use crate::settings::Settings;
use crate::store::{record_for, InstalledStore};
use crate::transport::Transport;
use fs4::FileExt;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lifecycle of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Planned,
    Staging,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Planned => "planned",
            TransactionState::Staging => "staging",
            TransactionState::Committing => "committing",
            TransactionState::Committed => "committed",
            TransactionState::RollingBack => "rolling-back",
            TransactionState::RolledBack => "rolled-back",
        };
        write!(f, "{}", name)
    }
}

/// One journaled live mutation, replayed in reverse on rollback
enum Undo {
    /// A file the commit placed; undo deletes it
    RemoveFile(PathBuf),
    /// A file the commit moved aside; undo moves it back
    RestoreFile { backup: PathBuf, dest: PathBuf },
    /// A directory the commit created; undo removes it if empty
    RemoveDir(PathBuf),
}

pub struct TransactionEngine<'a> {
    settings: &'a Settings,
    cache: &'a ArchiveCache,
    transport: &'a dyn Transport,
}

impl<'a> TransactionEngine<'a> {
    pub fn new(settings: &'a Settings, cache: &'a ArchiveCache, transport: &'a dyn Transport) -> Self {
        Self {
            settings,
            cache,
            transport,
        }
    }

    /// Apply a plan to the target root, updating `store` on success
    pub fn apply(&self, plan: &TransactionPlan, store: &mut InstalledStore) -> Result<()> {
        if plan.is_empty() {
            info!("Nothing to do");
            return Ok(());
        }

        let _lock = self.acquire_lock()?;
        self.refuse_if_interrupted()?;
        debug!("Transaction state: {}", TransactionState::Planned);

        info!("Transaction state: {}", TransactionState::Staging);
        let staging = tempfile::TempDir::new_in(self.parent_of_staging()?)?;
        let staged = self.stage(plan, staging.path())?;

        // Marker written before the first live mutation, cleared only
        // after the store rename. Its presence on a later run means a
        // commit or rollback died mid-flight.
        fs::write(self.settings.marker_path(), format!("{}\n", plan))?;

        info!("Transaction state: {}", TransactionState::Committing);
        let backups = tempfile::TempDir::new_in(self.parent_of_staging()?)?;
        let mut journal: Vec<Undo> = Vec::new();
        let mut next = store.clone();

        let commit = self.commit(plan, &staged, backups.path(), &mut journal, &mut next);
        match commit {
            Ok(()) => {}
            Err(e) => {
                warn!("Commit failed ({}), rolling back", e);
                info!("Transaction state: {}", TransactionState::RollingBack);
                self.rollback(journal)?;
                self.clear_marker();
                info!("Transaction state: {}", TransactionState::RolledBack);
                return Err(e);
            }
        }

        if let Err(e) = next.persist() {
            warn!("Store persist failed ({}), rolling back", e);
            info!("Transaction state: {}", TransactionState::RollingBack);
            self.rollback(journal)?;
            self.clear_marker();
            info!("Transaction state: {}", TransactionState::RolledBack);
            return Err(e);
        }

        *store = next;
        self.clear_marker();
        self.prune_departed_dirs(plan);

        info!(
            "Transaction state: {} ({} step(s))",
            TransactionState::Committed,
            plan.len()
        );
        Ok(())
    }

    /// Exclusive per-root lock; released when the returned handle drops
    fn acquire_lock(&self) -> Result<File> {
        let lock_path = self.settings.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::SystemLocked(self.settings.root_dir.display().to_string())
        })?;
        debug!("Acquired transaction lock at {}", lock_path.display());
        Ok(file)
    }

    /// Remove the transaction marker without letting a cleanup failure
    /// shadow the error the caller is about to report. A surviving
    /// marker only makes the next run refuse, which is the safe side.
    fn clear_marker(&self) {
        if let Err(e) = fs::remove_file(self.settings.marker_path()) {
            warn!("Could not remove transaction marker: {}", e);
        }
    }

    fn refuse_if_interrupted(&self) -> Result<()> {
        let marker = self.settings.marker_path();
        if marker.exists() {
            return Err(Error::state_fatal(format!(
                "interrupted transaction marker present at {}; inspect the target root, \
                 repair it, then remove the marker",
                marker.display()
            )));
        }
        Ok(())
    }

    fn parent_of_staging(&self) -> Result<&Path> {
        fs::create_dir_all(&self.settings.cache_dir)?;
        Ok(&self.settings.cache_dir)
    }

    /// Fetch and extract every incoming archive, verifying each declared
    /// manifest path exists in its archive
    fn stage(&self, plan: &TransactionPlan, staging: &Path) -> Result<Vec<PathBuf>> {
        let incoming: Vec<&crate::index::Package> =
            plan.steps.iter().filter_map(Step::incoming).collect();

        // Downloads of distinct archives proceed in parallel; the cache
        // serializes duplicates.
        let archives: Vec<PathBuf> = incoming
            .par_iter()
            .map(|package| self.cache.fetch(package, self.transport))
            .collect::<Result<_>>()?;

        let mut staged = Vec::with_capacity(incoming.len());
        for (package, archive_path) in incoming.into_iter().zip(archives) {
            let root = staging.join(format!("{}-{}", package.name, package.version));
            let extracted: BTreeSet<String> =
                archive::extract(&archive_path, &root)?.into_iter().collect();

            for path in &package.manifest {
                if !extracted.contains(path) {
                    return Err(Error::ManifestMismatch {
                        package: package.name.clone(),
                        path: path.clone(),
                    });
                }
            }
            debug!(
                "Staged {}-{} ({} file(s))",
                package.name,
                package.version,
                package.manifest.len()
            );
            staged.push(root);
        }
        Ok(staged)
    }

    /// Apply the plan's mutations, journaling an undo action per
    /// mutation. All outgoing files are moved aside before any incoming
    /// file lands: a plan may hand a path from a departing owner to an
    /// arriving package, and the steps' relative order says nothing
    /// about which side touches the path first.
    fn commit(
        &self,
        plan: &TransactionPlan,
        staged: &[PathBuf],
        backups: &Path,
        journal: &mut Vec<Undo>,
        next: &mut InstalledStore,
    ) -> Result<()> {
        let mut backup_seq = 0u64;

        for step in &plan.steps {
            let Some(record) = step.outgoing() else {
                continue;
            };
            if matches!(step, Step::Remove { .. }) {
                info!("Applying: {}", step);
            }
            for path in &record.manifest {
                let dest = self.settings.root_dir.join(path);
                if !dest.exists() {
                    warn!(
                        "File {} of {} already missing, skipping",
                        dest.display(),
                        record.name
                    );
                    continue;
                }
                let backup = backups.join(backup_seq.to_string());
                backup_seq += 1;
                move_file(&dest, &backup)?;
                journal.push(Undo::RestoreFile { backup, dest });
            }
            next.remove(&record.name);
        }

        let mut staged_iter = staged.iter();
        for step in &plan.steps {
            if let Some(package) = step.incoming() {
                info!("Applying: {}", step);
                let source_root = staged_iter
                    .next()
                    .ok_or_else(|| Error::state("staging inventory out of sync with plan"))?;

                for path in &package.manifest {
                    let dest = self.settings.root_dir.join(path);
                    if let Some(parent) = dest.parent() {
                        for created in ensure_dirs(parent)? {
                            journal.push(Undo::RemoveDir(created));
                        }
                    }
                    if dest.exists() {
                        // Unowned file in the way; preserve it so a
                        // rollback is exact.
                        let backup = backups.join(backup_seq.to_string());
                        backup_seq += 1;
                        move_file(&dest, &backup)?;
                        journal.push(Undo::RestoreFile {
                            backup,
                            dest: dest.clone(),
                        });
                    }
                    move_file(&source_root.join(path), &dest)?;
                    journal.push(Undo::RemoveFile(dest));
                }

                next.upsert(record_for(
                    &package.name,
                    &package.version,
                    &package.manifest,
                    &package.requires,
                    &package.conflicts,
                ));
            }
        }
        Ok(())
    }

    /// Replay the journal in reverse. A failure here leaves the root in
    /// an intermediate state only an operator can repair.
    fn rollback(&self, journal: Vec<Undo>) -> Result<()> {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::RemoveFile(path) => {
                    if let Err(e) = fs::remove_file(&path) {
                        if e.kind() != io::ErrorKind::NotFound {
                            return Err(Error::state_fatal(format!(
                                "rollback could not remove {}: {}",
                                path.display(),
                                e
                            )));
                        }
                    }
                }
                Undo::RestoreFile { backup, dest } => {
                    move_file(&backup, &dest).map_err(|e| {
                        Error::state_fatal(format!(
                            "rollback could not restore {}: {}",
                            dest.display(),
                            e
                        ))
                    })?;
                }
                Undo::RemoveDir(path) => {
                    // Only removed if nothing else moved in meanwhile
                    let _ = fs::remove_dir(&path);
                }
            }
        }
        info!("Rollback complete");
        Ok(())
    }

    /// Best-effort removal of directories emptied by departing packages
    fn prune_departed_dirs(&self, plan: &TransactionPlan) {
        for step in &plan.steps {
            let Some(record) = step.outgoing() else {
                continue;
            };
            for path in &record.manifest {
                let mut dir = self.settings.root_dir.join(path);
                while dir.pop() && dir.starts_with(&self.settings.root_dir) && dir != self.settings.root_dir
                {
                    if fs::remove_dir(&dir).is_err() {
                        break;
                    }
                    debug!("Pruned empty directory {}", dir.display());
                }
            }
        }
    }
}

/// Create `dir` and every missing ancestor, returning the directories
/// actually created, shallowest first
fn ensure_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = dir;
    while !cursor.exists() {
        missing.push(cursor.to_path_buf());
        match cursor.parent() {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    missing.reverse();
    for path in &missing {
        fs::create_dir(path)?;
    }
    Ok(missing)
}

/// Move a file, falling back to copy-then-remove when rename fails
/// across filesystems
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dest)?;
            fs::remove_file(src)?;
            Ok(())
        }
    }
}
