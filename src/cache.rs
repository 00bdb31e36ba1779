// src/cache.rs

//! Content-addressed archive cache
//!
//! Archives are stored under their SHA-256 checksum with a two-level
//! fanout (`objects/ab/abcdef...`). An entry only appears in the cache
//! after its checksum has been verified, and it is published with an
//! atomic rename, so a cached file is always complete and correct. A
//! cache hit never touches the transport.
//!
//! Concurrent fetches of the same checksum are serialized on a
//! per-checksum lock; the loser of the race finds the entry already
//! present and returns it. Fetches of different checksums proceed in
//! parallel.

use crate::archive;
use crate::error::{Error, Result};
use crate::index::Package;
use crate::transport::Transport;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct ArchiveCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArchiveCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Where an archive with this checksum lives once cached
    pub fn path_for(&self, checksum: &str) -> PathBuf {
        let (fanout, rest) = checksum.split_at(checksum.len().min(2));
        self.root.join("objects").join(fanout).join(rest)
    }

    /// Whether an archive with this checksum is already cached
    pub fn contains(&self, checksum: &str) -> bool {
        self.path_for(checksum).exists()
    }

    /// Return the cached archive for `package`, downloading and
    /// verifying it first if absent
    pub fn fetch(&self, package: &Package, transport: &dyn Transport) -> Result<PathBuf> {
        let guard = self.lock_for(&package.checksum);
        let _held = guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let entry = self.path_for(&package.checksum);
        if entry.exists() {
            debug!("Cache hit for {} ({})", package.name, package.checksum);
            return Ok(entry);
        }

        debug!(
            "Cache miss for {}, downloading from {}",
            package.name, package.location
        );
        self.download_verified(package, transport, &entry)?;
        Ok(entry)
    }

    fn download_verified(
        &self,
        package: &Package,
        transport: &dyn Transport,
        entry: &Path,
    ) -> Result<()> {
        let staging = self.root.join("tmp");
        std::fs::create_dir_all(&staging)?;
        let mut temp = tempfile::NamedTempFile::new_in(&staging)?;

        transport.download(&package.location, temp.as_file_mut())?;
        temp.as_file().sync_all()?;

        let actual = archive::sha256_file(temp.path())?;
        if actual != package.checksum {
            // NamedTempFile removes the partial download on drop
            warn!(
                "Discarding corrupt download for {}: expected {}, got {}",
                package.name, package.checksum, actual
            );
            return Err(Error::ChecksumMismatch {
                expected: package.checksum.clone(),
                actual,
            });
        }

        let parent = entry
            .parent()
            .ok_or_else(|| Error::state("cache entry path has no parent"))?;
        std::fs::create_dir_all(parent)?;
        temp.persist(entry)
            .map_err(|e| Error::state(format!("failed to publish cache entry: {}", e.error)))?;
        debug!("Cached {} at {}", package.name, entry.display());
        Ok(())
    }

    fn lock_for(&self, checksum: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(checksum.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FileTransport;
    use crate::version::parse_version;

    fn fixture(dir: &Path, name: &str, payload: &[u8]) -> Package {
        let location = format!("{}.tar.gz", name);
        std::fs::write(dir.join(&location), payload).unwrap();
        Package {
            name: name.to_string(),
            version: parse_version("1.0.0").unwrap(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            manifest: Vec::new(),
            checksum: archive::sha256_bytes(payload),
            size: payload.len() as u64,
            location,
        }
    }

    #[test]
    fn test_fetch_downloads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let package = fixture(&repo, "tool", b"archive bytes");

        let cache = ArchiveCache::new(dir.path().join("cache"));
        let transport = FileTransport::new(&repo);

        assert!(!cache.contains(&package.checksum));
        let path = cache.fetch(&package, &transport).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"archive bytes");
        assert!(cache.contains(&package.checksum));
    }

    #[test]
    fn test_cache_hit_skips_transport() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let package = fixture(&repo, "tool", b"archive bytes");

        let cache = ArchiveCache::new(dir.path().join("cache"));
        let transport = FileTransport::new(&repo);
        cache.fetch(&package, &transport).unwrap();

        // Deleting the source proves the second fetch never downloads
        std::fs::remove_file(repo.join(&package.location)).unwrap();
        let path = cache.fetch(&package, &transport).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"archive bytes");
    }

    #[test]
    fn test_checksum_mismatch_discards_download() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let mut package = fixture(&repo, "tool", b"actual bytes");
        package.checksum = archive::sha256_bytes(b"expected other bytes");

        let cache = ArchiveCache::new(dir.path().join("cache"));
        let transport = FileTransport::new(&repo);

        let result = cache.fetch(&package, &transport);
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
        assert!(!cache.contains(&package.checksum));
        // Nothing half-written left behind in the staging area
        let staged: Vec<_> = std::fs::read_dir(dir.path().join("cache/tmp"))
            .unwrap()
            .collect();
        assert!(staged.is_empty());
    }

    #[test]
    fn test_concurrent_fetches_of_same_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let package = fixture(&repo, "tool", b"shared payload");

        let cache = ArchiveCache::new(dir.path().join("cache"));
        let transport = FileTransport::new(&repo);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| cache.fetch(&package, &transport).unwrap()))
                .collect();
            for handle in handles {
                let path = handle.join().unwrap();
                assert_eq!(std::fs::read(path).unwrap(), b"shared payload");
            }
        });
    }
}
