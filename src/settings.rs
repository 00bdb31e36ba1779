// src/settings.rs

//! Runtime settings: target root, state location, cache location
//!
//! Settings are plain values handed to the pieces that need them. The
//! defaults target the live system; tests and chroot-style installs point
//! everything under a private root instead.

use std::path::{Path, PathBuf};

/// Default target root for installs
pub const DEFAULT_ROOT: &str = "/";

/// Installed-state store location relative to the root
const STATE_RELATIVE: &str = "var/lib/xcer/state.json";

/// Archive cache location relative to the root
const CACHE_RELATIVE: &str = "var/cache/xcer";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory manifests are installed under
    pub root_dir: PathBuf,
    /// Installed-state store file
    pub state_path: PathBuf,
    /// Content-addressed archive cache directory
    pub cache_dir: PathBuf,
}

impl Settings {
    /// Settings for a target root, with optional overrides for the state
    /// and cache locations
    pub fn new(root: impl Into<PathBuf>, state: Option<PathBuf>, cache: Option<PathBuf>) -> Self {
        let root_dir = root.into();
        Self {
            state_path: state.unwrap_or_else(|| root_dir.join(STATE_RELATIVE)),
            cache_dir: cache.unwrap_or_else(|| root_dir.join(CACHE_RELATIVE)),
            root_dir,
        }
    }

    /// Everything derived from a single root directory
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self::new(root, None, None)
    }

    /// Directory holding the store, lock, and transaction marker
    fn state_dir(&self) -> &Path {
        self.state_path.parent().unwrap_or(Path::new("."))
    }

    /// Lock file taken for the duration of a transaction
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    /// Marker present while live mutations are in flight
    pub fn marker_path(&self) -> PathBuf {
        self.state_dir().join("transaction-in-progress")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_root(DEFAULT_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_root() {
        let settings = Settings::for_root("/tmp/target");
        assert_eq!(
            settings.state_path,
            PathBuf::from("/tmp/target/var/lib/xcer/state.json")
        );
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/target/var/cache/xcer"));
        assert_eq!(
            settings.marker_path(),
            PathBuf::from("/tmp/target/var/lib/xcer/transaction-in-progress")
        );
        assert_eq!(settings.lock_path(), PathBuf::from("/tmp/target/var/lib/xcer/lock"));
    }

    #[test]
    fn test_overrides_win() {
        let settings = Settings::new(
            "/",
            Some(PathBuf::from("/elsewhere/state.json")),
            Some(PathBuf::from("/elsewhere/cache")),
        );
        assert_eq!(settings.state_path, PathBuf::from("/elsewhere/state.json"));
        assert_eq!(settings.cache_dir, PathBuf::from("/elsewhere/cache"));
        assert_eq!(settings.lock_path(), PathBuf::from("/elsewhere/lock"));
    }
}
