// src/index.rs

//! Package index: an immutable, in-memory snapshot of available packages
//!
//! The index is loaded once from a JSON document (a local file or a URL
//! fetched through the transport collaborator) and never mutated. Each
//! entry carries everything the resolver and engine need: dependency and
//! conflict constraints, the declared file manifest, the archive
//! checksum, and where to download the archive from.

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::version::{self, Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// A dependency constraint: package name plus optional version predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,
}

impl DependencySpec {
    pub fn new(name: impl Into<String>, version: Option<VersionReq>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Whether the given version satisfies this constraint
    pub fn accepts(&self, version: &Version) -> bool {
        match &self.version {
            Some(req) => req.matches(version),
            None => true,
        }
    }

    /// Human-readable predicate for error messages
    pub fn predicate_display(&self) -> String {
        match &self.version {
            Some(req) => req.to_string(),
            None => "*".to_string(),
        }
    }
}

/// A declared conflict: this package cannot coexist with `name`
/// (optionally restricted to versions matching the predicate)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionReq>,
}

impl ConflictSpec {
    /// Whether an installed `name@version` triggers this conflict
    pub fn applies_to(&self, name: &str, version: &Version) -> bool {
        if self.name != name {
            return false;
        }
        match &self.version {
            Some(req) => req.matches(version),
            None => true,
        }
    }
}

/// One available package in a repository snapshot. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(with = "version::lenient")]
    pub version: Version,
    #[serde(default)]
    pub requires: Vec<DependencySpec>,
    #[serde(default)]
    pub conflicts: Vec<ConflictSpec>,
    /// Relative paths this package will own under the target root
    pub manifest: Vec<String>,
    /// SHA-256 of the archive, lowercase hex
    pub checksum: String,
    /// Archive size in bytes
    pub size: u64,
    /// Where the transport collaborator can fetch the archive
    pub location: String,
}

/// Index document as shipped by a repository
#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    name: String,
    packages: Vec<Package>,
}

/// Immutable view over all available package metadata
///
/// Candidates for each name are held sorted by descending version so the
/// "highest satisfying version" lookup is a linear scan that stops at
/// the first hit.
#[derive(Debug)]
pub struct PackageIndex {
    name: String,
    packages: BTreeMap<String, Vec<Package>>,
}

impl PackageIndex {
    /// Build an index from a list of packages (fixtures and tests)
    pub fn from_packages(name: impl Into<String>, packages: Vec<Package>) -> Self {
        let mut by_name: BTreeMap<String, Vec<Package>> = BTreeMap::new();
        for package in packages {
            by_name.entry(package.name.clone()).or_default().push(package);
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| b.version.cmp(&a.version));
        }
        Self {
            name: name.into(),
            packages: by_name,
        }
    }

    /// Load an index from a JSON reader
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let doc: IndexDocument = serde_json::from_reader(reader)
            .map_err(|e| Error::Parse(format!("invalid package index: {}", e)))?;
        let index = Self::from_packages(doc.name, doc.packages);
        info!(
            "Loaded index '{}' with {} package name(s)",
            index.name,
            index.packages.len()
        );
        Ok(index)
    }

    /// Load an index from a local JSON file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading package index from {}", path.display());
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Fetch an index through the transport collaborator
    pub fn fetch(location: &str, transport: &dyn Transport) -> Result<Self> {
        debug!("Fetching package index from {}", location);
        let mut buffer = Vec::new();
        transport.download(location, &mut buffer)?;
        Self::from_reader(buffer.as_slice())
    }

    /// Repository snapshot name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All candidates for a name, highest version first
    pub fn candidates(&self, name: &str) -> &[Package] {
        self.packages.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether any version of `name` exists in the snapshot
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Exact lookup of `name@version`
    pub fn get(&self, name: &str, version: &Version) -> Option<&Package> {
        self.candidates(name).iter().find(|p| &p.version == version)
    }

    /// Highest version of `name` satisfying every predicate in `preds`
    pub fn best_match<'a>(&self, name: &str, preds: &[&'a VersionReq]) -> Option<&Package> {
        self.candidates(name)
            .iter()
            .find(|p| preds.iter().all(|req| req.matches(&p.version)))
    }

    /// Highest available version of `name`, ignoring constraints
    pub fn latest(&self, name: &str) -> Option<&Package> {
        self.candidates(name).first()
    }

    /// All package names in the snapshot, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Substring search over package names
    pub fn search(&self, term: &str) -> Vec<&Package> {
        let needle = term.to_lowercase();
        self.packages
            .iter()
            .filter(|(name, _)| name.to_lowercase().contains(&needle))
            .filter_map(|(_, candidates)| candidates.first())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{parse_predicate, parse_version};

    pub(crate) fn package(name: &str, version: &str) -> Package {
        Package {
            name: name.to_string(),
            version: parse_version(version).unwrap(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            manifest: vec![format!("usr/bin/{}", name)],
            checksum: format!("{}-{}-checksum", name, version),
            size: 1024,
            location: format!("https://example.com/{}-{}.tar.gz", name, version),
        }
    }

    #[test]
    fn test_candidates_sorted_descending() {
        let index = PackageIndex::from_packages(
            "test",
            vec![package("a", "1.0.0"), package("a", "2.0.0"), package("a", "1.5.0")],
        );
        let versions: Vec<String> = index
            .candidates("a")
            .iter()
            .map(|p| p.version.to_string())
            .collect();
        assert_eq!(versions, vec!["2.0.0", "1.5.0", "1.0.0"]);
    }

    #[test]
    fn test_best_match_honors_all_predicates() {
        let index = PackageIndex::from_packages(
            "test",
            vec![package("a", "1.0.0"), package("a", "2.0.0"), package("a", "3.0.0")],
        );

        let lower = parse_predicate(">=1.5").unwrap();
        let upper = parse_predicate("<3.0").unwrap();
        let best = index.best_match("a", &[&lower, &upper]).unwrap();
        assert_eq!(best.version.to_string(), "2.0.0");

        let impossible = parse_predicate(">=4.0").unwrap();
        assert!(index.best_match("a", &[&impossible]).is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{
            "name": "main",
            "packages": [
                {
                    "name": "app",
                    "version": "1.2",
                    "requires": [{"name": "lib", "version": ">=2.0"}],
                    "manifest": ["usr/bin/app"],
                    "checksum": "abc123",
                    "size": 4096,
                    "location": "https://example.com/app-1.2.tar.gz"
                },
                {
                    "name": "lib",
                    "version": "2.1.0",
                    "manifest": ["usr/lib/liblib.so"],
                    "checksum": "def456",
                    "size": 2048,
                    "location": "https://example.com/lib-2.1.0.tar.gz"
                }
            ]
        }"#;

        let index = PackageIndex::from_reader(json.as_bytes()).unwrap();
        assert_eq!(index.name(), "main");

        let app = index.latest("app").unwrap();
        assert_eq!(app.version, parse_version("1.2.0").unwrap());
        assert_eq!(app.requires.len(), 1);
        assert_eq!(app.requires[0].name, "lib");
        assert!(app.requires[0].accepts(&parse_version("2.1.0").unwrap()));
        assert!(!app.requires[0].accepts(&parse_version("1.9.0").unwrap()));
        assert!(app.conflicts.is_empty());
    }

    #[test]
    fn test_malformed_index_is_rejected() {
        let result = PackageIndex::from_reader(&b"{\"oops\": true}"[..]);
        assert!(matches!(result, Err(crate::Error::Parse(_))));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let index = PackageIndex::from_packages(
            "test",
            vec![package("nginx", "1.0.0"), package("redis", "6.0.0")],
        );
        let hits = index.search("NGI");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "nginx");
        assert!(index.search("zzz").is_empty());
    }

    #[test]
    fn test_conflict_spec_version_gate() {
        let spec = ConflictSpec {
            name: "other".to_string(),
            version: Some(parse_predicate("<2.0").unwrap()),
        };
        assert!(spec.applies_to("other", &parse_version("1.5.0").unwrap()));
        assert!(!spec.applies_to("other", &parse_version("2.5.0").unwrap()));
        assert!(!spec.applies_to("unrelated", &parse_version("1.5.0").unwrap()));
    }
}
