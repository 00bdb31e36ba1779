// src/conflict.rs

//! File-ownership conflict checker
//!
//! A pure pass over a resolved plan and the installed-state store: no
//! archives are opened and nothing is mutated. Every path an incoming
//! package claims must be unclaimed at plan completion, either because
//! nobody owns it today or because its current owner departs in the same
//! plan.

use crate::error::{Error, Result};
use crate::plan::TransactionPlan;
use crate::store::InstalledStore;
use std::collections::BTreeMap;
use tracing::debug;

/// Verify that no two packages would own the same file once the plan
/// completes
pub fn check(plan: &TransactionPlan, store: &InstalledStore) -> Result<()> {
    let mut claimed: BTreeMap<&str, &str> = BTreeMap::new();

    for step in &plan.steps {
        let Some(package) = step.incoming() else {
            continue;
        };
        for path in &package.manifest {
            if let Some(first) = claimed.insert(path, &package.name) {
                if first != package.name {
                    return Err(Error::FileOwnershipConflict {
                        path: path.clone(),
                        first: first.to_string(),
                        second: package.name.clone(),
                    });
                }
            }
        }
    }

    for (path, claimer) in &claimed {
        if let Some(owner) = store.owner_of(path) {
            if owner.name != *claimer && !plan.departs(&owner.name) {
                return Err(Error::FileOwnershipConflict {
                    path: path.to_string(),
                    first: owner.name.clone(),
                    second: claimer.to_string(),
                });
            }
        }
    }

    debug!("No file-ownership conflicts across {} claimed path(s)", claimed.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Package;
    use crate::plan::Step;
    use crate::store::{record_for, InstalledStore};
    use crate::version::parse_version;

    fn package(name: &str, version: &str, manifest: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            version: parse_version(version).unwrap(),
            requires: Vec::new(),
            conflicts: Vec::new(),
            manifest: manifest.iter().map(|s| s.to_string()).collect(),
            checksum: String::new(),
            size: 0,
            location: String::new(),
        }
    }

    fn store_with(packages: &[&Package]) -> (tempfile::TempDir, InstalledStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = InstalledStore::load(dir.path().join("state.json")).unwrap();
        for package in packages {
            store.upsert(record_for(
                &package.name,
                &package.version,
                &package.manifest,
                &package.requires,
                &package.conflicts,
            ));
        }
        (dir, store)
    }

    #[test]
    fn test_disjoint_manifests_pass() {
        let a = package("a", "1.0.0", &["usr/bin/a"]);
        let b = package("b", "1.0.0", &["usr/bin/b"]);
        let (_dir, store) = store_with(&[]);

        let plan = TransactionPlan::new(vec![
            Step::Install { package: a },
            Step::Install { package: b },
        ]);
        assert!(check(&plan, &store).is_ok());
    }

    #[test]
    fn test_two_incoming_packages_claiming_same_path() {
        let a = package("a", "1.0.0", &["usr/share/common.dat"]);
        let b = package("b", "1.0.0", &["usr/share/common.dat"]);
        let (_dir, store) = store_with(&[]);

        let plan = TransactionPlan::new(vec![
            Step::Install { package: a },
            Step::Install { package: b },
        ]);
        match check(&plan, &store) {
            Err(Error::FileOwnershipConflict { path, first, second }) => {
                assert_eq!(path, "usr/share/common.dat");
                assert_eq!(first, "a");
                assert_eq!(second, "b");
            }
            other => panic!("expected FileOwnershipConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_installed_owner_blocks_incoming_claim() {
        let owner = package("owner", "1.0.0", &["etc/shared.conf"]);
        let incoming = package("incoming", "1.0.0", &["etc/shared.conf"]);
        let (_dir, store) = store_with(&[&owner]);

        let plan = TransactionPlan::new(vec![Step::Install { package: incoming }]);
        match check(&plan, &store) {
            Err(Error::FileOwnershipConflict { first, second, .. }) => {
                assert_eq!(first, "owner");
                assert_eq!(second, "incoming");
            }
            other => panic!("expected FileOwnershipConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_claim_allowed_when_owner_departs_in_same_plan() {
        let owner = package("owner", "1.0.0", &["etc/shared.conf"]);
        let incoming = package("incoming", "1.0.0", &["etc/shared.conf"]);
        let (_dir, store) = store_with(&[&owner]);

        let plan = TransactionPlan::new(vec![
            Step::Remove {
                record: store.get("owner").unwrap().clone(),
            },
            Step::Install { package: incoming },
        ]);
        assert!(check(&plan, &store).is_ok());
    }

    #[test]
    fn test_upgrade_keeps_its_own_paths() {
        let old = package("app", "1.0.0", &["usr/bin/app", "etc/app.conf"]);
        let new = package("app", "2.0.0", &["usr/bin/app"]);
        let (_dir, store) = store_with(&[&old]);

        let plan = TransactionPlan::new(vec![Step::Upgrade {
            from: store.get("app").unwrap().clone(),
            to: new,
        }]);
        assert!(check(&plan, &store).is_ok());
    }
}
