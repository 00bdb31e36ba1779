// src/plan.rs

//! Transaction plan data structures
//!
//! A plan is an ordered list of steps the resolver guarantees to be
//! satisfiable in that order: a package never appears before its
//! dependencies, and a package is removed only after everything that
//! depends on it. The step kind set is closed and exhaustively matched.

use crate::index::Package;
use crate::store::InstalledRecord;
use crate::version::Version;
use std::fmt;

/// One operation in a transaction plan
#[derive(Debug, Clone)]
pub enum Step {
    /// Install a package that is not currently present
    Install { package: Package },
    /// Replace an installed version with a new one
    Upgrade {
        from: InstalledRecord,
        to: Package,
    },
    /// Remove an installed package
    Remove { record: InstalledRecord },
}

impl Step {
    /// Package name this step operates on
    pub fn name(&self) -> &str {
        match self {
            Step::Install { package } => &package.name,
            Step::Upgrade { to, .. } => &to.name,
            Step::Remove { record } => &record.name,
        }
    }

    /// The package arriving on the system, if any
    pub fn incoming(&self) -> Option<&Package> {
        match self {
            Step::Install { package } => Some(package),
            Step::Upgrade { to, .. } => Some(to),
            Step::Remove { .. } => None,
        }
    }

    /// The installed record leaving the system, if any
    pub fn outgoing(&self) -> Option<&InstalledRecord> {
        match self {
            Step::Install { .. } => None,
            Step::Upgrade { from, .. } => Some(from),
            Step::Remove { record } => Some(record),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Install { package } => {
                write!(f, "install {}-{}", package.name, package.version)
            }
            Step::Upgrade { from, to } => {
                write!(f, "upgrade {} {} -> {}", to.name, from.version, to.version)
            }
            Step::Remove { record } => {
                write!(f, "remove {}-{}", record.name, record.version)
            }
        }
    }
}

/// An ordered sequence of steps produced by the resolver
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    pub steps: Vec<Step>,
}

impl TransactionPlan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// The new version a plan establishes for `name`, if the plan
    /// installs or upgrades it
    pub fn incoming_version(&self, name: &str) -> Option<&Version> {
        self.steps.iter().find_map(|step| {
            step.incoming()
                .filter(|p| p.name == name)
                .map(|p| &p.version)
        })
    }

    /// Whether the plan removes or upgrades-away the installed `name`
    pub fn departs(&self, name: &str) -> bool {
        self.steps
            .iter()
            .any(|step| step.outgoing().is_some_and(|r| r.name == name))
    }
}

impl fmt::Display for TransactionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{:>3}. {}", i + 1, step)?;
        }
        Ok(())
    }
}
