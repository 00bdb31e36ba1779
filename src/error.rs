// src/error.rs

use thiserror::Error;

/// Core error types for Xcer
///
/// Resolver and conflict-checker errors are reported before any mutation
/// and are always safe to retry after the caller adjusts the request.
/// Engine errors during staging are equally safe; errors during commit
/// trigger an automatic rollback. `StatePersistence` with
/// `manual_intervention` set is the one case the system cannot self-heal.
#[derive(Error, Debug)]
pub enum Error {
    /// Two packages impose version constraints on the same name that no
    /// available version satisfies
    #[error(
        "Unsatisfiable constraint on '{name}': '{predicate}' required by '{required_by}' \
         conflicts with requirement from '{conflicts_with}'"
    )]
    ConstraintConflict {
        name: String,
        predicate: String,
        required_by: String,
        conflicts_with: String,
    },

    /// The requirement graph contains a cycle that makes a topological
    /// install order impossible
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// A package slated for removal still has installed dependents that
    /// are not part of the removal set
    #[error("Cannot remove '{name}': required by {}", .dependents.join(", "))]
    BlockedByDependents {
        name: String,
        dependents: Vec<String>,
    },

    /// Two packages declare a conflict but would both be installed at
    /// plan completion
    #[error("Package '{package}' conflicts with '{conflicts_with}'")]
    PackageConflict {
        package: String,
        conflicts_with: String,
    },

    /// Two packages claim ownership of the same file path
    #[error("File '{path}' is claimed by both '{first}' and '{second}'")]
    FileOwnershipConflict {
        path: String,
        first: String,
        second: String,
    },

    /// Downloaded or cached content does not match its expected checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A package's declared manifest names a file absent from its archive
    #[error("Package '{package}' declares '{path}' but the archive does not contain it")]
    ManifestMismatch { package: String, path: String },

    /// Another transaction holds the lock for this target root
    #[error("Another transaction is already running against '{0}'")]
    SystemLocked(String),

    /// Filesystem I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The installed-state store could not be read or written, or a
    /// failed rollback left the system needing manual repair
    #[error(
        "State persistence error{}: {message}",
        if *.manual_intervention { " (manual intervention required)" } else { "" }
    )]
    StatePersistence {
        message: String,
        manual_intervention: bool,
    },

    /// A requested package or dependency does not exist in the index
    #[error("Package '{0}' not found")]
    PackageNotFound(String),

    /// Transport-level download failure
    #[error("Download error: {0}")]
    Download(String),

    /// Malformed index, version, or predicate input
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Build a recoverable state-persistence error
    pub fn state(message: impl Into<String>) -> Self {
        Error::StatePersistence {
            message: message.into(),
            manual_intervention: false,
        }
    }

    /// Build a state-persistence error that requires manual intervention
    pub fn state_fatal(message: impl Into<String>) -> Self {
        Error::StatePersistence {
            message: message.into(),
            manual_intervention: true,
        }
    }

    /// Whether this error left the system in a state that cannot be
    /// healed by retrying
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(
            self,
            Error::StatePersistence {
                manual_intervention: true,
                ..
            }
        )
    }
}

/// Result type alias using Xcer's Error type
pub type Result<T> = std::result::Result<T, Error>;
