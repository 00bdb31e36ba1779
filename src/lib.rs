// src/lib.rs

//! Xcer Package Manager
//!
//! Package manager with a constraint-based dependency resolver and
//! transactional, conflict-checked installs.
//!
//! # Architecture
//!
//! - Index: immutable snapshot of available packages and their metadata
//! - Resolver: turns requests into ordered, satisfiable transaction plans
//! - Conflict checker: pure file-ownership validation before execution
//! - Engine: stage-then-commit execution with journaled rollback
//! - Store: durable installed state, replaced atomically on persist
//! - Cache: content-addressed archives, verified before publication

pub mod archive;
pub mod cache;
pub mod conflict;
pub mod engine;
mod error;
pub mod index;
pub mod plan;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod transport;
pub mod version;

pub use error::{Error, Result};
