//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models assembled from query results.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `herbtrace_registry::db` — we
//! re-export the repository API and commonly used models for convenience.

pub mod model;
pub mod repo;

pub use model::BatchDetail;
pub use repo::*;
