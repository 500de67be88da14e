//! Backend registry for HerbTrace Farmer herb collection batches.
//!
//! Four components over one SQLite store: the batch registry itself, the
//! status timeline engine, geo-tag validation, and the per-batch media
//! attachment log. The HTTP layer in `api` exposes exactly those operations.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod model;
pub mod timeline;

pub use error::RegistryError;
