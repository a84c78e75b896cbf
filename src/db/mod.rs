//! Database module: persisted ad media records and SQL repositories.
//!
//! - `model`: partial-update and reporting shapes used by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `ad_media_pipeline::db` directly.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::AdMediaUpdate;
