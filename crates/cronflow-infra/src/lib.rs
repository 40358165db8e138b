//! Infrastructure layer for cronflow.
//!
//! Contains implementations of the repository traits defined in `cronflow-core`
//! (SQLite with WAL and split reader/writer pools), the reqwest-backed HTTP,
//! notification and data-resolution collaborators, and the `config.toml`
//! loader.

pub mod collaborators;
pub mod config;
pub mod sqlite;
