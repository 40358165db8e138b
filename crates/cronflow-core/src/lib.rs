//! Business logic and repository trait definitions for cronflow.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements. It depends only on `cronflow-types`
//! -- never on `cronflow-infra` or any database/IO crate.

pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
