//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (cronflow-infra) implements. The core crate never depends on any
//! specific storage technology.
//!
//! Uniqueness guarantees (idempotency keys, one schedule run per planned
//! instant) are part of the contract: implementations must enforce them
//! atomically and report violations as `RepositoryError::Conflict`.

pub mod execution;
pub mod schedule;
pub mod workflow;
