//! Shared domain types for cronflow.
//!
//! Workflow definitions, triggers, schedules, executions, notifications,
//! configuration, and the repository error type shared by the core and
//! infrastructure crates.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod idempotency;
pub mod notification;
pub mod schedule;
pub mod workflow;
