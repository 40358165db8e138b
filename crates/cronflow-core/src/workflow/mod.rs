//! Workflow engine core: definitions, execution, idempotency and scheduling.
//!
//! - `definition` -- YAML parsing and structural validation
//! - `graph` -- routing graph, cycle detection, compiled definitions
//! - `context` -- execution context with dotted-path access and snapshots
//! - `expression` -- JEXL evaluator for fields, routing and templates
//! - `node` -- per-node-type execution
//! - `engine` -- graph walk with per-node logging and timeouts
//! - `idempotency` -- key generator registry, one generator per strategy
//! - `tracker` -- execution claims against the unique idempotency key
//! - `runner` -- claim, execute, record
//! - `trigger` -- event-driven triggers
//! - `scheduler` -- schedule store and cron calculator
//! - `dispatch` -- periodic schedule dispatch
//! - `watchdog` -- stale execution recovery
//! - `jobs` -- periodic background loop
//! - `collaborators` -- HTTP, notification and data-resolution ports

pub mod collaborators;
pub mod context;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod idempotency;
pub mod jobs;
pub mod node;
pub mod runner;
pub mod scheduler;
pub mod tracker;
pub mod trigger;
pub mod watchdog;
