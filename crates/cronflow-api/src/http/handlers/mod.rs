//! HTTP request handlers.

pub mod execution;
pub mod log;
pub mod run;
pub mod schedule;
pub mod trigger;
pub mod workflow;
