//! HTTP/REST API layer for cronflow.
//!
//! Axum-based admin API at `/api/v1/` with the envelope response format,
//! plus the bare `/workflow/run` endpoint and `/health`.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
