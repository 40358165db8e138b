//! External collaborators called by workflow nodes.
//!
//! The engine talks to three capabilities it does not own: an HTTP client
//! (HTTP_REQUEST nodes), a notification sender (SEND_EMAIL nodes and watchdog
//! alerts), and a data resolver (DATA_PROCESSOR queries). Each is an
//! object-safe trait with boxed futures so implementations can be chosen at
//! startup and shared behind `Arc<dyn ...>`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use cronflow_types::notification::NotificationMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed future returned by collaborator methods.
pub type CollaboratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CollaboratorError>> + Send + 'a>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unknown prebuilt query '{0}'")]
    UnknownQuery(String),
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Response as stored in the context: body parsed as JSON when possible,
/// otherwise kept as a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

pub trait HttpCaller: Send + Sync {
    fn request(&self, request: HttpRequest) -> CollaboratorFuture<'_, HttpResponse>;
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub trait Notifier: Send + Sync {
    fn send(&self, message: NotificationMessage) -> CollaboratorFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// Data resolution
// ---------------------------------------------------------------------------

/// Answers prebuilt queries such as `active_students_for_institute`.
pub trait DataResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        prebuilt_key: &'a str,
        params: BTreeMap<String, Value>,
        context: &'a Value,
    ) -> CollaboratorFuture<'a, Value>;
}

/// The three collaborators as one bundle, cloned into services that need them.
#[derive(Clone)]
pub struct Collaborators {
    pub http: std::sync::Arc<dyn HttpCaller>,
    pub notifier: std::sync::Arc<dyn Notifier>,
    pub resolver: std::sync::Arc<dyn DataResolver>,
}
