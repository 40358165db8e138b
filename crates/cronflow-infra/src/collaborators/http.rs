//! reqwest-backed [`HttpCaller`] used by HTTP_REQUEST nodes.

use std::time::Duration;

use cronflow_core::workflow::collaborators::{
    CollaboratorError, CollaboratorFuture, HttpCaller, HttpRequest, HttpResponse,
};
use serde_json::Value;

/// Shared client; the per-request timeout comes from the node.
#[derive(Clone)]
pub struct ReqwestHttpCaller {
    client: reqwest::Client,
}

impl ReqwestHttpCaller {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Build the client every collaborator shares.
pub fn build_client(default_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(default_timeout)
        .user_agent(concat!("cronflow/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Map a reqwest failure onto the collaborator error space.
pub(crate) fn transport_error(err: reqwest::Error, url: &str, timeout: Duration) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout(timeout)
    } else {
        CollaboratorError::Transport(format!("request to '{url}' failed: {err}"))
    }
}

/// JSON when the body parses, the raw text otherwise, `null` when empty.
pub(crate) fn decode_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

impl HttpCaller for ReqwestHttpCaller {
    fn request(&self, request: HttpRequest) -> CollaboratorFuture<'_, HttpResponse> {
        Box::pin(async move {
            let method: reqwest::Method = request.method.to_uppercase().parse().map_err(|_| {
                CollaboratorError::Rejected(format!("invalid HTTP method: {}", request.method))
            })?;

            let mut builder = self
                .client
                .request(method, &request.url)
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| transport_error(e, &request.url, request.timeout))?;
            let status_code = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| transport_error(e, &request.url, request.timeout))?;

            tracing::debug!(
                url = request.url.as_str(),
                status = status_code,
                body_len = text.len(),
                "HTTP collaborator call completed"
            );

            Ok(HttpResponse {
                status_code,
                body: decode_body(text),
            })
        })
    }
}
