//! Notification collaborators: webhook delivery and a log-only fallback.

use std::time::Duration;

use cronflow_core::workflow::collaborators::{CollaboratorError, CollaboratorFuture, Notifier};
use cronflow_types::notification::NotificationMessage;

use super::http::transport_error;

/// POSTs each message as JSON to a configured webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, message: NotificationMessage) -> CollaboratorFuture<'_, ()> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&message)
                .send()
                .await
                .map_err(|e| transport_error(e, &self.url, self.timeout))?;

            let status = response.status();
            if !status.is_success() {
                return Err(CollaboratorError::Rejected(format!(
                    "webhook returned {}",
                    status.as_u16()
                )));
            }

            tracing::info!(
                source_type = message.source_type.as_str(),
                source_id = message.source_id.as_str(),
                recipients = message.recipients.len(),
                "notification delivered"
            );
            Ok(())
        })
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: NotificationMessage) -> CollaboratorFuture<'_, ()> {
        Box::pin(async move {
            let channels: Vec<&str> = message
                .recipients
                .iter()
                .map(|r| r.channel_id.as_str())
                .collect();
            tracing::info!(
                subject = message.subject.as_str(),
                source_type = message.source_type.as_str(),
                source_id = message.source_id.as_str(),
                recipients = ?channels,
                "notification (log only)"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use cronflow_types::notification::Recipient;

    use crate::collaborators::http::build_client;
    use crate::collaborators::http::tests::serve;

    fn message() -> NotificationMessage {
        NotificationMessage {
            subject: "Welcome".to_string(),
            html_body: "<p>Hi</p>".to_string(),
            recipients: vec![Recipient::channel("ann@example.com")],
            source_type: "WORKFLOW".to_string(),
            source_id: "exec-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_webhook_posts_message() {
        let received: Arc<Mutex<Vec<NotificationMessage>>> = Arc::default();
        let router = Router::new()
            .route(
                "/notify",
                post(
                    |State(store): State<Arc<Mutex<Vec<NotificationMessage>>>>,
                     axum::Json(msg): axum::Json<NotificationMessage>| async move {
                        store.lock().unwrap().push(msg);
                        StatusCode::ACCEPTED
                    },
                ),
            )
            .with_state(received.clone());
        let base = serve(router).await;

        let notifier = WebhookNotifier::new(
            build_client(Duration::from_secs(5)).unwrap(),
            format!("{base}/notify"),
            Duration::from_secs(5),
        );
        notifier.send(message()).await.unwrap();

        let got = received.lock().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], message());
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_rejected() {
        let base = serve(Router::new().route(
            "/notify",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        let notifier = WebhookNotifier::new(
            build_client(Duration::from_secs(5)).unwrap(),
            format!("{base}/notify"),
            Duration::from_secs(5),
        );
        let err = notifier.send(message()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        LogNotifier.send(message()).await.unwrap();
    }
}
