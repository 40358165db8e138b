//! Live implementations of the collaborator traits from `cronflow-core`.
//!
//! All of them share one `reqwest::Client`; which notifier and resolver are
//! used depends on `[notifications]` and `[resolver]` in `config.toml`.

pub mod http;
pub mod notifier;
pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use cronflow_core::workflow::collaborators::{Collaborators, DataResolver, Notifier};
use cronflow_types::config::EngineConfig;

use self::http::{ReqwestHttpCaller, build_client};
use self::notifier::{LogNotifier, WebhookNotifier};
use self::resolver::{HttpDataResolver, StaticDataResolver};

/// Wire collaborators from configuration.
///
/// A webhook URL selects [`WebhookNotifier`], otherwise notifications are
/// logged. A resolver base URL selects [`HttpDataResolver`], otherwise the
/// static result map answers.
pub fn build_collaborators(config: &EngineConfig) -> Result<Collaborators, reqwest::Error> {
    let timeout = Duration::from_secs(config.execution.http_timeout_secs.max(1));
    let client = build_client(timeout)?;

    let notifier: Arc<dyn Notifier> = match config.notifications.webhook_url.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(client.clone(), url, timeout)),
        None => Arc::new(LogNotifier),
    };

    let resolver: Arc<dyn DataResolver> = match config.resolver.base_url.as_deref() {
        Some(base_url) => Arc::new(HttpDataResolver::new(client.clone(), base_url, timeout)),
        None => Arc::new(StaticDataResolver::new(config.resolver.static_results.clone())),
    };

    tracing::debug!(
        webhook = config.notifications.webhook_url.is_some(),
        http_resolver = config.resolver.base_url.is_some(),
        "collaborators configured"
    );

    Ok(Collaborators {
        http: Arc::new(ReqwestHttpCaller::new(client)),
        notifier,
        resolver,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_default_config_uses_static_resolver() {
        let mut config = EngineConfig::default();
        config
            .resolver
            .static_results
            .insert("faculty".to_string(), json!(["prof@example.com"]));

        let collaborators = build_collaborators(&config).unwrap();
        let value = collaborators
            .resolver
            .resolve("faculty", BTreeMap::new(), &Value::Null)
            .await
            .unwrap();
        assert_eq!(value, json!(["prof@example.com"]));
    }
}
