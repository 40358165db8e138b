//! Prebuilt-query resolvers for QUERY operations.

use std::collections::BTreeMap;
use std::time::Duration;

use cronflow_core::workflow::collaborators::{CollaboratorError, CollaboratorFuture, DataResolver};
use serde_json::{Value, json};

use super::http::{decode_body, transport_error};

/// Resolves `prebuilt_key` by POSTing `{params, context}` to
/// `{base_url}/{prebuilt_key}` and returning the JSON response.
pub struct HttpDataResolver {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDataResolver {
    pub fn new(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

impl DataResolver for HttpDataResolver {
    fn resolve<'a>(
        &'a self,
        prebuilt_key: &'a str,
        params: BTreeMap<String, Value>,
        context: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        Box::pin(async move {
            let url = format!("{}/{prebuilt_key}", self.base_url);
            let response = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&json!({ "params": params, "context": context }))
                .send()
                .await
                .map_err(|e| transport_error(e, &url, self.timeout))?;

            match response.status().as_u16() {
                404 => return Err(CollaboratorError::UnknownQuery(prebuilt_key.to_string())),
                code if !(200..300).contains(&code) => {
                    return Err(CollaboratorError::Rejected(format!(
                        "resolver returned {code} for '{prebuilt_key}'"
                    )));
                }
                _ => {}
            }

            let text = response
                .text()
                .await
                .map_err(|e| transport_error(e, &url, self.timeout))?;
            Ok(decode_body(text))
        })
    }
}

/// Answers from a fixed map, ignoring params. Configured under
/// `[resolver.static_results]`.
#[derive(Debug, Default, Clone)]
pub struct StaticDataResolver {
    results: BTreeMap<String, Value>,
}

impl StaticDataResolver {
    pub fn new(results: BTreeMap<String, Value>) -> Self {
        Self { results }
    }
}

impl DataResolver for StaticDataResolver {
    fn resolve<'a>(
        &'a self,
        prebuilt_key: &'a str,
        _params: BTreeMap<String, Value>,
        _context: &'a Value,
    ) -> CollaboratorFuture<'a, Value> {
        let result = self
            .results
            .get(prebuilt_key)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownQuery(prebuilt_key.to_string()));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;

    use crate::collaborators::http::build_client;
    use crate::collaborators::http::tests::serve;

    #[tokio::test]
    async fn test_static_resolver_lookup() {
        let mut results = BTreeMap::new();
        results.insert("guardians".to_string(), json!([{"channel_id": "g@example.com"}]));
        let resolver = StaticDataResolver::new(results);

        let value = resolver
            .resolve("guardians", BTreeMap::new(), &Value::Null)
            .await
            .unwrap();
        assert_eq!(value[0]["channel_id"], "g@example.com");

        let err = resolver
            .resolve("missing", BTreeMap::new(), &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::UnknownQuery(k) if k == "missing"));
    }

    #[tokio::test]
    async fn test_http_resolver_posts_params_and_context() {
        let router = Router::new().route(
            "/queries/{key}",
            post(|Path(key): Path<String>, axum::Json(body): axum::Json<Value>| async move {
                if key != "guardian_for_student" {
                    return StatusCode::NOT_FOUND.into_response();
                }
                axum::Json(json!([{
                    "channel_id": format!("guardian-of-{}@example.com", body["params"]["studentId"].as_str().unwrap_or("?")),
                    "tenant": body["context"]["tenant"],
                }]))
                .into_response()
            }),
        );
        let base = serve(router).await;
        let resolver = HttpDataResolver::new(
            build_client(Duration::from_secs(5)).unwrap(),
            &format!("{base}/queries/"),
            Duration::from_secs(5),
        );

        let mut params = BTreeMap::new();
        params.insert("studentId".to_string(), json!("s1"));
        let context = json!({"tenant": "inst-1"});
        let value = resolver
            .resolve("guardian_for_student", params, &context)
            .await
            .unwrap();
        assert_eq!(value[0]["channel_id"], "guardian-of-s1@example.com");
        assert_eq!(value[0]["tenant"], "inst-1");

        let err = resolver
            .resolve("nope", BTreeMap::new(), &context)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::UnknownQuery(_)));
    }
}
