//! Catalog registration with the engine.
//!
//! Connectors come up before or after the engine; registration retries with
//! exponential backoff until the engine answers or the retry budget runs
//! out. A 4xx means the payload itself is wrong and retrying is pointless.

use std::time::Duration;

use trellis_contracts::{ActionCatalogEntry, RegisterActionsRequest, RegisterActionsResponse};

use crate::error::{ConnectorError, ConnectorResult};

const REGISTER_PATH: &str = "/api/v1/admin/actions/register";

/// The engine base URL as connectors conventionally receive it.
pub fn engine_url_from_env() -> Option<String> {
    std::env::var("WORKFLOW_ENGINE_URL").ok()
}

/// Retry knobs for registration.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Attempt budget; `None` retries until the engine answers.
    pub max_attempts: Option<u32>,
    pub request_timeout: Duration,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Publish a connector's action catalog to the engine.
pub async fn register_with_engine(
    engine_url: &str,
    connector_id: &str,
    actions: Vec<ActionCatalogEntry>,
    options: RegistrationOptions,
) -> ConnectorResult<RegisterActionsResponse> {
    let client = reqwest::Client::builder()
        .timeout(options.request_timeout)
        .build()
        .map_err(|e| ConnectorError::Transport(format!("failed to build HTTP client: {}", e)))?;
    let url = format!("{}{}", engine_url.trim_end_matches('/'), REGISTER_PATH);
    let request = RegisterActionsRequest {
        connector_id: connector_id.to_string(),
        actions,
    };

    let mut delay = options.initial_delay;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match client.post(&url).json(&request).send().await {
            Ok(response) if response.status().is_success() => {
                let registered = response.json::<RegisterActionsResponse>().await.map_err(|e| {
                    ConnectorError::Serialization(format!(
                        "engine returned an unparseable registration response: {}",
                        e
                    ))
                })?;
                tracing::info!(
                    connector_id = %connector_id,
                    registered = registered.registered,
                    attempt,
                    "registered with engine"
                );
                return Ok(registered);
            }
            Ok(response) if response.status().is_client_error() => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ConnectorError::RegistrationRejected(format!(
                    "{}: {}",
                    status, body
                )));
            }
            Ok(response) => {
                tracing::warn!(
                    connector_id = %connector_id,
                    status = %response.status(),
                    attempt,
                    "engine not ready for registration"
                );
            }
            Err(e) => {
                tracing::warn!(
                    connector_id = %connector_id,
                    error = %e,
                    attempt,
                    "engine unreachable for registration"
                );
            }
        }

        if let Some(max_attempts) = options.max_attempts {
            if attempt >= max_attempts {
                return Err(ConnectorError::EngineUnreachable(format!(
                    "gave up after {} attempts against {}",
                    attempt, url
                )));
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(options.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn quick_options(max_attempts: u32) -> RegistrationOptions {
        RegistrationOptions {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: Some(max_attempts),
            request_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn retries_until_the_engine_answers() {
        let hits = Arc::new(AtomicU32::new(0));
        let seen = hits.clone();
        let router = Router::new().route(
            REGISTER_PATH,
            post(move || {
                let seen = seen.clone();
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(axum::http::StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(json!({"registered": 1, "timestamp": "2026-01-01T00:00:00Z"})))
                    }
                }
            }),
        );
        let url = serve(router).await;
        let response = register_with_engine(&url, "text", Vec::new(), quick_options(10))
            .await
            .unwrap();
        assert_eq!(response.registered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let seen = hits.clone();
        let router = Router::new().route(
            REGISTER_PATH,
            post(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                async { axum::http::StatusCode::BAD_REQUEST }
            }),
        );
        let url = serve(router).await;
        let err = register_with_engine(&url, "text", Vec::new(), quick_options(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::RegistrationRejected(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let err = register_with_engine(
            "http://127.0.0.1:1",
            "text",
            Vec::new(),
            quick_options(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectorError::EngineUnreachable(_)));
    }
}
