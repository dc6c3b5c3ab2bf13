//! HTTP client for the media relay
//!
//! These calls never take part in relay indirection themselves: they are
//! what establishes and performs the forwarding.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{ForwardEnvelope, RelayStreamHandle};
use crate::api::http::{join_url, read_json, read_json_or_text};
use crate::error::{AppError, Result};
use crate::pipeline::params::PipelineParameterUpdate;

const STREAM_START_PATH: &str = "/ai/stream/start";

#[derive(Debug, Serialize)]
struct StartStreamRequest<'a> {
    #[serde(rename = "initialParameters", skip_serializing_if = "Option::is_none")]
    initial_parameters: Option<&'a PipelineParameterUpdate>,
}

/// Relay ("Livepeer") API client
#[derive(Debug, Clone)]
pub struct LivepeerClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl LivepeerClient {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// True if a relay base URL is configured
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn url(&self, path: &str) -> Result<String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| AppError::Config("relay base URL is not configured".to_string()))?;
        Ok(join_url(base, path))
    }

    /// Ask the relay for a new stream
    ///
    /// The response must carry both `whep_url` and `stream_id`.
    pub async fn start_stream(
        &self,
        initial_parameters: Option<&PipelineParameterUpdate>,
    ) -> Result<RelayStreamHandle> {
        let url = self.url(STREAM_START_PATH)?;
        let body = StartStreamRequest { initial_parameters };

        debug!("Starting relay stream at {}", url);
        let response = self.http.post(&url).json(&body).send().await?;
        let value: Value = read_json(response).await?;

        let handle = parse_stream_handle(value)?;
        info!(
            "Relay stream {} started (WHEP {})",
            handle.stream_id, handle.whep_url
        );
        Ok(handle)
    }

    /// Forward a backend call through the relay's per-stream update endpoint
    ///
    /// Returns the relay's body unchanged: JSON, raw text, or `null` when empty.
    pub async fn forward_request(
        &self,
        stream_id: &str,
        route: &str,
        request: Value,
    ) -> Result<Value> {
        let path = format!("/ai/stream/{}/update", urlencoding::encode(stream_id));
        let url = self.url(&path)?;
        let envelope = ForwardEnvelope {
            route: route.to_string(),
            request,
        };

        debug!("Forwarding {} via relay stream {}", route, stream_id);
        let response = self.http.post(&url).json(&envelope).send().await?;
        read_json_or_text(response).await
    }
}

fn parse_stream_handle(value: Value) -> Result<RelayStreamHandle> {
    let has_str = |key: &str| value.get(key).and_then(Value::as_str).is_some();
    if !has_str("whep_url") {
        return Err(AppError::MalformedResponse(
            "relay stream response is missing whep_url".to_string(),
        ));
    }
    if !has_str("stream_id") {
        return Err(AppError::MalformedResponse(
            "relay stream response is missing stream_id".to_string(),
        ));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::http::build_client;
    use crate::api::tests::serve;
    use axum::response::IntoResponse;
    use axum::{extract::Path, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn client(base: String) -> LivepeerClient {
        LivepeerClient::new(build_client(5).unwrap(), Some(base))
    }

    #[tokio::test]
    async fn test_start_stream_sends_initial_parameters() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let router = Router::new().route(
            "/ai/stream/start",
            post(move |Json(body): Json<Value>| {
                let seen = seen_clone.clone();
                async move {
                    *seen.lock().await = Some(body);
                    Json(json!({"whep_url": "http://relay/whep/s1", "stream_id": "s1"}))
                }
            }),
        );
        let relay = client(serve(router).await);

        let params = PipelineParameterUpdate::prompt("ocean");
        let handle = relay.start_stream(Some(&params)).await.unwrap();
        assert_eq!(handle.stream_id, "s1");
        assert_eq!(handle.whep_url, "http://relay/whep/s1");
        assert_eq!(
            seen.lock().await.clone().unwrap(),
            json!({"initialParameters": {"prompts": [{"text": "ocean", "weight": 1.0}]}})
        );
    }

    #[tokio::test]
    async fn test_start_stream_requires_both_fields() {
        let router = Router::new()
            .route(
                "/a/ai/stream/start",
                post(|| async { Json(json!({"stream_id": "s1"})) }),
            )
            .route(
                "/b/ai/stream/start",
                post(|| async { Json(json!({"whep_url": "http://relay/whep"})) }),
            );
        let base = serve(router).await;

        let err = client(format!("{}/a", base)).start_stream(None).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse(ref m) if m.contains("whep_url")));

        let err = client(format!("{}/b", base)).start_stream(None).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse(ref m) if m.contains("stream_id")));
    }

    #[tokio::test]
    async fn test_start_stream_http_error() {
        let router = Router::new().route(
            "/ai/stream/start",
            post(|| async { (axum::http::StatusCode::PAYMENT_REQUIRED, "no credits") }),
        );
        let err = client(serve(router).await).start_stream(None).await.unwrap_err();
        match err {
            AppError::Http {
                status,
                status_text,
                body,
            } => {
                assert_eq!(status, 402);
                assert_eq!(status_text, "Payment Required");
                assert_eq!(body, "no credits");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_forward_request_envelope_and_bodies() {
        let router = Router::new().route(
            "/ai/stream/:id/update",
            post(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                match id.as_str() {
                    "json" => Json(json!({"echo": body})).into_response(),
                    "text" => "queued".into_response(),
                    _ => axum::http::StatusCode::NO_CONTENT.into_response(),
                }
            }),
        );
        let relay = client(serve(router).await);

        let value = relay
            .forward_request("json", "/api/v1/pipeline/update", json!({"paused": true}))
            .await
            .unwrap();
        assert_eq!(
            value,
            json!({"echo": {"route": "/api/v1/pipeline/update", "request": {"paused": true}}})
        );

        let value = relay
            .forward_request("text", "/api/v1/pipeline/status", Value::Null)
            .await
            .unwrap();
        assert_eq!(value, json!("queued"));

        let value = relay
            .forward_request("empty", "/api/v1/pipeline/status", Value::Null)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_unconfigured_relay() {
        let relay = LivepeerClient::new(build_client(5).unwrap(), Some("  ".to_string()));
        assert!(!relay.is_configured());
        assert!(matches!(
            relay.start_stream(None).await,
            Err(AppError::Config(_))
        ));
    }
}
