//! Backend HTTP API client
//!
//! Every backend call goes through [`ApiClient::call`], which decides
//! whether the request is served by the backend directly or forwarded
//! through the active relay stream (see [`crate::relay`]).
//!
//! ```text
//! ApiClient::update_pipeline_parameters(..)
//!        |
//!        +-- relay inactive --> POST {backend}/api/v1/pipeline/update
//!        |
//!        +-- relay active ----> POST {relay}/ai/stream/{id}/update
//!                                    {route: "/api/v1/pipeline/update", request: {..}}
//! ```

pub mod http;
pub mod types;

pub use types::*;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::error::{AppError, Result};
use crate::pipeline::params::PipelineParameterUpdate;
use crate::relay::{LivepeerClient, RelayContext};

/// Result of an indirection-eligible call
///
/// A relayed call returns the relay's body unmodified; use [`Routed::decode`]
/// when the typed backend shape is needed.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed<T> {
    /// Served by the backend
    Direct(T),
    /// Forwarded through the relay; JSON, raw text or `null`
    Relayed(Value),
}

impl<T> Routed<T> {
    pub fn is_relayed(&self) -> bool {
        matches!(self, Routed::Relayed(_))
    }
}

impl<T: DeserializeOwned> Routed<T> {
    /// Typed result, decoding a relayed body into the backend shape
    pub fn decode(self) -> Result<T> {
        match self {
            Routed::Direct(v) => Ok(v),
            Routed::Relayed(value) => serde_json::from_value(value.clone()).map_err(|e| {
                AppError::MalformedResponse(format!("relayed response ({}): {}", e, value))
            }),
        }
    }
}

impl<T: Serialize> Routed<T> {
    /// Result as JSON, whichever way it was served
    pub fn into_value(self) -> Result<Value> {
        match self {
            Routed::Direct(v) => Ok(serde_json::to_value(v)?),
            Routed::Relayed(value) => Ok(value),
        }
    }
}

/// Typed client for the inference backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    relay: LivepeerClient,
    relay_ctx: RelayContext,
}

impl ApiClient {
    /// Create a client with a fresh relay context
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_context(config, RelayContext::new())
    }

    /// Create a client that routes through `relay_ctx`
    pub fn with_context(config: &ClientConfig, relay_ctx: RelayContext) -> Result<Self> {
        let http = http::build_client(config.backend.request_timeout_secs)?;
        let relay = LivepeerClient::new(http.clone(), config.relay.base_url.clone());

        Ok(Self {
            http,
            base_url: config.backend.base_url.clone(),
            relay,
            relay_ctx,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Relay routing state shared with sessions built from this client
    pub fn relay_context(&self) -> &RelayContext {
        &self.relay_ctx
    }

    /// Relay API, for stream start and explicit forwarding
    pub fn relay(&self) -> &LivepeerClient {
        &self.relay
    }

    /// Underlying HTTP client (shared connection pool)
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Issue a backend call, or forward it when a relay stream is active
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        route: &str,
        body: Option<Value>,
    ) -> Result<Routed<T>> {
        if let Some(stream_id) = self.relay_ctx.current() {
            let request = body.unwrap_or(Value::Null);
            let value = self.relay.forward_request(&stream_id, route, request).await?;
            return Ok(Routed::Relayed(value));
        }

        let url = http::join_url(&self.base_url, route);
        trace!("{} {}", method, url);

        let mut req = self.http.request(method, &url);
        if let Some(ref body) = body {
            req = req.json(body);
        }
        let response = req.send().await?;
        Ok(Routed::Direct(http::read_json(response).await?))
    }

    /// Exchange an SDP offer for the backend's answer
    pub async fn send_webrtc_offer(
        &self,
        offer: &WebRtcOfferRequest,
    ) -> Result<Routed<SessionDescription>> {
        debug!("Sending WebRTC offer ({} bytes SDP)", offer.sdp.len());
        self.call(Method::POST, OFFER_PATH, Some(serde_json::to_value(offer)?))
            .await
    }

    pub async fn load_pipeline(
        &self,
        request: &LoadPipelineRequest,
    ) -> Result<Routed<MessageResponse>> {
        self.call(
            Method::POST,
            PIPELINE_LOAD_PATH,
            Some(serde_json::to_value(request)?),
        )
        .await
    }

    pub async fn get_pipeline_status(&self) -> Result<Routed<PipelineStatusResponse>> {
        self.call(Method::GET, PIPELINE_STATUS_PATH, None).await
    }

    pub async fn check_model_status(
        &self,
        pipeline_id: &str,
    ) -> Result<Routed<ModelStatusResponse>> {
        let route = format!(
            "{}?pipeline_id={}",
            MODELS_STATUS_PATH,
            urlencoding::encode(pipeline_id)
        );
        self.call(Method::GET, &route, None).await
    }

    pub async fn download_pipeline_models(
        &self,
        pipeline_id: &str,
    ) -> Result<Routed<MessageResponse>> {
        let request = DownloadModelsRequest {
            pipeline_id: pipeline_id.to_string(),
        };
        self.call(
            Method::POST,
            MODELS_DOWNLOAD_PATH,
            Some(serde_json::to_value(&request)?),
        )
        .await
    }

    pub async fn update_pipeline_parameters(
        &self,
        update: &PipelineParameterUpdate,
    ) -> Result<Routed<MessageResponse>> {
        self.call(
            Method::POST,
            PIPELINE_UPDATE_PATH,
            Some(serde_json::to_value(update)?),
        )
        .await
    }

    pub async fn get_hardware_info(&self) -> Result<Routed<HardwareInfoResponse>> {
        self.call(Method::GET, HARDWARE_INFO_PATH, None).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    pub(crate) async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub(crate) fn config_for(backend: &str, relay: Option<&str>) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.backend.base_url = backend.to_string();
        config.relay.base_url = relay.map(str::to_string);
        config
    }

    /// Backend answering every route, counting hits
    async fn mock_backend(hits: Arc<AtomicUsize>) -> String {
        let h = hits.clone();
        let count = move || {
            h.fetch_add(1, Ordering::SeqCst);
        };
        let c1 = count.clone();
        let c2 = count.clone();
        let c3 = count.clone();
        let c4 = count.clone();
        let c5 = count.clone();
        let c6 = count.clone();
        let c7 = count;

        let router = Router::new()
            .route(
                "/api/v1/webrtc/offer",
                post(move |Json(body): Json<Value>| async move {
                    c1();
                    assert_eq!(body["type"], "offer");
                    Json(json!({"sdp": "v=0 answer", "type": "answer"}))
                }),
            )
            .route(
                "/api/v1/pipeline/load",
                post(move |Json(body): Json<Value>| async move {
                    c2();
                    Json(json!({"message": format!("loading {}", body["pipeline_id"].as_str().unwrap_or("default"))}))
                }),
            )
            .route(
                "/api/v1/pipeline/status",
                get(move || async move {
                    c3();
                    Json(json!({"status": "loaded", "pipeline_id": "longlive"}))
                }),
            )
            .route(
                "/api/v1/models/status",
                get(move |Query(q): Query<HashMap<String, String>>| async move {
                    c4();
                    Json(json!({"downloaded": q.get("pipeline_id").map(String::as_str) == Some("a b")}))
                }),
            )
            .route(
                "/api/v1/models/download",
                post(move |Json(body): Json<Value>| async move {
                    c5();
                    Json(json!({"message": format!("downloading {}", body["pipeline_id"].as_str().unwrap_or(""))}))
                }),
            )
            .route(
                "/api/v1/pipeline/update",
                post(move |Json(body): Json<Value>| async move {
                    c6();
                    if body.as_object().map(|m| m.is_empty()).unwrap_or(true) {
                        return (StatusCode::UNPROCESSABLE_ENTITY, "empty update".to_string())
                            .into_response();
                    }
                    Json(json!({"message": "updated"})).into_response()
                }),
            )
            .route(
                "/api/v1/hardware/info",
                get(move || async move {
                    c7();
                    Json(json!({"vram_gb": 24.0}))
                }),
            );
        serve(router).await
    }

    #[tokio::test]
    async fn test_direct_calls() {
        let hits = Arc::new(AtomicUsize::new(0));
        let api = ApiClient::new(&config_for(&mock_backend(hits.clone()).await, None)).unwrap();

        let answer = api
            .send_webrtc_offer(&WebRtcOfferRequest {
                sdp: "v=0 offer".to_string(),
                sdp_type: "offer".to_string(),
                initial_parameters: None,
            })
            .await
            .unwrap();
        assert_eq!(
            answer,
            Routed::Direct(SessionDescription {
                sdp: "v=0 answer".to_string(),
                sdp_type: "answer".to_string(),
            })
        );

        let status = api.get_pipeline_status().await.unwrap().decode().unwrap();
        assert_eq!(status.status, PipelineStatus::Loaded);

        // Query string is percent-encoded
        let models = api.check_model_status("a b").await.unwrap().decode().unwrap();
        assert!(models.downloaded);

        let msg = api.download_pipeline_models("longlive").await.unwrap().decode().unwrap();
        assert_eq!(msg.message, "downloading longlive");

        let msg = api
            .load_pipeline(&LoadPipelineRequest {
                pipeline_id: Some("streamdiffusionv2".to_string()),
                load_params: None,
            })
            .await
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(msg.message, "loading streamdiffusionv2");

        let hw = api.get_hardware_info().await.unwrap().decode().unwrap();
        assert_eq!(hw.vram_gb, Some(24.0));

        let msg = api
            .update_pipeline_parameters(&PipelineParameterUpdate::prompt("dunes"))
            .await
            .unwrap();
        assert!(!msg.is_relayed());

        assert_eq!(hits.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_non_success_status_carries_body() {
        let hits = Arc::new(AtomicUsize::new(0));
        let api = ApiClient::new(&config_for(&mock_backend(hits).await, None)).unwrap();

        let err = api
            .update_pipeline_parameters(&PipelineParameterUpdate::default())
            .await
            .unwrap_err();
        match err {
            AppError::Http {
                status,
                status_text,
                body,
            } => {
                assert_eq!(status, 422);
                assert_eq!(status_text, "Unprocessable Entity");
                assert_eq!(body, "empty update");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_relay_indirection_rewrites_every_call() {
        let backend_hits = Arc::new(AtomicUsize::new(0));
        let backend = mock_backend(backend_hits.clone()).await;

        let envelopes: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = envelopes.clone();
        let relay = serve(Router::new().route(
            "/ai/stream/:id/update",
            post(move |Path(id): Path<String>, Json(body): Json<Value>| {
                let seen = seen.clone();
                async move {
                    let route = body["route"].as_str().unwrap_or("").to_string();
                    seen.lock().await.push((id, body));
                    match route.as_str() {
                        "/api/v1/hardware/info" => "plain text reply".into_response(),
                        "/api/v1/pipeline/status" => StatusCode::OK.into_response(),
                        _ => Json(json!({"relayed": route})).into_response(),
                    }
                }
            }),
        ))
        .await;

        let api = ApiClient::new(&config_for(&backend, Some(&relay))).unwrap();
        api.relay_context().set("stream-42");

        let update = PipelineParameterUpdate::prompt("neon city");
        let result = api.update_pipeline_parameters(&update).await.unwrap();
        assert_eq!(
            result,
            Routed::Relayed(json!({"relayed": "/api/v1/pipeline/update"}))
        );

        // Text and empty bodies are returned as-is
        let hw = api.get_hardware_info().await.unwrap();
        assert_eq!(hw, Routed::Relayed(json!("plain text reply")));
        let status = api.get_pipeline_status().await.unwrap();
        assert_eq!(status, Routed::Relayed(Value::Null));

        api.check_model_status("longlive").await.unwrap();
        api.download_pipeline_models("longlive").await.unwrap();
        api.load_pipeline(&LoadPipelineRequest::default()).await.unwrap();
        api.send_webrtc_offer(&WebRtcOfferRequest {
            sdp: "v=0".to_string(),
            sdp_type: "offer".to_string(),
            initial_parameters: None,
        })
        .await
        .unwrap();

        assert_eq!(backend_hits.load(Ordering::SeqCst), 0);

        let envelopes = envelopes.lock().await;
        assert_eq!(envelopes.len(), 7);
        assert!(envelopes.iter().all(|(id, _)| id == "stream-42"));
        assert_eq!(
            envelopes[0].1,
            json!({
                "route": "/api/v1/pipeline/update",
                "request": {"prompts": [{"text": "neon city", "weight": 1.0}]},
            })
        );
        assert_eq!(
            envelopes[1].1,
            json!({"route": "/api/v1/hardware/info", "request": null})
        );
        assert_eq!(
            envelopes[3].1,
            json!({"route": "/api/v1/models/status?pipeline_id=longlive", "request": null})
        );
        assert_eq!(
            envelopes[4].1,
            json!({"route": "/api/v1/models/download", "request": {"pipeline_id": "longlive"}})
        );
        assert_eq!(envelopes[6].1["request"]["type"], "offer");
    }

    #[tokio::test]
    async fn test_clearing_relay_restores_direct_routing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let api = ApiClient::new(&config_for(&mock_backend(hits.clone()).await, None)).unwrap();

        api.relay_context().set("s");
        // Relay not configured: forwarding fails instead of silently hitting the backend
        assert!(matches!(
            api.get_hardware_info().await,
            Err(AppError::Config(_))
        ));

        api.relay_context().clear();
        assert!(!api.get_hardware_info().await.unwrap().is_relayed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_routed_decode() {
        let relayed: Routed<ModelStatusResponse> = Routed::Relayed(json!({"downloaded": true}));
        assert!(relayed.decode().unwrap().downloaded);

        let relayed: Routed<ModelStatusResponse> = Routed::Relayed(json!("busy"));
        assert!(matches!(
            relayed.decode(),
            Err(AppError::MalformedResponse(_))
        ));
    }
}
