//! Signaling and control transports
//!
//! A session negotiates and pushes parameter updates through exactly one
//! transport, chosen per start:
//!
//! - [`DirectTransport`]: SDP offer to the backend's offer endpoint,
//!   updates over an ordered data channel.
//! - [`RelayTransport`]: relay stream start, WHEP for the media path, updates
//!   forwarded through the relay's per-stream update endpoint.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use super::datachannel::{encode_update, parse_channel_message, ChannelMessage};
use super::whep;
use crate::api::{ApiClient, WebRtcOfferRequest, PIPELINE_UPDATE_PATH};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::pipeline::params::PipelineParameterUpdate;
use crate::relay::{LivepeerClient, RelayContext, RelayStreamHandle};

/// Which transport a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Direct,
    Relay,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Relay => write!(f, "relay"),
        }
    }
}

/// Out-of-band notices a transport raises towards its session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// Backend ended the stream
    StreamStopped { error_message: Option<String> },
}

pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;

#[async_trait]
pub trait StreamTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Set up transport state before the offer is created
    async fn prepare(&self, pc: &Arc<RTCPeerConnection>, signals: SignalSender) -> Result<()>;

    /// Deliver the final local offer and return the remote answer SDP
    async fn negotiate(&self, offer: &RTCSessionDescription) -> Result<String>;

    /// Push a non-empty parameter update; `Ok(false)` if it was dropped
    async fn send_update(&self, update: &PipelineParameterUpdate) -> Result<bool>;

    /// The peer connection reached disconnected, failed or closed
    async fn on_terminal_state(&self);

    /// Release everything the transport holds
    async fn teardown(&self);

    /// Drop shared state without touching the network; used when the
    /// session is dropped outside of `stop()`
    fn release(&self) {}
}

/// Backend offer endpoint plus a parameter data channel
pub struct DirectTransport {
    api: ApiClient,
    label: String,
    initial_parameters: Option<PipelineParameterUpdate>,
    channel: RwLock<Option<Arc<RTCDataChannel>>>,
}

impl DirectTransport {
    pub fn new(
        api: ApiClient,
        label: impl Into<String>,
        initial_parameters: Option<PipelineParameterUpdate>,
    ) -> Self {
        Self {
            api,
            label: label.into(),
            initial_parameters,
            channel: RwLock::new(None),
        }
    }

    /// True once the data channel is open
    pub async fn is_channel_open(&self) -> bool {
        match self.channel.read().await.as_ref() {
            Some(dc) => dc.ready_state() == RTCDataChannelState::Open,
            None => false,
        }
    }
}

#[async_trait]
impl StreamTransport for DirectTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }

    async fn prepare(&self, pc: &Arc<RTCPeerConnection>, signals: SignalSender) -> Result<()> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = pc
            .create_data_channel(&self.label, Some(init))
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create data channel: {}", e)))?;

        let label = self.label.clone();
        dc.on_open(Box::new(move || {
            info!("Data channel '{}' open", label);
            Box::pin(async {})
        }));

        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let signals = signals.clone();
            Box::pin(async move {
                match parse_channel_message(&msg.data) {
                    Some(ChannelMessage::StreamStopped { error_message }) => {
                        info!(
                            "Backend stopped the stream: {}",
                            error_message.as_deref().unwrap_or("no reason given")
                        );
                        let _ = signals.send(TransportSignal::StreamStopped { error_message });
                    }
                    Some(ChannelMessage::Unknown) => {
                        debug!("Ignoring data channel message ({} bytes)", msg.data.len())
                    }
                    None => {}
                }
            })
        }));

        dc.on_error(Box::new(move |e: webrtc::Error| {
            warn!("Data channel error: {}", e);
            Box::pin(async {})
        }));

        *self.channel.write().await = Some(dc);
        debug!("Data channel '{}' created", self.label);
        Ok(())
    }

    async fn negotiate(&self, offer: &RTCSessionDescription) -> Result<String> {
        let request = WebRtcOfferRequest {
            sdp: offer.sdp.clone(),
            sdp_type: offer.sdp_type.to_string(),
            initial_parameters: self.initial_parameters.clone(),
        };
        let answer = self.api.send_webrtc_offer(&request).await?.decode()?;
        if answer.sdp.trim().is_empty() {
            return Err(AppError::MalformedResponse(
                "offer response carried no SDP answer".to_string(),
            ));
        }
        Ok(answer.sdp)
    }

    async fn send_update(&self, update: &PipelineParameterUpdate) -> Result<bool> {
        let guard = self.channel.read().await;
        let dc = match guard.as_ref() {
            Some(dc) if dc.ready_state() == RTCDataChannelState::Open => dc,
            _ => {
                warn!("Data channel not open, dropping parameter update");
                return Ok(false);
            }
        };

        let text = encode_update(update)?;
        dc.send_text(text)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to send parameter update: {}", e)))?;
        debug!("Sent parameter update: {:?}", update.field_names());
        Ok(true)
    }

    async fn on_terminal_state(&self) {}

    async fn teardown(&self) {
        if let Some(dc) = self.channel.write().await.take() {
            if let Err(e) = dc.close().await {
                debug!("Data channel close: {}", e);
            }
        }
    }
}

/// Relay stream with WHEP media and forwarded updates
pub struct RelayTransport {
    relay: LivepeerClient,
    http: reqwest::Client,
    ctx: RelayContext,
    events: EventBus,
    initial_parameters: Option<PipelineParameterUpdate>,
    stream: Mutex<Option<RelayStreamHandle>>,
    resource_url: Mutex<Option<String>>,
}

impl RelayTransport {
    pub fn new(
        api: &ApiClient,
        events: EventBus,
        initial_parameters: Option<PipelineParameterUpdate>,
    ) -> Self {
        Self {
            relay: api.relay().clone(),
            http: api.http().clone(),
            ctx: api.relay_context().clone(),
            events,
            initial_parameters,
            stream: Mutex::new(None),
            resource_url: Mutex::new(None),
        }
    }

    /// Id of the relay stream this transport started
    pub fn stream_id(&self) -> Option<String> {
        self.stream.lock().as_ref().map(|h| h.stream_id.clone())
    }

    pub fn resource_url(&self) -> Option<String> {
        self.resource_url.lock().clone()
    }

    /// Record a started stream and route control calls through it
    pub(crate) fn adopt_stream(&self, handle: RelayStreamHandle) {
        self.ctx.set(handle.stream_id.clone());
        self.events.publish(SessionEvent::RelayStreamStarted {
            stream_id: handle.stream_id.clone(),
            whep_url: handle.whep_url.clone(),
        });
        *self.stream.lock() = Some(handle);
    }

    /// Drop the local stream id and clear it from the context, once
    fn release_stream(&self) -> Option<String> {
        let handle = self.stream.lock().take()?;
        if self.ctx.clear_if(&handle.stream_id) {
            self.events.publish(SessionEvent::RelayStreamCleared {
                stream_id: handle.stream_id.clone(),
            });
        }
        Some(handle.stream_id)
    }
}

#[async_trait]
impl StreamTransport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    async fn prepare(&self, _pc: &Arc<RTCPeerConnection>, _signals: SignalSender) -> Result<()> {
        match self.relay.start_stream(self.initial_parameters.as_ref()).await {
            Ok(handle) => {
                self.adopt_stream(handle);
                Ok(())
            }
            Err(e) => {
                *self.stream.lock() = None;
                self.ctx.clear();
                Err(e)
            }
        }
    }

    async fn negotiate(&self, offer: &RTCSessionDescription) -> Result<String> {
        let whep_url = self
            .stream
            .lock()
            .as_ref()
            .map(|h| h.whep_url.clone())
            .ok_or_else(|| AppError::WebRtcError("relay stream not started".to_string()))?;

        let answer = whep::negotiate(&self.http, &whep_url, &offer.sdp).await?;
        *self.resource_url.lock() = answer.resource_url;
        Ok(answer.sdp)
    }

    async fn send_update(&self, update: &PipelineParameterUpdate) -> Result<bool> {
        let Some(stream_id) = self.stream_id() else {
            warn!("No relay stream id, dropping parameter update");
            return Ok(false);
        };

        let body = serde_json::to_value(update)?;
        let response = self
            .relay
            .forward_request(&stream_id, PIPELINE_UPDATE_PATH, body)
            .await?;
        debug!("Relay accepted parameter update: {}", response);
        Ok(true)
    }

    async fn on_terminal_state(&self) {
        if let Some(id) = self.release_stream() {
            info!("Relay stream {} ended with the connection", id);
        }
    }

    async fn teardown(&self) {
        self.release_stream();
        let resource_url = self.resource_url.lock().take();
        if let Some(url) = resource_url {
            whep::delete_resource(&self.http, &url).await;
        }
    }

    fn release(&self) {
        if let Some(id) = self.release_stream() {
            debug!("Released relay stream {}", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{config_for, serve};
    use crate::webrtc::config::WebRtcConfig;
    use crate::webrtc::peer::new_peer_connection;
    use axum::extract::Path;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(id: &str) -> RelayStreamHandle {
        RelayStreamHandle {
            whep_url: format!("http://relay/whep/{}", id),
            stream_id: id.to_string(),
            extra: Map::new(),
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = vec![];
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn test_relay_terminal_state_clears_once() {
        let api = ApiClient::new(&config_for("http://backend", Some("http://relay"))).unwrap();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let transport = RelayTransport::new(&api, bus, None);

        transport.adopt_stream(handle("s-1"));
        assert_eq!(api.relay_context().current().as_deref(), Some("s-1"));

        transport.on_terminal_state().await;
        transport.on_terminal_state().await;
        transport.teardown().await;

        assert!(!api.relay_context().is_active());
        assert_eq!(transport.stream_id(), None);

        let cleared: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::RelayStreamCleared { .. }))
            .collect();
        assert_eq!(
            cleared,
            vec![SessionEvent::RelayStreamCleared {
                stream_id: "s-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_relay_release_keeps_newer_stream() {
        let api = ApiClient::new(&config_for("http://backend", Some("http://relay"))).unwrap();
        let transport = RelayTransport::new(&api, EventBus::new(), None);

        transport.adopt_stream(handle("old"));
        // Another session took over the context
        api.relay_context().set("new");
        transport.on_terminal_state().await;

        assert_eq!(api.relay_context().current().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_relay_update_uses_captured_stream_id() {
        let seen = Arc::new(Mutex::new(Vec::<(String, Value)>::new()));
        let s = seen.clone();
        let router = Router::new().route(
            "/ai/stream/:id/update",
            post(move |Path(id): Path<String>, Json(body): Json<Value>| {
                let s = s.clone();
                async move {
                    s.lock().push((id, body));
                    Json(json!({"status": "ok"}))
                }
            }),
        );
        let relay = serve(router).await;
        let api = ApiClient::new(&config_for("http://backend", Some(&relay))).unwrap();
        let transport = RelayTransport::new(&api, EventBus::new(), None);

        let update = PipelineParameterUpdate::prompt("a foggy harbour");
        assert!(!transport.send_update(&update).await.unwrap());

        transport.adopt_stream(handle("s-9"));
        // The shared context going away does not redirect this stream's updates
        api.relay_context().clear();
        assert!(transport.send_update(&update).await.unwrap());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "s-9");
        assert_eq!(seen[0].1["route"], "/api/v1/pipeline/update");
        assert_eq!(seen[0].1["request"]["prompts"][0]["text"], "a foggy harbour");
    }

    #[tokio::test]
    async fn test_relay_prepare_failure_clears_state() {
        let router = Router::new().route(
            "/ai/stream/start",
            post(|| async { Json(json!({"stream_id": "s-1"})) }),
        );
        let relay = serve(router).await;
        let api = ApiClient::new(&config_for("http://backend", Some(&relay))).unwrap();
        api.relay_context().set("stale");
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let transport = RelayTransport::new(&api, bus, None);

        let config = WebRtcConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let pc = new_peer_connection(&config).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = transport.prepare(&pc, tx).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse(_)));
        assert_eq!(transport.stream_id(), None);
        assert!(!api.relay_context().is_active());
        assert!(drain(&mut rx).is_empty());
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_update_dropped_without_channel() {
        let api = ApiClient::new(&config_for("http://backend", None)).unwrap();
        let transport = DirectTransport::new(api, "parameters", None);
        assert!(!transport.is_channel_open().await);
        assert!(!transport
            .send_update(&PipelineParameterUpdate::prompt("x"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_direct_negotiate_posts_offer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let router = Router::new().route(
            "/api/v1/webrtc/offer",
            post(move |Json(body): Json<Value>| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(body["type"], "offer");
                    assert_eq!(body["initialParameters"]["paused"], false);
                    Json(json!({"sdp": "v=0\r\n", "type": "answer"}))
                }
            }),
        );
        let backend = serve(router).await;
        let api = ApiClient::new(&config_for(&backend, None)).unwrap();
        let initial = PipelineParameterUpdate {
            paused: Some(false),
            ..Default::default()
        };
        let transport = DirectTransport::new(api, "parameters", Some(initial));

        let mut offer = RTCSessionDescription::default();
        offer.sdp = "v=0\r\n".to_string();
        offer.sdp_type = webrtc::peer_connection::sdp::sdp_type::RTCSdpType::Offer;

        assert_eq!(transport.negotiate(&offer).await.unwrap(), "v=0\r\n");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transport_kind_wire_names() {
        assert_eq!(serde_json::to_value(TransportKind::Relay).unwrap(), json!("relay"));
        assert_eq!(TransportKind::default(), TransportKind::Direct);
    }
}
