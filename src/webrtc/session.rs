//! Streaming session
//!
//! A [`StreamSession`] owns at most one peer connection at a time. It drives
//! the negotiation state machine, mirrors the connection state into a
//! [`SessionStatus`] watch channel, and routes parameter updates through the
//! active transport.
//!
//! Every peer connection belongs to an epoch. Stopping (or the backend
//! stopping the stream) bumps the epoch, and callbacks or negotiation results
//! carrying an older epoch are dropped.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::peer;
use super::signaling::{ConnectionState, NegotiationEvent, NegotiationPhase, SessionStatus};
use super::stats::RemoteVideoMonitor;
use super::track::LocalStream;
use super::transport::{
    DirectTransport, RelayTransport, StreamTransport, TransportKind, TransportSignal,
};
use crate::api::ApiClient;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::pipeline::params::PipelineParameterUpdate;

/// Options for [`StreamSession::start`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub transport: TransportKind,
    /// Video to send; `None` offers receive-only
    pub local_stream: Option<LocalStream>,
    /// Parameters applied by the backend when the stream starts
    pub initial_parameters: Option<PipelineParameterUpdate>,
}

/// Received video track
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub codec: String,
}

#[derive(Default)]
struct SessionState {
    phase: NegotiationPhase,
    pc: Option<Arc<RTCPeerConnection>>,
    transport: Option<Arc<dyn StreamTransport>>,
    remote_track: Option<RemoteTrackInfo>,
    monitor: Option<Arc<RemoteVideoMonitor>>,
}

struct Released {
    pc: Option<Arc<RTCPeerConnection>>,
    transport: Option<Arc<dyn StreamTransport>>,
    monitor: Option<Arc<RemoteVideoMonitor>>,
}

impl Released {
    async fn close(self) {
        if let Some(monitor) = self.monitor {
            monitor.stop();
        }
        if let Some(transport) = self.transport {
            transport.teardown().await;
        }
        if let Some(pc) = self.pc {
            if let Err(e) = pc.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
        }
    }
}

struct SessionInner {
    api: ApiClient,
    config: WebRtcConfig,
    events: EventBus,
    status_tx: watch::Sender<SessionStatus>,
    state: Mutex<SessionState>,
    epoch: AtomicU64,
    cancel: CancellationToken,
}

/// Client side of one generation stream
///
/// Cheap to clone; the peer connection is closed when the last clone drops.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

impl StreamSession {
    pub fn new(api: ApiClient, config: WebRtcConfig, events: EventBus) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            inner: Arc::new(SessionInner {
                api,
                config,
                events,
                status_tx,
                state: Mutex::new(SessionState::default()),
                epoch: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Negotiate a new stream
    ///
    /// Does nothing while a start is in flight or a connection is held. An
    /// offer/answer failure leaves the connection in place (call [`stop`]
    /// before retrying); any other failure tears everything down.
    ///
    /// [`stop`]: StreamSession::stop
    pub async fn start(&self, options: StartOptions) -> Result<()> {
        let inner = &self.inner;

        let epoch = {
            let state = inner.state.lock();
            let status = *inner.status_tx.borrow();
            if status.is_connecting || state.pc.is_some() {
                debug!("Start ignored, session already connecting or connected");
                return Ok(());
            }
            inner.status_tx.send_modify(|s| s.is_connecting = true);
            inner.epoch.load(Ordering::SeqCst)
        };

        info!("Starting {} session", options.transport);

        if options.transport != TransportKind::Relay {
            if let Some(stream_id) = inner.api.relay_context().clear() {
                inner
                    .events
                    .publish(SessionEvent::RelayStreamCleared { stream_id });
            }
        }

        let transport: Arc<dyn StreamTransport> = match options.transport {
            TransportKind::Direct => Arc::new(DirectTransport::new(
                inner.api.clone(),
                inner.config.data_channel_label.clone(),
                options.initial_parameters.clone(),
            )),
            TransportKind::Relay => Arc::new(RelayTransport::new(
                &inner.api,
                inner.events.clone(),
                options.initial_parameters.clone(),
            )),
        };

        let pc = match peer::new_peer_connection(&inner.config).await {
            Ok(pc) => pc,
            Err(e) => return inner.fail_start(epoch, e).await,
        };
        if !inner.adopt(epoch, pc.clone(), transport.clone()) {
            debug!("Session stopped while starting");
            if let Err(e) = pc.close().await {
                warn!("Failed to close peer connection: {}", e);
            }
            return Ok(());
        }
        inner.register_handlers(&pc, epoch);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        inner.spawn_signal_loop(signal_rx, epoch);

        if let Err(e) = transport.prepare(&pc, signal_tx).await {
            return inner.fail_start(epoch, e).await;
        }
        // stop() may have torn the transport down while prepare was in flight
        if !inner.is_current(epoch) {
            debug!("Session stopped while preparing {} transport", transport.kind());
            transport.teardown().await;
            return Ok(());
        }
        if let Err(e) = peer::attach_media(&pc, options.local_stream.as_ref()).await {
            return inner.fail_start(epoch, e).await;
        }

        match inner.negotiate(epoch, &pc, transport.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) => inner.exchange_failed(epoch, e),
        }
    }

    /// Replace the outgoing video with the first video track of `stream`
    ///
    /// Returns false if not streaming, the stream has no video, no sender
    /// carries video, or the replacement failed.
    pub async fn update_video_track(&self, stream: &LocalStream) -> bool {
        if !self.status().is_streaming {
            debug!("Not streaming, cannot replace video track");
            return false;
        }
        let Some(track) = stream.first_video_track() else {
            debug!("Stream {} has no video track", stream.id());
            return false;
        };
        let Some(pc) = self.inner.state.lock().pc.clone() else {
            return false;
        };

        for sender in pc.get_senders().await {
            let is_video = match sender.track().await {
                Some(current) => current.kind() == RTPCodecType::Video,
                None => false,
            };
            if !is_video {
                continue;
            }
            return match sender.replace_track(Some(track)).await {
                Ok(()) => {
                    info!("Replaced outgoing video track");
                    true
                }
                Err(e) => {
                    warn!("Failed to replace video track: {}", e);
                    false
                }
            };
        }

        debug!("No video sender to replace");
        false
    }

    /// Push a parameter update to the running pipeline
    ///
    /// Empty updates are not sent. Returns `Ok(false)` when the update was
    /// dropped because no transport could carry it.
    pub async fn send_parameter_update(&self, update: &PipelineParameterUpdate) -> Result<bool> {
        let update = update.clone().filtered();
        if update.is_empty() {
            debug!("Empty parameter update, nothing to send");
            return Ok(false);
        }

        let transport = self.inner.state.lock().transport.clone();
        match transport {
            Some(transport) => transport.send_update(&update).await,
            None => {
                warn!("No active session, dropping parameter update");
                Ok(false)
            }
        }
    }

    /// Close the connection and reset the session
    pub async fn stop(&self) {
        let released = {
            let mut state = self.inner.state.lock();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.release(&mut state)
        };
        self.inner.status_tx.send_replace(SessionStatus::default());
        released.close().await;
        info!("Session stopped");
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.status().is_streaming
    }

    pub fn is_connecting(&self) -> bool {
        self.status().is_connecting
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.inner.state.lock().phase
    }

    /// Transport of the current connection
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner.state.lock().transport.as_ref().map(|t| t.kind())
    }

    pub fn remote_track(&self) -> Option<RemoteTrackInfo> {
        self.inner.state.lock().remote_track.clone()
    }

    /// Monitor of the received video, if monitoring is enabled
    pub fn remote_video(&self) -> Option<Arc<RemoteVideoMonitor>> {
        self.inner.state.lock().monitor.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }
}

impl SessionInner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Move everything out of `state` and return it to idle
    fn release(&self, state: &mut SessionState) -> Released {
        state.phase = state
            .phase
            .transition(NegotiationEvent::Stopped)
            .unwrap_or_default();
        state.remote_track = None;
        Released {
            pc: state.pc.take(),
            transport: state.transport.take(),
            monitor: state.monitor.take(),
        }
    }

    fn adopt(
        &self,
        epoch: u64,
        pc: Arc<RTCPeerConnection>,
        transport: Arc<dyn StreamTransport>,
    ) -> bool {
        let mut state = self.state.lock();
        if !self.is_current(epoch) {
            return false;
        }
        state.pc = Some(pc);
        state.transport = Some(transport);
        true
    }

    fn advance(&self, epoch: u64, event: NegotiationEvent) {
        let mut state = self.state.lock();
        if !self.is_current(epoch) {
            return;
        }
        match state.phase.transition(event) {
            Ok(next) => state.phase = next,
            Err(e) => debug!("{}", e),
        }
    }

    fn register_handlers(self: &Arc<Self>, pc: &RTCPeerConnection, epoch: u64) {
        let weak = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_connection_state(epoch, s).await;
                }
            })
        }));

        let weak: Weak<Self> = Arc::downgrade(self);
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_remote_track(epoch, track);
                    }
                })
            },
        ));
    }

    fn spawn_signal_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<TransportSignal>, epoch: u64) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match signal {
                    TransportSignal::StreamStopped { error_message } => {
                        inner.handle_stream_stopped(epoch, error_message).await
                    }
                }
            }
        });
    }

    async fn negotiate(
        &self,
        epoch: u64,
        pc: &RTCPeerConnection,
        transport: &dyn StreamTransport,
    ) -> Result<()> {
        let gathering_timeout = Duration::from_millis(self.config.gathering_timeout_ms);
        let offer = peer::create_local_offer(pc, gathering_timeout).await?;
        self.advance(epoch, NegotiationEvent::OfferCreated);
        self.advance(epoch, NegotiationEvent::OfferSent);

        let answer = transport.negotiate(&offer).await?;
        if !self.is_current(epoch) {
            debug!("Dropping answer for a stopped session");
            return Ok(());
        }
        peer::apply_answer(pc, answer).await?;
        self.advance(epoch, NegotiationEvent::AnswerApplied);

        info!("Negotiated {} session", transport.kind());
        self.events.publish(SessionEvent::Negotiated {
            transport: transport.kind(),
        });
        Ok(())
    }

    /// Offer/answer failed: clear the connecting flag, keep the connection
    fn exchange_failed(&self, epoch: u64, e: AppError) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !self.is_current(epoch) {
                debug!("Ignoring negotiation error of a stopped session: {}", e);
                return Ok(());
            }
            if let Ok(next) = state.phase.transition(NegotiationEvent::ExchangeFailed) {
                state.phase = next;
            }
            self.status_tx.send_modify(|s| s.is_connecting = false);
        }

        error!("Offer/answer exchange failed: {}", e);
        self.events
            .publish(SessionEvent::error(format!("Connection failed: {}", e)));
        Err(e)
    }

    /// Any other start failure: close and reset everything
    async fn fail_start(&self, epoch: u64, e: AppError) -> Result<()> {
        let released = {
            let mut state = self.state.lock();
            if !self.is_current(epoch) {
                debug!("Ignoring start error of a stopped session: {}", e);
                return Ok(());
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.status_tx.send_replace(SessionStatus::default());
            self.release(&mut state)
        };
        released.close().await;

        error!("Failed to start session: {}", e);
        self.events
            .publish(SessionEvent::error(format!("Failed to start stream: {}", e)));
        Err(e)
    }

    async fn handle_connection_state(&self, epoch: u64, rtc_state: RTCPeerConnectionState) {
        let Some(conn_state) = ConnectionState::from_rtc(rtc_state) else {
            return;
        };

        let (status, transport) = {
            let mut state = self.state.lock();
            if !self.is_current(epoch) {
                return;
            }

            let event = match conn_state {
                ConnectionState::Connected => Some(NegotiationEvent::TransportConnected),
                s if s.is_terminal() => Some(NegotiationEvent::TransportLost),
                _ => None,
            };
            if let Some(event) = event {
                match state.phase.transition(event) {
                    Ok(next) => state.phase = next,
                    Err(e) => debug!("{}", e),
                }
            }

            let status = self.status_tx.borrow().with_connection_state(conn_state);
            self.status_tx.send_replace(status);
            (status, state.transport.clone())
        };

        info!("Peer connection state: {}", conn_state);
        self.events.publish(SessionEvent::StateChanged {
            state: status.connection_state,
            is_streaming: status.is_streaming,
            is_connecting: status.is_connecting,
        });

        if conn_state.is_terminal() {
            if let Some(transport) = transport {
                transport.on_terminal_state().await;
            }
        }
    }

    fn handle_remote_track(&self, epoch: u64, track: Arc<TrackRemote>) {
        if track.kind() != RTPCodecType::Video {
            debug!("Ignoring remote {:?} track", track.kind());
            return;
        }

        let info = RemoteTrackInfo {
            track_id: track.id(),
            codec: track.codec().capability.mime_type,
        };

        {
            let mut state = self.state.lock();
            if !self.is_current(epoch) {
                return;
            }
            if self.config.monitor_remote_video {
                let monitor = RemoteVideoMonitor::spawn(track, self.cancel.child_token());
                if let Some(old) = state.monitor.replace(monitor) {
                    old.stop();
                }
            }
            state.remote_track = Some(info.clone());
        }

        self.events.publish(SessionEvent::RemoteTrack {
            track_id: info.track_id,
            codec: info.codec,
        });
    }

    async fn handle_stream_stopped(&self, epoch: u64, error_message: Option<String>) {
        let released = {
            let mut state = self.state.lock();
            if !self.is_current(epoch) {
                return;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            self.status_tx.send_modify(|s| {
                s.is_streaming = false;
                s.is_connecting = false;
                s.connection_state = ConnectionState::Closed;
            });
            self.release(&mut state)
        };

        self.events.publish(SessionEvent::StreamStopped {
            error_message: error_message.clone(),
        });
        if let Some(message) = error_message {
            self.events.publish(SessionEvent::error(message));
        }

        released.close().await;
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        let state = self.state.get_mut();
        let transport = state.transport.take();
        let pc = state.pc.take();

        // Connection callbacks can no longer reach this session
        if let Some(transport) = &transport {
            transport.release();
        }
        if transport.is_none() && pc.is_none() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Some(transport) = transport {
                    transport.teardown().await;
                }
                if let Some(pc) = pc {
                    if let Err(e) = pc.close().await {
                        warn!("Failed to close peer connection: {}", e);
                    }
                }
            });
        }
    }
}
