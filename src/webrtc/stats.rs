//! Received video statistics
//!
//! [`RemoteVideoMonitor`] reads RTP from the generated video track, counts
//! packets and frames, and rebroadcasts packets to any local consumer
//! (recorder, decoder). Frame rate is estimated with [`FrameRateMeter`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::rtp::packet::Packet;
use webrtc::track::track_remote::TrackRemote;

/// Frame timestamps kept for averaging
const FPS_WINDOW: usize = 30;
/// Minimum time between estimate updates
const FPS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
/// Smaller changes are ignored
const FPS_CHANGE_THRESHOLD: f64 = 0.1;
const MIN_FPS: f64 = 1.0;
const MAX_FPS: f64 = 60.0;
/// Estimate reported before enough frames have arrived
pub const INITIAL_FPS: f64 = 30.0;

/// Sliding-window frame rate estimate
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    timestamps: VecDeque<Instant>,
    fps: f64,
    last_update: Option<Instant>,
}

impl Default for FrameRateMeter {
    fn default() -> Self {
        Self::new(INITIAL_FPS)
    }
}

impl FrameRateMeter {
    pub fn new(initial_fps: f64) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(FPS_WINDOW),
            fps: initial_fps,
            last_update: None,
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Record a frame at `now`; returns the new estimate if it changed
    pub fn record_frame(&mut self, now: Instant) -> Option<f64> {
        if self.timestamps.len() == FPS_WINDOW {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(now);

        let last_update = *self.last_update.get_or_insert(now);
        if now.duration_since(last_update) < FPS_UPDATE_INTERVAL {
            return None;
        }
        self.last_update = Some(now);

        let estimate = self.estimate()?;
        if (estimate - self.fps).abs() > FPS_CHANGE_THRESHOLD {
            debug!("Frame rate estimate {:.1} -> {:.1}", self.fps, estimate);
            self.fps = estimate;
            Some(estimate)
        } else {
            None
        }
    }

    fn estimate(&self) -> Option<f64> {
        let intervals: Vec<f64> = self
            .timestamps
            .iter()
            .zip(self.timestamps.iter().skip(1))
            .map(|(a, b)| b.duration_since(*a).as_secs_f64())
            .filter(|d| *d > 0.0)
            .collect();

        if intervals.is_empty() {
            return None;
        }
        let avg = intervals.iter().sum::<f64>() / intervals.len() as f64;
        Some((1.0 / avg).clamp(MIN_FPS, MAX_FPS))
    }
}

/// Snapshot of received video statistics
#[derive(Debug, Clone, Default)]
pub struct RemoteVideoStats {
    /// RTP packets received
    pub packets: u64,
    /// Payload bytes received
    pub bytes: u64,
    /// Frames completed (RTP marker bit)
    pub frames: u64,
    /// Current frame rate estimate
    pub fps: f64,
}

#[derive(Debug, Default)]
struct MonitorState {
    stats: RemoteVideoStats,
    meter: FrameRateMeter,
}

impl MonitorState {
    fn on_packet(&mut self, packet: &Packet, now: Instant) {
        self.stats.packets += 1;
        self.stats.bytes += packet.payload.len() as u64;
        if packet.header.marker {
            self.stats.frames += 1;
            self.meter.record_frame(now);
        }
        self.stats.fps = self.meter.fps();
    }
}

/// Reader task for the received video track
pub struct RemoteVideoMonitor {
    track_id: String,
    codec: String,
    state: Arc<Mutex<MonitorState>>,
    packet_tx: broadcast::Sender<Packet>,
    cancel: CancellationToken,
}

impl RemoteVideoMonitor {
    /// Start reading `track` until it ends or `cancel` fires
    pub fn spawn(track: Arc<TrackRemote>, cancel: CancellationToken) -> Arc<Self> {
        let (packet_tx, _) = broadcast::channel(256);
        let monitor = Arc::new(Self {
            track_id: track.id(),
            codec: track.codec().capability.mime_type,
            state: Arc::new(Mutex::new(MonitorState::default())),
            packet_tx,
            cancel,
        });

        info!(
            "Receiving remote video track {} ({})",
            monitor.track_id, monitor.codec
        );

        let state = monitor.state.clone();
        let packet_tx = monitor.packet_tx.clone();
        let cancel = monitor.cancel.clone();
        let track_id = monitor.track_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = track.read_rtp() => {
                        match result {
                            Ok((packet, _)) => {
                                state.lock().on_packet(&packet, Instant::now());
                                let _ = packet_tx.send(packet);
                            }
                            Err(e) => {
                                debug!("Remote track {} ended: {}", track_id, e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        monitor
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Codec MIME type
    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn stats(&self) -> RemoteVideoStats {
        self.state.lock().stats.clone()
    }

    /// Subscribe to received RTP packets
    pub fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.packet_tx.subscribe()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for RemoteVideoMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
