//! WebRTC streaming session
//!
//! The client sends local video (or offers receive-only), receives the
//! generated video, and pushes live parameter updates while streaming.
//!
//! Architecture:
//! ```text
//! LocalStream (IVF file / any TrackLocal)
//!        |
//!        v
//! StreamSession ---- NegotiationPhase (offer/answer state machine)
//!        |
//!        +-- DirectTransport: offer -> backend /api/v1/webrtc/offer
//!        |                    updates -> "parameters" data channel
//!        |
//!        +-- RelayTransport:  relay /ai/stream/start, WHEP offer
//!                             updates -> relay /ai/stream/{id}/update
//!        |
//!        v
//! RemoteVideoMonitor (received RTP, frame rate)
//! ```

pub mod config;
pub mod datachannel;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod track;
pub mod transport;
pub mod whep;

pub use config::{TurnServer, WebRtcConfig};
pub use datachannel::ChannelMessage;
pub use session::{RemoteTrackInfo, StartOptions, StreamSession};
pub use signaling::{ConnectionState, NegotiationEvent, NegotiationPhase, SessionStatus};
pub use stats::{FrameRateMeter, RemoteVideoMonitor, RemoteVideoStats};
pub use track::{IvfVideoSource, LocalStream, LocalTrack};
pub use transport::{DirectTransport, RelayTransport, StreamTransport, TransportKind};
