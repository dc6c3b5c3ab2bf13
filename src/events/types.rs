//! Session event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::webrtc::signaling::ConnectionState;
use crate::webrtc::transport::TransportKind;

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Session events
///
/// Serialized as
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "state": "connected", "is_streaming": true, "is_connecting": false }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    /// Peer connection state mirrored from the transport
    #[serde(rename = "session.state_changed")]
    StateChanged {
        state: ConnectionState,
        is_streaming: bool,
        is_connecting: bool,
    },

    /// Negotiation finished and the remote description is applied
    #[serde(rename = "session.negotiated")]
    Negotiated { transport: TransportKind },

    /// Generated video track arrived from the backend
    #[serde(rename = "session.remote_track")]
    RemoteTrack {
        track_id: String,
        /// Codec MIME type, e.g. "video/VP8"
        codec: String,
    },

    /// Backend stopped the stream via the data channel
    #[serde(rename = "session.stream_stopped")]
    StreamStopped {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },

    /// Relay stream became active; control calls are now forwarded
    #[serde(rename = "relay.stream_started")]
    RelayStreamStarted { stream_id: String, whep_url: String },

    /// Relay stream id cleared; control calls go to the backend again
    #[serde(rename = "relay.stream_cleared")]
    RelayStreamCleared { stream_id: String },

    /// Transient message for the user
    #[serde(rename = "notification")]
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl SessionEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "session.state_changed",
            Self::Negotiated { .. } => "session.negotiated",
            Self::RemoteTrack { .. } => "session.remote_track",
            Self::StreamStopped { .. } => "session.stream_stopped",
            Self::RelayStreamStarted { .. } => "relay.stream_started",
            Self::RelayStreamCleared { .. } => "relay.stream_cleared",
            Self::Notification { .. } => "notification",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Notification {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }
}
