//! Connection state and the offer/answer state machine
//!
//! Negotiation is modelled independently of webrtc-rs callbacks:
//!
//! ```text
//!            OfferCreated          OfferSent           TransportConnected
//!   Idle ----------------> Offering ---------> AwaitingAnswer ----------> Connected
//!    ^                        |                     |   |                    |
//!    |      ExchangeFailed    |                     |   | AnswerApplied      | TransportLost
//!    +------------------------+---------------------+   +--(stays)           v
//!    |                                                                     Closed
//!    +----------------------------------- Stopped (from any phase) --------+
//! ```

use serde::{Deserialize, Serialize};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Connection state, mirrored from the peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Disconnected, failed and closed end a streaming session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }

    /// Map a webrtc-rs state; `Unspecified` has no counterpart
    pub fn from_rtc(state: RTCPeerConnectionState) -> Option<Self> {
        match state {
            RTCPeerConnectionState::New => Some(ConnectionState::New),
            RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
            RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
            RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
            RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
            RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// What a UI needs to render the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub is_streaming: bool,
    pub is_connecting: bool,
}

impl SessionStatus {
    /// Status after the peer connection reports `state`
    ///
    /// Non-terminal, non-connected states keep the current flags.
    pub fn with_connection_state(self, state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self {
                connection_state: state,
                is_streaming: true,
                is_connecting: false,
            },
            s if s.is_terminal() => Self {
                connection_state: state,
                is_streaming: false,
                is_connecting: false,
            },
            _ => Self {
                connection_state: state,
                ..self
            },
        }
    }
}

/// Offer/answer negotiation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationPhase {
    #[default]
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Closed,
}

/// Input to [`NegotiationPhase::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// Local offer created and set
    OfferCreated,
    /// Gathering done, offer handed to the transport
    OfferSent,
    /// Remote answer applied
    AnswerApplied,
    TransportConnected,
    /// Disconnected, failed or closed
    TransportLost,
    /// Offer/answer exchange failed; the connection object is kept
    ExchangeFailed,
    /// Explicit stop
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid negotiation transition: {event:?} in {from:?}")]
pub struct InvalidTransition {
    pub from: NegotiationPhase,
    pub event: NegotiationEvent,
}

impl NegotiationPhase {
    pub fn transition(self, event: NegotiationEvent) -> Result<Self, InvalidTransition> {
        use NegotiationEvent as E;
        use NegotiationPhase as P;

        let next = match (self, event) {
            (_, E::Stopped) => P::Idle,
            (P::Idle, E::OfferCreated) => P::Offering,
            (P::Offering, E::OfferSent) => P::AwaitingAnswer,
            (P::AwaitingAnswer, E::AnswerApplied) => P::AwaitingAnswer,
            // ICE may complete before the answer task observes its own result
            (P::Offering | P::AwaitingAnswer, E::TransportConnected) => P::Connected,
            (P::Connected, E::TransportConnected) => P::Connected,
            (P::Offering | P::AwaitingAnswer, E::ExchangeFailed) => P::Idle,
            (P::Offering | P::AwaitingAnswer | P::Connected, E::TransportLost) => P::Closed,
            (P::Closed, E::TransportLost) => P::Closed,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationEvent as E;
    use NegotiationPhase as P;

    #[test]
    fn test_happy_path() {
        let phase = P::Idle
            .transition(E::OfferCreated)
            .and_then(|p| p.transition(E::OfferSent))
            .and_then(|p| p.transition(E::AnswerApplied))
            .and_then(|p| p.transition(E::TransportConnected))
            .unwrap();
        assert_eq!(phase, P::Connected);
        assert_eq!(phase.transition(E::TransportLost).unwrap(), P::Closed);
    }

    #[test]
    fn test_exchange_failure_returns_to_idle() {
        let phase = P::Offering.transition(E::OfferSent).unwrap();
        assert_eq!(phase, P::AwaitingAnswer);
        assert_eq!(phase.transition(E::ExchangeFailed).unwrap(), P::Idle);
    }

    #[test]
    fn test_stop_from_any_phase() {
        for phase in [P::Idle, P::Offering, P::AwaitingAnswer, P::Connected, P::Closed] {
            assert_eq!(phase.transition(E::Stopped).unwrap(), P::Idle);
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(P::Idle.transition(E::OfferSent).is_err());
        assert!(P::Idle.transition(E::TransportConnected).is_err());
        assert!(P::Connected.transition(E::OfferCreated).is_err());
        let err = P::Closed.transition(E::ExchangeFailed).unwrap_err();
        assert_eq!(err.from, P::Closed);
    }

    #[test]
    fn test_status_follows_connection_state() {
        let connecting = SessionStatus {
            is_connecting: true,
            ..Default::default()
        };

        let s = connecting.with_connection_state(ConnectionState::Connecting);
        assert!(s.is_connecting && !s.is_streaming);

        let s = s.with_connection_state(ConnectionState::Connected);
        assert!(s.is_streaming && !s.is_connecting);

        for terminal in [
            ConnectionState::Disconnected,
            ConnectionState::Failed,
            ConnectionState::Closed,
        ] {
            let t = s.with_connection_state(terminal);
            assert!(!t.is_streaming && !t.is_connecting);
            assert_eq!(t.connection_state, terminal);
        }
    }

    #[test]
    fn test_from_rtc_state() {
        assert_eq!(
            ConnectionState::from_rtc(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
        assert_eq!(
            ConnectionState::from_rtc(RTCPeerConnectionState::Unspecified),
            None
        );
    }
}
