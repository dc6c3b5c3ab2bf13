//! Parameter data channel protocol
//!
//! Outgoing messages are JSON-serialized [`PipelineParameterUpdate`]s sent as
//! text. The backend sends small JSON notices back:
//!
//! ```json
//! {"type": "stream_stopped", "error_message": "CUDA out of memory"}
//! ```

use serde::Deserialize;
use tracing::warn;

use crate::error::Result;
use crate::pipeline::params::PipelineParameterUpdate;

/// Message received from the backend on the data channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMessage {
    /// The backend stopped the stream
    StreamStopped {
        #[serde(default)]
        error_message: Option<String>,
    },
    /// Any other message type
    #[serde(other)]
    Unknown,
}

/// Parse an incoming message; invalid JSON is logged and dropped
pub fn parse_channel_message(data: &[u8]) -> Option<ChannelMessage> {
    match serde_json::from_slice::<ChannelMessage>(data) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(
                "Failed to parse data channel message ({} bytes): {}",
                data.len(),
                e
            );
            None
        }
    }
}

/// Encode a parameter update as a data channel text message
pub fn encode_update(update: &PipelineParameterUpdate) -> Result<String> {
    Ok(serde_json::to_string(update)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_stopped() {
        let msg = parse_channel_message(br#"{"type":"stream_stopped","error_message":"OOM"}"#);
        assert_eq!(
            msg,
            Some(ChannelMessage::StreamStopped {
                error_message: Some("OOM".to_string())
            })
        );

        let msg = parse_channel_message(br#"{"type":"stream_stopped"}"#);
        assert_eq!(
            msg,
            Some(ChannelMessage::StreamStopped {
                error_message: None
            })
        );
    }

    #[test]
    fn test_parse_unknown_and_invalid() {
        assert_eq!(
            parse_channel_message(br#"{"type":"heartbeat","seq":3}"#),
            Some(ChannelMessage::Unknown)
        );
        assert_eq!(parse_channel_message(b"not json"), None);
        assert_eq!(parse_channel_message(br#"{"no_type":true}"#), None);
    }

    #[test]
    fn test_encode_update() {
        let update = PipelineParameterUpdate {
            paused: Some(true),
            ..Default::default()
        };
        assert_eq!(encode_update(&update).unwrap(), r#"{"paused":true}"#);
    }
}
