//! WebRTC configuration

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the parameter data channel
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "parameters";

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
    /// TURN server configuration
    pub turn_servers: Vec<TurnServer>,
    /// Label of the ordered data channel used for parameter updates
    pub data_channel_label: String,
    /// Upper bound on ICE candidate gathering before the offer is sent (ms)
    pub gathering_timeout_ms: u64,
    /// Read the received video track and collect frame statistics
    pub monitor_remote_video: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: vec![],
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            gathering_timeout_ms: 5000,
            monitor_remote_video: true,
        }
    }
}

impl WebRtcConfig {
    /// ICE servers in webrtc-rs form
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = vec![];

        for stun_url in &self.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_url.clone()],
                ..Default::default()
            });
        }

        for turn in &self.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        ice_servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnServer {
    /// TURN server URLs (e.g., ["turn:turn.example.com:3478?transport=udp"])
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_single_stun_server() {
        let config = WebRtcConfig::default();
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert!(servers[0].username.is_empty());
    }

    #[test]
    fn test_turn_servers_carry_credentials() {
        let config = WebRtcConfig {
            stun_servers: vec![],
            turn_servers: vec![TurnServer {
                urls: vec![
                    "turn:turn.example.com:3478?transport=udp".to_string(),
                    "turn:turn.example.com:3478?transport=tcp".to_string(),
                ],
                username: "user".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls.len(), 2);
        assert_eq!(servers[0].credential, "secret");
    }
}
