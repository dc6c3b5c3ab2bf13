//! Peer connection construction and offer creation

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::config::WebRtcConfig;
use super::track::LocalStream;
use crate::error::{AppError, Result};

/// Create a peer connection with default codecs and interceptors
pub async fn new_peer_connection(config: &WebRtcConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: config.ice_servers(),
        ..Default::default()
    };

    let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
        AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
    })?;

    debug!(
        "Peer connection created ({} ICE servers)",
        config.stun_servers.len() + config.turn_servers.len()
    );
    Ok(Arc::new(pc))
}

/// Add the local video tracks, or a receive-only video transceiver
///
/// Returns the number of local tracks added.
pub async fn attach_media(pc: &RTCPeerConnection, local: Option<&LocalStream>) -> Result<usize> {
    let tracks = local.map(|s| s.video_tracks()).unwrap_or_default();

    if tracks.is_empty() {
        pc.add_transceiver_from_kind(
            RTPCodecType::Video,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await
        .map_err(|e| AppError::WebRtcError(format!("Failed to add transceiver: {}", e)))?;
        info!("No local video, offering receive-only");
        return Ok(0);
    }

    for track in &tracks {
        let sender = pc
            .add_track(track.clone())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add video track: {}", e)))?;

        // RTCP must be drained for interceptors (NACK, reports) to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });
    }

    info!("Added {} local video track(s)", tracks.len());
    Ok(tracks.len())
}

/// Create an offer, set it locally and wait for ICE gathering
///
/// Gathering is bounded by `gathering_timeout`; on timeout the description
/// with the candidates gathered so far is returned.
pub async fn create_local_offer(
    pc: &RTCPeerConnection,
    gathering_timeout: Duration,
) -> Result<RTCSessionDescription> {
    let offer = pc
        .create_offer(None)
        .await
        .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

    let mut gather_complete = pc.gathering_complete_promise().await;

    pc.set_local_description(offer)
        .await
        .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

    if tokio::time::timeout(gathering_timeout, gather_complete.recv())
        .await
        .is_err()
    {
        warn!(
            "ICE gathering not complete after {:?}, sending partial offer",
            gathering_timeout
        );
    }

    pc.local_description()
        .await
        .ok_or_else(|| AppError::WebRtcError("Local description missing after offer".to_string()))
}

/// Apply a remote SDP answer
pub async fn apply_answer(pc: &RTCPeerConnection, sdp: String) -> Result<()> {
    let answer = RTCSessionDescription::answer(sdp)
        .map_err(|e| AppError::WebRtcError(format!("Invalid SDP answer: {}", e)))?;

    pc.set_remote_description(answer)
        .await
        .map_err(|e| AppError::WebRtcError(format!("Failed to set remote description: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    fn offline_config() -> WebRtcConfig {
        WebRtcConfig {
            stun_servers: vec![],
            gathering_timeout_ms: 2000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_recvonly_offer_without_local_stream() {
        let pc = new_peer_connection(&offline_config()).await.unwrap();
        assert_eq!(attach_media(&pc, None).await.unwrap(), 0);

        let offer = create_local_offer(&pc, Duration::from_secs(2)).await.unwrap();
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("a=recvonly"));
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_track_is_sent() {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            "local".to_owned(),
        ));
        let stream = LocalStream::new("local").with_track(track);

        let pc = new_peer_connection(&offline_config()).await.unwrap();
        assert_eq!(attach_media(&pc, Some(&stream)).await.unwrap(), 1);
        assert_eq!(pc.get_senders().await.len(), 1);

        let offer = create_local_offer(&pc, Duration::from_secs(2)).await.unwrap();
        assert!(offer.sdp.contains("a=sendrecv") || offer.sdp.contains("a=sendonly"));
        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_answer_rejects_garbage() {
        let pc = new_peer_connection(&offline_config()).await.unwrap();
        assert!(apply_answer(&pc, "not sdp".to_string()).await.is_err());
        pc.close().await.unwrap();
    }
}
