//! Relay indirection
//!
//! When a relay stream is active, pipeline-control calls are not sent to the
//! backend; they are wrapped in a [`ForwardEnvelope`] and posted to the
//! relay's per-stream update endpoint instead.
//!
//! The active stream id lives in a [`RelayContext`]. A context is owned by an
//! [`ApiClient`](crate::api::ApiClient) and shared with its clones and with
//! the session that started the relay stream, so two independent clients
//! never observe each other's relay.

pub mod client;

pub use client::LivepeerClient;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Handle returned by the relay when a stream starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStreamHandle {
    /// WHEP endpoint for the media path
    pub whep_url: String,
    /// Relay stream id, used for update forwarding
    pub stream_id: String,
    /// Any other fields the relay returned
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a forwarded control call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardEnvelope {
    /// Original backend route, including the query string
    pub route: String,
    /// Original request body (`null` for bodyless calls)
    pub request: Value,
}

/// Currently active relay stream id, shared by clones
#[derive(Debug, Clone, Default)]
pub struct RelayContext {
    stream_id: Arc<ArcSwapOption<String>>,
}

impl RelayContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route subsequent control calls through `stream_id`
    pub fn set(&self, stream_id: impl Into<String>) {
        let stream_id = stream_id.into();
        debug!("Relay routing enabled for stream {}", stream_id);
        self.stream_id.store(Some(Arc::new(stream_id)));
    }

    /// Current relay stream id, if any
    pub fn current(&self) -> Option<String> {
        self.stream_id.load_full().map(|id| (*id).clone())
    }

    pub fn is_active(&self) -> bool {
        self.stream_id.load().is_some()
    }

    /// Stop routing through the relay
    ///
    /// Returns the id that was cleared; `None` if nothing was active, so
    /// concurrent clears observe exactly one winner.
    pub fn clear(&self) -> Option<String> {
        let previous = self.stream_id.swap(None).map(|id| (*id).clone());
        if let Some(ref id) = previous {
            debug!("Relay routing disabled (stream {})", id);
        }
        previous
    }

    /// Clear only if `stream_id` is still the active one
    ///
    /// Used by teardown paths so a stale session never clears a newer stream.
    pub fn clear_if(&self, stream_id: &str) -> bool {
        let current = self.stream_id.load_full();
        match current {
            Some(ref id) if id.as_str() == stream_id => {
                let prev = self.stream_id.compare_and_swap(&current, None);
                let cleared = matches!(&*prev, Some(p) if Arc::ptr_eq(p, id));
                if cleared {
                    debug!("Relay routing disabled (stream {})", stream_id);
                }
                cleared
            }
            _ => false,
        }
    }
}
