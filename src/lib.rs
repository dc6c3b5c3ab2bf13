//! rtgen-client - client for real-time video generation pipelines
//!
//! This crate drives a remote inference server over WebRTC:
//! it negotiates a peer connection (directly or through a WHEP relay),
//! streams a local video track or offers receive-only, receives the
//! generated track back and pushes live parameter updates to the pipeline.

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod relay;
pub mod webrtc;

pub use error::{AppError, Result};
