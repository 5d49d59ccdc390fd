//! avatar-session - real-time avatar sessions over WebRTC
//!
//! This crate provides the session manager that negotiates and keeps alive a
//! peer connection to a remote avatar synthesis service, and an independent
//! microphone capture pipeline producing WAV clips for transcription.

pub mod audio;
pub mod avatar;
pub mod config;
pub mod error;
pub mod events;
pub mod state;
pub mod utils;
pub mod webrtc;

pub use error::{AppError, Result};
