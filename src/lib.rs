//! speech-relay: reads chat messages aloud into voice channels.
//!
//! Text goes through a VOICEVOX-compatible engine chosen by the
//! [`router::EndpointRouter`], with a secondary provider behind it, and the
//! resulting audio is played in order per voice destination by
//! [`playback::PlaybackQueue`].

pub mod artifact;
pub mod backends;
pub mod chat;
pub mod config_loader;
pub mod engine;
pub mod error;
pub mod format;
pub mod gateway;
pub mod pipeline;
pub mod playback;
pub mod relay;
pub mod router;
