use std::path::PathBuf;
use thiserror::Error;

/// A liveness probe against one endpoint did not come back healthy.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Transport(String),

    #[error("probe returned HTTP {0}")]
    Status(u16),
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("backend {endpoint} unavailable: {reason}")]
    BackendUnavailable { endpoint: String, reason: String },

    #[error("fallback provider unavailable: {0}")]
    FallbackUnavailable(String),

    #[error("synthesis failed (primary: {primary}; fallback: {fallback})")]
    SynthesisFailed { primary: String, fallback: String },

    #[error("nothing to synthesize")]
    EmptyText,

    #[error("failed to write audio artifact: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("voice sink is not connected to {0}")]
    NotConnected(String),

    #[error("audio artifact missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("could not decode audio: {0}")]
    Decode(String),

    #[error("playback queue for {0} is closed")]
    QueueClosed(String),
}

/// Failures surfaced to the user as command replies. The `Display` text is
/// exactly what gets sent back to the chat.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("ボイスチャンネルに参加してください。")]
    NoHealthyDestination,

    #[error("既にボイスチャンネルに接続しています。")]
    AlreadyConnected,

    #[error("あなたはボイスチャンネルに接続していません。")]
    NotConnected,

    #[error("ボイスチャンネルに接続できませんでした。")]
    Connect(#[source] PlaybackError),
}

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no synthesis endpoints configured")]
    NoEndpoints,
}
