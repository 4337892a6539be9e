use thiserror::Error;

/// User-visible failures of a streaming session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Device access was refused before anything was opened.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// Opening, reading or writing an audio device failed.
    #[error("audio device failure: {0:#}")]
    Device(anyhow::Error),

    /// The socket could not be opened or dropped mid-session.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl SessionError {
    /// Title shown on the error surface.
    pub fn title(&self) -> &'static str {
        match self {
            SessionError::PermissionDenied(_) => "Permission Denied",
            SessionError::Device(_) => "Audio Device Error",
            SessionError::Transport(_) => "WebSocket Error",
        }
    }
}

/// Reasons an inbound text frame is dropped.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}
