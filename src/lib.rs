//! Duplex microphone streaming over a websocket.
//!
//! Captured PCM is amplified, μ-law encoded and sent as base64 `media`
//! events; `media` events from the server are decoded and played back.

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod net_link;
pub mod operator;
pub mod protocol;

pub use config::Config;
pub use controller::{SessionController, SessionEvent, SessionEventKind, SessionState};
pub use error::{InboundError, SessionError};
