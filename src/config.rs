use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::audio::AlsaBackend;
use crate::net_link::LinkOptions;

/// Environment prefix, e.g. `MEDIA_STREAM_NETWORK__URL`.
pub const ENV_PREFIX: &str = "MEDIA_STREAM";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Media server websocket endpoint
    pub url: String,
    /// Identifier sent with the `start` event; empty means generate one
    pub stream_sid: String,
    pub connect_timeout_ms: u64,
    /// How long a stop waits for the close handshake
    pub close_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Linear gain applied to captured samples
    pub gain: f32,
    /// Desired ALSA period size in frames (0 = let ALSA decide)
    pub period_frames: usize,
    /// Upper bound on one capture wait
    pub read_timeout_ms: u32,
    /// Upper bound on one playback queue pop
    pub pop_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                url: "wss://s2s.coralcell.com/media".to_string(),
                stream_sid: "12345".to_string(),
                connect_timeout_ms: 10_000,
                close_timeout_ms: 2_000,
            },
            audio: AudioConfig {
                capture_device: "default".to_string(),
                playback_device: "default".to_string(),
                gain: 2.0,
                period_frames: 0,
                read_timeout_ms: 100,
                pop_timeout_ms: 20,
            },
        }
    }
}

impl Config {
    /// Defaults, then `config.toml` (or `path`) if present, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("config").required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        if config.network.stream_sid.trim().is_empty() {
            config.network.stream_sid = Uuid::new_v4().to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.network.url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!("network.url must be a ws:// or wss:// URL, got {}", self.network.url);
        }
        if !self.audio.gain.is_finite() || self.audio.gain < 0.0 {
            bail!("audio.gain must be a non-negative number, got {}", self.audio.gain);
        }
        if self.network.connect_timeout_ms == 0 || self.network.close_timeout_ms == 0 {
            bail!("network timeouts must be greater than 0");
        }
        if self.audio.read_timeout_ms == 0 || self.audio.pop_timeout_ms == 0 {
            bail!("audio timeouts must be greater than 0");
        }
        Ok(())
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            url: self.network.url.clone(),
            stream_sid: self.network.stream_sid.clone(),
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
        }
    }

    pub fn alsa_backend(&self) -> AlsaBackend {
        AlsaBackend {
            capture_device: self.audio.capture_device.clone(),
            playback_device: self.audio.playback_device.clone(),
            period_frames: self.audio.period_frames,
            read_timeout_ms: self.audio.read_timeout_ms,
        }
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.network.close_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.audio.pop_timeout_ms)
    }
}
