pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{FrameSample, Source, SourceParams, SourceState};
pub use display::{Compositor, MosaicLayout, StartPolicy};
pub use error::{ConfigError, ConstructionError, ErrorOrigin, PipelineError, PushError};
pub use pipeline::{MediaEngine, Orchestrator};

/// Stable index of a source and of its compositor slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target state for source and compositor pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Playing,
    Stopped,
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: Vec<NvrEndpoint>,
    pub credentials: Credentials,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    #[cfg(feature = "gstreamer-pipeline")]
    pub gstreamer: GStreamerConfig,
}

/// One NVR channel, one mosaic tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvrEndpoint {
    pub host: String,
    pub port: u16,
    pub channel: u32,
    #[serde(default)]
    pub subchannel: u32,
}

/// Login shared by every configured NVR
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub fps_overlay: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub connect_timeout_secs: u32,
    pub frame_queue_size: usize,
    pub start_policy: StartPolicy,
    pub latency_ms: u64,
    pub reconnect_delay_ms: u64,
}

#[cfg(feature = "gstreamer-pipeline")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GStreamerConfig {
    pub use_hardware_acceleration: bool,
    pub h264_decoder: Option<String>,
    pub video_sink: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps_overlay: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            frame_queue_size: 32,
            start_policy: StartPolicy::FirstReady,
            latency_ms: 1000,
            reconnect_delay_ms: 2000,
        }
    }
}

#[cfg(feature = "gstreamer-pipeline")]
impl Default for GStreamerConfig {
    fn default() -> Self {
        Self {
            use_hardware_acceleration: true,
            h264_decoder: None,
            video_sink: None,
        }
    }
}

impl PipelineConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Config {
    /// Layer an optional TOML file and `QUADVIEW__*` environment variables over the defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("QUADVIEW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::EmptyCanvas {
                width: self.display.width,
                height: self.display.height,
            });
        }
        if self.pipeline.frame_queue_size == 0 {
            return Err(ConfigError::EmptyQueue);
        }
        Ok(())
    }

    /// Connection parameters for every source, in slot order
    pub fn source_params(&self) -> Vec<SourceParams> {
        self.sources
            .iter()
            .map(|endpoint| SourceParams {
                host: endpoint.host.clone(),
                port: endpoint.port,
                username: self.credentials.username.clone(),
                password: self.credentials.password.clone(),
                channel: endpoint.channel,
                subchannel: endpoint.subchannel,
                timeout: self.pipeline.connect_timeout(),
            })
            .collect()
    }
}

impl FromStr for NvrEndpoint {
    type Err = ConfigError;

    /// Parses `HOST:PORT:CHANNEL[:SUBCHANNEL]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidEndpoint(s.to_string());
        let parts: Vec<&str> = s.split(':').collect();
        let (host, port, channel, subchannel) = match parts.as_slice() {
            [host, port, channel] => (*host, *port, *channel, None),
            [host, port, channel, sub] => (*host, *port, *channel, Some(*sub)),
            _ => return Err(invalid()),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port: port.parse().map_err(|_| invalid())?,
            channel: channel.parse().map_err(|_| invalid())?,
            subchannel: match subchannel {
                Some(sub) => sub.parse().map_err(|_| invalid())?,
                None => 0,
            },
        })
    }
}
