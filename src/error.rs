//! Error taxonomy shared by sources, the compositor and the orchestrator

use std::fmt;

use thiserror::Error;

use crate::SlotId;

/// Pipeline stage that raised an error.
///
/// Carried on every error event so routing never depends on element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorOrigin {
    /// Network session with the NVR
    Transport,
    Demux,
    Parse,
    Decode,
    Convert,
    Sink,
    /// The shared compositing pipeline
    Compositor,
    Unknown,
}

/// How an error is handled once it reaches the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Pipeline could not be built; fatal for that source
    Construction,
    /// Session failure; recovered by resetting the source
    Transport,
    /// Decode/format failures; logged only
    OtherPipeline,
    /// Compositor slot refused a frame; frame dropped
    PushRejected,
}

impl ErrorOrigin {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorOrigin::Transport => ErrorClass::Transport,
            _ => ErrorClass::OtherPipeline,
        }
    }
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorOrigin::Transport => "transport",
            ErrorOrigin::Demux => "demux",
            ErrorOrigin::Parse => "parse",
            ErrorOrigin::Decode => "decode",
            ErrorOrigin::Convert => "convert",
            ErrorOrigin::Sink => "sink",
            ErrorOrigin::Compositor => "compositor",
            ErrorOrigin::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error reported asynchronously by a running pipeline
#[derive(Debug, Clone, Error)]
#[error("{origin} error: {message}")]
pub struct PipelineError {
    pub origin: ErrorOrigin,
    pub message: String,
    pub debug: Option<String>,
}

impl PipelineError {
    pub fn new(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            debug: None,
        }
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }
}

/// Failure to build a source or compositor pipeline
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("failed to create `{factory}` element: {reason}")]
    ElementCreation { factory: String, reason: String },

    #[error("pipeline stages could not be linked: {0}")]
    Link(String),

    #[error("media engine initialisation failed: {0}")]
    Init(String),
}

impl ConstructionError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Construction
    }
}

/// Requested state could not be reached
#[derive(Debug, Error)]
#[error("{target} failed to change state to {state}: {reason}")]
pub struct StateChangeError {
    pub target: String,
    pub state: String,
    pub reason: String,
}

/// Result of a rejected compositor push
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("slot {0} is not accepting data")]
    Busy(SlotId),

    #[error("no compositor slot {0}")]
    UnknownSlot(SlotId),

    #[error("slot {slot} rejected frame: {reason}")]
    Flow { slot: SlotId, reason: String },
}

impl PushError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::PushRejected
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {0} already has a frame consumer")]
    CallbackAlreadyRegistered(SlotId),

    #[error(transparent)]
    StateChange(#[from] StateChangeError),
}

/// Anything that prevents the orchestrator from entering its event loop
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("slot {slot}: {source}")]
    Source {
        slot: SlotId,
        #[source]
        source: ConstructionError,
    },

    #[error("compositor: {0}")]
    Compositor(#[source] ConstructionError),

    #[error(transparent)]
    Callback(#[from] SourceError),

    #[error(transparent)]
    StateChange(#[from] StateChangeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no NVR sources configured")]
    NoSources,

    #[error("canvas must be non-empty, got {width}x{height}")]
    EmptyCanvas { width: u32, height: u32 },

    #[error("frame queue size must be at least 1")]
    EmptyQueue,

    #[error("invalid NVR endpoint `{0}`, expected HOST:PORT:CHANNEL[:SUBCHANNEL]")]
    InvalidEndpoint(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}
