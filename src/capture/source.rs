//! Per-channel source state machine
//!
//! A [`Source`] owns the media-engine handle for one NVR channel. Frames and
//! errors leave the engine on its worker threads stamped with the source's
//! connection generation; the orchestrator hands them back through
//! [`Source::accept`] and [`Source::is_current`], so anything produced by a
//! connection that has since been reset is discarded.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::capture::frame::FrameSample;
use crate::capture::rebase::TimestampRebaser;
use crate::error::{ConstructionError, PipelineError, SourceError, StateChangeError};
use crate::pipeline::engine::MediaEngine;
use crate::{EngineState, SlotId};

/// Consumer of raw samples produced on an engine thread
pub type FrameCallback = Box<dyn Fn(FrameSample) + Send + Sync + 'static>;

/// Consumer of errors produced on an engine thread
pub type ErrorCallback = Box<dyn Fn(PipelineError) + Send + Sync + 'static>;

/// Engine-side pipeline for one NVR channel
pub trait SourceHandle: Send {
    /// Install the single frame consumer
    fn on_frame(&mut self, callback: FrameCallback);

    fn on_error(&mut self, callback: ErrorCallback);

    /// Must succeed without effect when already in `state`
    fn set_state(&mut self, state: EngineState) -> Result<(), StateChangeError>;
}

/// NVR session parameters
#[derive(Clone, PartialEq, Eq)]
pub struct SourceParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub channel: u32,
    pub subchannel: u32,
    pub timeout: Duration,
}

impl fmt::Debug for SourceParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("channel", &self.channel)
            .field("subchannel", &self.subchannel)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Uninitialized,
    Connecting,
    Streaming,
    Error,
    /// Terminal, reached on shutdown
    Stopped,
}

/// A sample tagged with where and when it was produced
#[derive(Debug, Clone)]
pub struct Delivery {
    pub slot: SlotId,
    pub generation: u64,
    pub sample: FrameSample,
}

/// An error tagged with the connection that raised it
#[derive(Debug, Clone)]
pub struct Fault {
    pub slot: SlotId,
    pub generation: u64,
    pub error: PipelineError,
}

/// A delivery that passed the state and generation checks, already rebased
#[derive(Debug, Clone)]
pub struct Accepted {
    pub sample: FrameSample,
    /// Rebase-origin frame of this connection
    pub first: bool,
    pub clamped: bool,
}

pub struct Source {
    slot: SlotId,
    params: SourceParams,
    state: SourceState,
    handle: Box<dyn SourceHandle>,
    rebaser: TimestampRebaser,
    generation: Arc<AtomicU64>,
    has_consumer: bool,
    resets: u64,
}

impl Source {
    /// Build the ingestion pipeline for `params`; nothing is started yet
    pub fn connect(
        slot: SlotId,
        params: SourceParams,
        engine: &dyn MediaEngine,
    ) -> Result<Self, ConstructionError> {
        info!(%slot, host = %params.host, port = params.port, channel = params.channel, "Creating source");
        let handle = engine.create_source(slot, &params)?;
        Ok(Self::with_handle(slot, params, handle))
    }

    pub fn with_handle(slot: SlotId, params: SourceParams, handle: Box<dyn SourceHandle>) -> Self {
        Self {
            slot,
            params,
            state: SourceState::Uninitialized,
            handle,
            rebaser: TimestampRebaser::new(),
            generation: Arc::new(AtomicU64::new(0)),
            has_consumer: false,
            resets: 0,
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn params(&self) -> &SourceParams {
        &self.params
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn rebase_origin(&self) -> Option<Duration> {
        self.rebaser.origin()
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Register the one consumer of this source's frames
    pub fn on_frame<F>(&mut self, callback: F) -> Result<(), SourceError>
    where
        F: Fn(Delivery) + Send + Sync + 'static,
    {
        if self.has_consumer {
            return Err(SourceError::CallbackAlreadyRegistered(self.slot));
        }
        let slot = self.slot;
        let generation = Arc::clone(&self.generation);
        self.handle.on_frame(Box::new(move |sample| {
            callback(Delivery {
                slot,
                generation: generation.load(Ordering::Acquire),
                sample,
            })
        }));
        self.has_consumer = true;
        Ok(())
    }

    pub fn on_error<F>(&mut self, callback: F)
    where
        F: Fn(Fault) + Send + Sync + 'static,
    {
        let slot = self.slot;
        let generation = Arc::clone(&self.generation);
        self.handle.on_error(Box::new(move |error| {
            callback(Fault {
                slot,
                generation: generation.load(Ordering::Acquire),
                error,
            })
        }));
    }

    /// Open the NVR session
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.state != SourceState::Uninitialized {
            debug!(slot = %self.slot, state = ?self.state, "Source already started");
            return Ok(());
        }
        self.bring_up()
    }

    /// Stop and restart the connection, keeping the source identity
    ///
    /// The generation advances only once the pipeline has been torn down, so
    /// frames and errors the engine emits while stopping still carry the old
    /// stamp. Calling this on a stopped source does nothing.
    pub fn reset(&mut self) -> Result<(), SourceError> {
        if self.state == SourceState::Stopped {
            debug!(slot = %self.slot, "Ignoring reset of stopped source");
            return Ok(());
        }
        self.resets += 1;
        let stopped = self.handle.set_state(EngineState::Stopped);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.rebaser.clear();
        info!(slot = %self.slot, generation = self.generation(), "Resetting source");

        if let Err(e) = stopped {
            self.state = SourceState::Error;
            return Err(e.into());
        }
        self.bring_up()
    }

    /// Record a failure of the current connection
    pub fn mark_failed(&mut self) {
        if self.state != SourceState::Stopped {
            self.state = SourceState::Error;
        }
    }

    /// Take the next accepted frame as a new rebase origin
    pub fn clear_rebase_origin(&mut self) {
        self.rebaser.clear();
    }

    /// Whether an event stamped with `generation` belongs to the live connection
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation()
    }

    /// Validate and rebase a frame handed back by the orchestrator
    pub fn accept(&mut self, delivery: Delivery) -> Option<Accepted> {
        if !self.is_current(delivery.generation) {
            debug!(slot = %self.slot, stale = delivery.generation, "Dropping frame from previous connection");
            return None;
        }
        match self.state {
            SourceState::Connecting => {
                info!(slot = %self.slot, "Source streaming");
                self.state = SourceState::Streaming;
            }
            SourceState::Streaming => {}
            state => {
                debug!(slot = %self.slot, ?state, "Dropping frame outside of streaming");
                return None;
            }
        }

        let (sample, rebased) = self.rebaser.rebase_sample(&delivery.sample);
        if rebased.clamped {
            warn!(
                slot = %self.slot,
                raw = ?delivery.sample.pts(),
                origin = ?self.rebaser.origin(),
                "Timestamp earlier than rebase origin, clamped to zero"
            );
            metrics::counter!("timestamps_clamped", "slot" => self.slot.to_string()).increment(1);
        }
        Some(Accepted {
            sample,
            first: rebased.first,
            clamped: rebased.clamped,
        })
    }

    /// Shut the pipeline down for good
    pub fn stop(&mut self) {
        if self.state == SourceState::Stopped {
            return;
        }
        if let Err(e) = self.handle.set_state(EngineState::Stopped) {
            warn!(slot = %self.slot, "Failed to stop source: {}", e);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.state = SourceState::Stopped;
        info!(slot = %self.slot, "Source stopped");
    }

    fn bring_up(&mut self) -> Result<(), SourceError> {
        let result = self
            .handle
            .set_state(EngineState::Ready)
            .and_then(|_| self.handle.set_state(EngineState::Playing));
        match result {
            Ok(()) => {
                self.state = SourceState::Connecting;
                Ok(())
            }
            Err(e) => {
                self.state = SourceState::Error;
                Err(e.into())
            }
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("slot", &self.slot)
            .field("params", &self.params)
            .field("state", &self.state)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
