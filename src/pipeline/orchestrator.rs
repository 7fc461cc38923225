//! Wires sources to the compositor and runs the event loop
//!
//! Engine threads never touch orchestrator state. Frames arrive through a
//! bounded [`FrameQueue`], errors through an unbounded control channel that
//! is always served first, and both are handled one at a time on the loop.

use std::future::Future;
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::source::{Delivery, Fault, Source, SourceParams, SourceState};
use crate::display::compositor::Compositor;
use crate::display::layout::MosaicLayout;
use crate::error::{ErrorClass, PipelineError, StartupError};
use crate::pipeline::engine::MediaEngine;
use crate::pipeline::queue::{frame_queue, FrameQueue, FrameQueueReceiver, QueueStats};
use crate::{DisplayConfig, PipelineConfig, SlotId};

/// Notifications that change lifecycle state
#[derive(Debug, Clone)]
pub enum ControlEvent {
    SourceFault(Fault),
    CompositorFault(PipelineError),
}

enum LoopEvent {
    Shutdown,
    Control(ControlEvent),
    Frame(Delivery),
    Retry,
}

pub struct Orchestrator {
    sources: Vec<Source>,
    compositor: Compositor,
    frame_queue: FrameQueue,
    frames: FrameQueueReceiver,
    control_rx: Receiver<ControlEvent>,
    reconnect_delay: Duration,
    retry_at: Vec<Option<Instant>>,
    compositor_retry_at: Option<Instant>,
    started: bool,
}

impl Orchestrator {
    /// Build the compositor and every source, in slot order
    ///
    /// Any construction failure aborts startup; pipelines already built are
    /// dropped without having been started.
    pub fn new(
        engine: &dyn MediaEngine,
        params: Vec<SourceParams>,
        display: &DisplayConfig,
        pipeline: &PipelineConfig,
    ) -> Result<Self, StartupError> {
        let layout = MosaicLayout::new(params.len(), display.width, display.height);
        let handle = engine
            .create_compositor(&layout)
            .map_err(StartupError::Compositor)?;
        let mut compositor = Compositor::new(handle, layout, pipeline.start_policy);

        let (frame_queue, frames) = frame_queue(pipeline.frame_queue_size.max(1));
        let (control_tx, control_rx) = flume::unbounded();

        let tx = control_tx.clone();
        compositor.on_error(Box::new(move |error| {
            let _ = tx.send(ControlEvent::CompositorFault(error));
        }));

        let mut sources = Vec::with_capacity(params.len());
        for (index, params) in params.into_iter().enumerate() {
            let slot = SlotId(index);
            let source = Source::connect(slot, params, engine).map_err(|source| {
                error!(%slot, "Failed to build source: {}", source);
                StartupError::Source { slot, source }
            })?;
            sources.push(Self::wire(source, &frame_queue, &control_tx)?);
        }

        let retry_at = vec![None; sources.len()];
        Ok(Self {
            sources,
            compositor,
            frame_queue,
            frames,
            control_rx,
            reconnect_delay: pipeline.reconnect_delay(),
            retry_at,
            compositor_retry_at: None,
            started: false,
        })
    }

    fn wire(
        mut source: Source,
        queue: &FrameQueue,
        control_tx: &Sender<ControlEvent>,
    ) -> Result<Source, StartupError> {
        let queue = queue.clone();
        source.on_frame(move |delivery| {
            queue.push(delivery);
        })?;
        let tx = control_tx.clone();
        source.on_error(move |fault| {
            let _ = tx.send(ControlEvent::SourceFault(fault));
        });
        Ok(source)
    }

    pub fn source(&self, slot: SlotId) -> Option<&Source> {
        self.sources.get(slot.index())
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.frame_queue.stats()
    }

    /// Ready the compositor and open every NVR session
    pub fn start(&mut self) -> Result<(), StartupError> {
        if self.started {
            return Ok(());
        }
        self.compositor.prepare()?;
        for source in &mut self.sources {
            source.start()?;
        }
        self.started = true;
        info!(sources = self.sources.len(), "All sources connecting");
        Ok(())
    }

    /// Run until `shutdown` resolves, then stop every pipeline
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        self.start()?;
        tokio::pin!(shutdown);
        let control_rx = self.control_rx.clone();

        loop {
            let next_retry = self.next_retry();
            let far_future = Instant::now() + Duration::from_secs(3600);

            let event = tokio::select! {
                biased;
                _ = &mut shutdown => LoopEvent::Shutdown,
                event = control_rx.recv_async() => match event {
                    Ok(event) => LoopEvent::Control(event),
                    Err(_) => LoopEvent::Shutdown,
                },
                _ = tokio::time::sleep_until(next_retry.unwrap_or(far_future)), if next_retry.is_some() => LoopEvent::Retry,
                delivery = self.frames.recv() => match delivery {
                    Some(delivery) => LoopEvent::Frame(delivery),
                    None => LoopEvent::Shutdown,
                },
            };

            match event {
                LoopEvent::Shutdown => break,
                LoopEvent::Control(event) => self.handle_control(event),
                LoopEvent::Frame(delivery) => self.handle_frame(delivery),
                LoopEvent::Retry => self.run_due_retries(Instant::now()),
            }
        }

        info!("Event loop stopping");
        self.shutdown();
        Ok(())
    }

    /// Handle everything already queued without waiting; control first
    pub fn pump(&mut self) -> usize {
        let mut handled = self.drain_control();
        while let Some(delivery) = self.frames.try_recv() {
            self.handle_frame(delivery);
            handled += 1 + self.drain_control();
        }
        handled
    }

    fn drain_control(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.control_rx.try_recv() {
            self.handle_control(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_frame(&mut self, delivery: Delivery) {
        let slot = delivery.slot;
        let Some(source) = self.sources.get_mut(slot.index()) else {
            warn!(%slot, "Frame for unknown slot");
            return;
        };
        let Some(accepted) = source.accept(delivery) else {
            metrics::counter!("frames_dropped", "reason" => "stale").increment(1);
            return;
        };
        self.compositor.submit(slot, accepted.sample, accepted.first);
    }

    pub fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::SourceFault(fault) => self.handle_source_fault(fault),
            ControlEvent::CompositorFault(error) => self.handle_compositor_fault(error),
        }
    }

    fn handle_source_fault(&mut self, fault: Fault) {
        let slot = fault.slot;
        let Some(source) = self.sources.get_mut(slot.index()) else {
            warn!(%slot, "Error for unknown slot: {}", fault.error);
            return;
        };
        if !source.is_current(fault.generation) {
            debug!(%slot, stale = fault.generation, "Ignoring error from previous connection: {}", fault.error);
            return;
        }

        match fault.error.origin.class() {
            ErrorClass::Transport => {
                warn!(
                    %slot,
                    debug = fault.error.debug.as_deref().unwrap_or("none"),
                    "Transport error, reconnecting: {}",
                    fault.error.message
                );
                source.mark_failed();
                self.compositor.release_slot(slot);
                metrics::counter!("source_resets", "slot" => slot.to_string()).increment(1);
                self.reset_source(slot);
            }
            _ => {
                error!(
                    %slot,
                    origin = %fault.error.origin,
                    debug = fault.error.debug.as_deref().unwrap_or("none"),
                    "Pipeline error: {}",
                    fault.error.message
                );
            }
        }
    }

    fn handle_compositor_fault(&mut self, error: PipelineError) {
        error!(
            debug = error.debug.as_deref().unwrap_or("none"),
            "Compositor error, restarting canvas: {}",
            error.message
        );
        self.restart_compositor();
    }

    fn restart_compositor(&mut self) {
        match self.compositor.restart() {
            Ok(()) => {
                self.compositor_retry_at = None;
                // The canvas timeline restarted, so every tile re-zeroes on its next frame
                for source in &mut self.sources {
                    source.clear_rebase_origin();
                }
            }
            Err(e) => {
                error!(retry_in = ?self.reconnect_delay, "Compositor restart failed: {}", e);
                self.compositor_retry_at = Some(Instant::now() + self.reconnect_delay);
            }
        }
    }

    fn reset_source(&mut self, slot: SlotId) {
        let index = slot.index();
        match self.sources[index].reset() {
            Ok(()) => self.retry_at[index] = None,
            Err(e) => {
                let at = Instant::now() + self.reconnect_delay;
                error!(%slot, retry_in = ?self.reconnect_delay, "Source reset failed: {}", e);
                self.retry_at[index] = Some(at);
            }
        }
    }

    fn next_retry(&self) -> Option<Instant> {
        self.retry_at
            .iter()
            .chain(std::iter::once(&self.compositor_retry_at))
            .flatten()
            .min()
            .copied()
    }

    /// Retry resets and compositor restarts whose delay has elapsed by `now`
    pub fn run_due_retries(&mut self, now: Instant) {
        if self.compositor_retry_at.is_some_and(|at| at <= now) {
            self.compositor_retry_at = None;
            info!("Retrying compositor restart");
            self.restart_compositor();
        }

        let due: Vec<SlotId> = self
            .retry_at
            .iter()
            .enumerate()
            .filter(|(_, at)| at.is_some_and(|at| at <= now))
            .map(|(index, _)| SlotId(index))
            .collect();
        for slot in due {
            self.retry_at[slot.index()] = None;
            if self.sources[slot.index()].state() == SourceState::Error {
                info!(%slot, "Retrying source reset");
                self.reset_source(slot);
            }
        }
    }

    /// Stop every source, then the compositor
    pub fn shutdown(&mut self) {
        for source in &mut self.sources {
            source.stop();
        }
        self.compositor.shutdown();
        let stats = self.frame_queue.stats();
        info!(
            written = stats.written,
            read = stats.read,
            dropped = stats.dropped,
            "Orchestrator stopped"
        );
    }
}
