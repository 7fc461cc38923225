//! Shared compositor and its restart-epoch policy
//!
//! Every restart of the compositor pipeline opens a new epoch with all
//! readiness flags cleared. Playback is activated at most once per epoch,
//! when the [`StartPolicy`] is first satisfied.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::frame::FrameSample;
use crate::capture::source::ErrorCallback;
use crate::display::layout::MosaicLayout;
use crate::error::{PushError, StateChangeError};
use crate::pipeline::readiness::ReadinessTracker;
use crate::{EngineState, SlotId};

/// Engine-side compositing pipeline, one ingestion slot per source
pub trait CompositorHandle: Send {
    fn push_frame(&mut self, slot: SlotId, frame: FrameSample) -> Result<(), PushError>;

    fn set_state(&mut self, state: EngineState) -> Result<(), StateChangeError>;

    /// The slot's next frame starts a new timeline
    fn release_slot(&mut self, _slot: SlotId) {}

    fn on_error(&mut self, callback: ErrorCallback);
}

/// When to activate playback within an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartPolicy {
    /// On the first source to deliver its origin frame
    #[default]
    FirstReady,
    /// Once every source has delivered its origin frame
    AllReady,
}

impl StartPolicy {
    fn satisfied(self, readiness: &ReadinessTracker) -> bool {
        match self {
            StartPolicy::FirstReady => readiness.any_ready(),
            StartPolicy::AllReady => readiness.all_ready(),
        }
    }
}

impl FromStr for StartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-ready" => Ok(StartPolicy::FirstReady),
            "all-ready" => Ok(StartPolicy::AllReady),
            other => Err(format!(
                "unknown start policy `{other}`, expected first-ready or all-ready"
            )),
        }
    }
}

impl fmt::Display for StartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPolicy::FirstReady => f.write_str("first-ready"),
            StartPolicy::AllReady => f.write_str("all-ready"),
        }
    }
}

/// What happened to a frame handed to [`Compositor::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Pushed,
    Dropped,
}

pub struct Compositor {
    handle: Box<dyn CompositorHandle>,
    layout: MosaicLayout,
    readiness: ReadinessTracker,
    /// Slots whose origin frame has been seen but not yet pushed
    awaiting: Vec<bool>,
    policy: StartPolicy,
    epoch: u64,
    playing: bool,
    activations: u64,
}

impl Compositor {
    pub fn new(handle: Box<dyn CompositorHandle>, layout: MosaicLayout, policy: StartPolicy) -> Self {
        let readiness = ReadinessTracker::new(layout.slot_count());
        let awaiting = vec![false; layout.slot_count()];
        Self {
            handle,
            layout,
            readiness,
            awaiting,
            policy,
            epoch: 0,
            playing: false,
            activations: 0,
        }
    }

    pub fn layout(&self) -> &MosaicLayout {
        &self.layout
    }

    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    pub fn policy(&self) -> StartPolicy {
        self.policy
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Number of playback activations since creation
    pub fn activations(&self) -> u64 {
        self.activations
    }

    pub fn on_error(&mut self, callback: ErrorCallback) {
        self.handle.on_error(callback);
    }

    /// Bring the pipeline to Ready so slots can accept data
    pub fn prepare(&mut self) -> Result<(), StateChangeError> {
        self.handle.set_state(EngineState::Ready)?;
        info!(epoch = self.epoch, slots = self.layout.slot_count(), policy = %self.policy, "Compositor ready");
        Ok(())
    }

    /// Feed a rebased frame into `slot`
    ///
    /// `first` marks the rebase-origin frame of a connection. The slot becomes
    /// ready with the first frame of that connection actually pushed, which
    /// is the origin frame unless it was rejected. Rejected frames are
    /// dropped, never retried. Every successful push re-checks the start
    /// policy until playback is active for the epoch.
    pub fn submit(&mut self, slot: SlotId, frame: FrameSample, first: bool) -> SubmitOutcome {
        if first {
            if let Some(awaiting) = self.awaiting.get_mut(slot.index()) {
                *awaiting = true;
            }
        }

        let latency = frame.received_at.elapsed();
        if let Err(e) = self.handle.push_frame(slot, frame) {
            warn!(%slot, "Dropping frame: {}", e);
            metrics::counter!("frames_dropped", "reason" => "push_rejected").increment(1);
            return SubmitOutcome::Dropped;
        }
        metrics::counter!("frames_pushed", "slot" => slot.to_string()).increment(1);
        metrics::histogram!("frame_queue_latency_ms").record(latency.as_secs_f64() * 1000.0);

        let awaiting = self
            .awaiting
            .get_mut(slot.index())
            .map_or(false, std::mem::take);
        if awaiting && self.readiness.mark(slot) {
            debug!(%slot, epoch = self.epoch, ready = self.readiness.ready_count(), "Slot ready");
        }

        if !self.playing && self.policy.satisfied(&self.readiness) {
            self.activate();
        }
        SubmitOutcome::Pushed
    }

    /// Forget a slot's readiness after its source was reset
    pub fn release_slot(&mut self, slot: SlotId) {
        self.readiness.clear(slot);
        if let Some(awaiting) = self.awaiting.get_mut(slot.index()) {
            *awaiting = false;
        }
        self.handle.release_slot(slot);
        debug!(%slot, epoch = self.epoch, "Slot released");
    }

    /// Stop the pipeline and open a new epoch
    pub fn restart(&mut self) -> Result<(), StateChangeError> {
        self.handle.set_state(EngineState::Stopped)?;
        self.playing = false;
        self.clear_readiness();
        self.epoch += 1;
        metrics::counter!("compositor_restarts").increment(1);
        info!(epoch = self.epoch, "Compositor restarted");
        self.prepare()
    }

    pub fn shutdown(&mut self) {
        if let Err(e) = self.handle.set_state(EngineState::Stopped) {
            warn!("Failed to stop compositor: {}", e);
        }
        self.playing = false;
        self.clear_readiness();
    }

    fn clear_readiness(&mut self) {
        self.readiness.clear_all();
        self.awaiting.iter_mut().for_each(|a| *a = false);
    }

    fn activate(&mut self) {
        match self.handle.set_state(EngineState::Playing) {
            Ok(()) => {
                self.playing = true;
                self.activations += 1;
                info!(epoch = self.epoch, ready = self.readiness.ready_count(), "Compositor playing");
            }
            Err(e) => warn!(epoch = self.epoch, "Failed to start compositor: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::test_sample;
    use crate::pipeline::engine::MediaEngine;
    use crate::pipeline::testing::FakeEngine;
    use std::time::Duration;

    fn compositor(engine: &FakeEngine, slots: usize, policy: StartPolicy) -> Compositor {
        let layout = MosaicLayout::new(slots, 640, 480);
        let handle = engine.create_compositor(&layout).unwrap();
        let mut compositor = Compositor::new(handle, layout, policy);
        compositor.prepare().unwrap();
        compositor
    }

    fn playing_transitions(engine: &FakeEngine) -> usize {
        engine
            .compositor_states()
            .iter()
            .filter(|s| **s == EngineState::Playing)
            .count()
    }

    #[test]
    fn first_ready_activates_once_per_epoch() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 3, StartPolicy::FirstReady);

        comp.submit(SlotId(0), test_sample(0), true);
        assert!(comp.is_playing());
        comp.submit(SlotId(1), test_sample(0), true);
        comp.submit(SlotId(2), test_sample(0), true);
        comp.submit(SlotId(0), test_sample(40), false);

        assert_eq!(playing_transitions(&engine), 1);
        assert!(!engine.compositor_states().contains(&EngineState::Stopped));
        assert_eq!(comp.activations(), 1);
    }

    #[test]
    fn all_ready_waits_for_every_slot() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 2, StartPolicy::AllReady);

        comp.submit(SlotId(0), test_sample(0), true);
        comp.submit(SlotId(0), test_sample(40), false);
        assert!(!comp.is_playing());

        comp.submit(SlotId(1), test_sample(0), true);
        assert!(comp.is_playing());
        assert_eq!(playing_transitions(&engine), 1);

        // Slot 0 reconnects within the same epoch
        comp.release_slot(SlotId(0));
        comp.submit(SlotId(0), test_sample(0), true);
        assert_eq!(playing_transitions(&engine), 1);
    }

    #[test]
    fn origin_frame_is_pushed_before_activation() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 1, StartPolicy::FirstReady);
        comp.submit(SlotId(0), test_sample(0), true);

        let pushes = engine.pushes();
        assert_eq!(pushes, vec![(SlotId(0), Duration::ZERO)]);
        assert_eq!(
            engine.compositor_states(),
            vec![EngineState::Ready, EngineState::Playing]
        );
    }

    #[test]
    fn rejected_push_is_dropped_without_retry() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 2, StartPolicy::FirstReady);
        comp.submit(SlotId(0), test_sample(0), true);

        engine.set_busy(SlotId(1), true);
        assert_eq!(comp.submit(SlotId(1), test_sample(0), true), SubmitOutcome::Dropped);
        assert_eq!(engine.push_attempts(SlotId(1)), 1);

        engine.set_busy(SlotId(1), false);
        assert_eq!(comp.submit(SlotId(1), test_sample(40), false), SubmitOutcome::Pushed);
        assert_eq!(engine.push_attempts(SlotId(1)), 2);
        assert_eq!(
            engine.pushes().last(),
            Some(&(SlotId(1), Duration::from_millis(40)))
        );
    }

    #[test]
    fn restart_opens_a_new_epoch() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 2, StartPolicy::FirstReady);
        comp.submit(SlotId(0), test_sample(0), true);
        comp.submit(SlotId(1), test_sample(0), true);

        comp.restart().unwrap();
        assert_eq!(comp.epoch(), 1);
        assert!(!comp.is_playing());
        assert_eq!(comp.readiness().ready_count(), 0);

        comp.submit(SlotId(1), test_sample(0), true);
        comp.submit(SlotId(0), test_sample(0), true);
        assert_eq!(playing_transitions(&engine), 2);
        assert_eq!(comp.activations(), 2);
    }

    #[test]
    fn rejected_origin_frame_does_not_mark_slot_ready() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 2, StartPolicy::AllReady);
        comp.submit(SlotId(0), test_sample(0), true);

        engine.set_busy(SlotId(1), true);
        assert_eq!(comp.submit(SlotId(1), test_sample(0), true), SubmitOutcome::Dropped);
        assert!(!comp.readiness().is_ready(SlotId(1)));
        assert!(!comp.is_playing());
        assert_eq!(playing_transitions(&engine), 0);

        // The next frame of the same connection carries the readiness
        engine.set_busy(SlotId(1), false);
        comp.submit(SlotId(1), test_sample(40), false);
        assert!(comp.readiness().is_ready(SlotId(1)));
        assert!(comp.is_playing());
        assert_eq!(playing_transitions(&engine), 1);
    }

    #[test]
    fn flag_stays_clear_after_release_until_a_push_lands() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 1, StartPolicy::FirstReady);
        comp.submit(SlotId(0), test_sample(0), true);
        comp.submit(SlotId(0), test_sample(40), false);
        assert!(comp.readiness().is_ready(SlotId(0)));

        comp.release_slot(SlotId(0));
        assert!(!comp.readiness().is_ready(SlotId(0)));

        engine.set_busy(SlotId(0), true);
        comp.submit(SlotId(0), test_sample(0), true);
        assert!(!comp.readiness().is_ready(SlotId(0)));

        engine.set_busy(SlotId(0), false);
        comp.submit(SlotId(0), test_sample(40), false);
        assert!(comp.readiness().is_ready(SlotId(0)));
    }

    #[test]
    fn non_origin_frames_do_not_mark_released_slot() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 2, StartPolicy::FirstReady);
        comp.submit(SlotId(0), test_sample(0), true);
        comp.release_slot(SlotId(0));

        comp.submit(SlotId(0), test_sample(40), false);
        assert!(!comp.readiness().is_ready(SlotId(0)));
    }

    #[test]
    fn failed_activation_is_retried_on_next_push() {
        let engine = FakeEngine::new();
        let mut comp = compositor(&engine, 1, StartPolicy::FirstReady);

        engine.fail_compositor_state(EngineState::Playing);
        comp.submit(SlotId(0), test_sample(0), true);
        assert!(comp.readiness().is_ready(SlotId(0)));
        assert!(!comp.is_playing());

        engine.clear_compositor_failure();
        comp.submit(SlotId(0), test_sample(40), false);
        assert!(comp.is_playing());
        assert_eq!(comp.activations(), 1);
        assert_eq!(
            engine.compositor_states(),
            vec![EngineState::Ready, EngineState::Playing]
        );

        comp.submit(SlotId(0), test_sample(80), false);
        assert_eq!(comp.activations(), 1);
    }

    #[test]
    fn policy_parses_from_cli_names() {
        assert_eq!("all-ready".parse::<StartPolicy>(), Ok(StartPolicy::AllReady));
        assert_eq!("first-ready".parse::<StartPolicy>(), Ok(StartPolicy::FirstReady));
        assert!("eventually".parse::<StartPolicy>().is_err());
        assert_eq!(StartPolicy::AllReady.to_string(), "all-ready");
    }
}
