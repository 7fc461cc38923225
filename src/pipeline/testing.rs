//! In-memory media engine recording every call, for unit tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::capture::frame::FrameSample;
use crate::capture::source::{ErrorCallback, FrameCallback, SourceHandle, SourceParams};
use crate::display::compositor::CompositorHandle;
use crate::display::layout::MosaicLayout;
use crate::error::{ConstructionError, PipelineError, PushError, StateChangeError};
use crate::pipeline::engine::MediaEngine;
use crate::{EngineState, SlotId};

type SharedFrameCallback = Arc<dyn Fn(FrameSample) + Send + Sync>;
type SharedErrorCallback = Arc<dyn Fn(PipelineError) + Send + Sync>;

#[derive(Default)]
struct Shared {
    source_states: HashMap<SlotId, Vec<EngineState>>,
    compositor_states: Vec<EngineState>,
    frame_callbacks: HashMap<SlotId, SharedFrameCallback>,
    error_callbacks: HashMap<SlotId, SharedErrorCallback>,
    compositor_error: Option<SharedErrorCallback>,
    pushes: Vec<(SlotId, Duration)>,
    push_attempts: HashMap<SlotId, usize>,
    released: Vec<SlotId>,
    busy: HashSet<SlotId>,
    failing_creation: HashSet<SlotId>,
    failing_states: HashMap<SlotId, EngineState>,
    failing_compositor_state: Option<EngineState>,
    slot_count: usize,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    shared: Arc<Mutex<Shared>>,
}

struct FakeSource {
    slot: SlotId,
    shared: Arc<Mutex<Shared>>,
}

struct FakeCompositor {
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_source_creation(&self, slot: SlotId) {
        lock(&self.shared).failing_creation.insert(slot);
    }

    pub fn fail_source_state(&self, slot: SlotId, state: EngineState) {
        lock(&self.shared).failing_states.insert(slot, state);
    }

    pub fn clear_source_failure(&self, slot: SlotId) {
        lock(&self.shared).failing_states.remove(&slot);
    }

    pub fn fail_compositor_state(&self, state: EngineState) {
        lock(&self.shared).failing_compositor_state = Some(state);
    }

    pub fn clear_compositor_failure(&self) {
        lock(&self.shared).failing_compositor_state = None;
    }

    pub fn set_busy(&self, slot: SlotId, busy: bool) {
        let mut shared = lock(&self.shared);
        if busy {
            shared.busy.insert(slot);
        } else {
            shared.busy.remove(&slot);
        }
    }

    /// Deliver a frame from the source's engine thread
    pub fn emit_frame(&self, slot: SlotId, sample: FrameSample) {
        let callback = lock(&self.shared).frame_callbacks.get(&slot).cloned();
        if let Some(callback) = callback {
            callback(sample);
        }
    }

    pub fn emit_error(&self, slot: SlotId, error: PipelineError) {
        let callback = lock(&self.shared).error_callbacks.get(&slot).cloned();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    pub fn emit_compositor_error(&self, error: PipelineError) {
        let callback = lock(&self.shared).compositor_error.clone();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    pub fn source_states(&self, slot: SlotId) -> Vec<EngineState> {
        lock(&self.shared)
            .source_states
            .get(&slot)
            .cloned()
            .unwrap_or_default()
    }

    pub fn compositor_states(&self) -> Vec<EngineState> {
        lock(&self.shared).compositor_states.clone()
    }

    /// Accepted pushes as (slot, pts)
    pub fn pushes(&self) -> Vec<(SlotId, Duration)> {
        lock(&self.shared).pushes.clone()
    }

    pub fn pushes_for(&self, slot: SlotId) -> Vec<Duration> {
        lock(&self.shared)
            .pushes
            .iter()
            .filter(|(s, _)| *s == slot)
            .map(|(_, pts)| *pts)
            .collect()
    }

    pub fn push_attempts(&self, slot: SlotId) -> usize {
        lock(&self.shared)
            .push_attempts
            .get(&slot)
            .copied()
            .unwrap_or(0)
    }

    pub fn released_slots(&self) -> Vec<SlotId> {
        lock(&self.shared).released.clone()
    }
}

impl MediaEngine for FakeEngine {
    fn create_source(
        &self,
        slot: SlotId,
        _params: &SourceParams,
    ) -> Result<Box<dyn SourceHandle>, ConstructionError> {
        if lock(&self.shared).failing_creation.contains(&slot) {
            return Err(ConstructionError::ElementCreation {
                factory: "vaapih264dec".into(),
                reason: "no such element factory".into(),
            });
        }
        Ok(Box::new(FakeSource {
            slot,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn create_compositor(
        &self,
        layout: &MosaicLayout,
    ) -> Result<Box<dyn CompositorHandle>, ConstructionError> {
        lock(&self.shared).slot_count = layout.slot_count();
        Ok(Box::new(FakeCompositor {
            shared: Arc::clone(&self.shared),
        }))
    }
}

impl SourceHandle for FakeSource {
    fn on_frame(&mut self, callback: FrameCallback) {
        lock(&self.shared)
            .frame_callbacks
            .insert(self.slot, Arc::from(callback));
    }

    fn on_error(&mut self, callback: ErrorCallback) {
        lock(&self.shared)
            .error_callbacks
            .insert(self.slot, Arc::from(callback));
    }

    fn set_state(&mut self, state: EngineState) -> Result<(), StateChangeError> {
        let mut shared = lock(&self.shared);
        if shared.failing_states.get(&self.slot) == Some(&state) {
            return Err(StateChangeError {
                target: format!("source{}", self.slot),
                state: format!("{:?}", state),
                reason: "refused by test".into(),
            });
        }
        shared.source_states.entry(self.slot).or_default().push(state);
        Ok(())
    }
}

impl CompositorHandle for FakeCompositor {
    fn push_frame(&mut self, slot: SlotId, frame: FrameSample) -> Result<(), PushError> {
        let mut shared = lock(&self.shared);
        if slot.index() >= shared.slot_count {
            return Err(PushError::UnknownSlot(slot));
        }
        *shared.push_attempts.entry(slot).or_default() += 1;
        if shared.busy.contains(&slot) {
            return Err(PushError::Busy(slot));
        }
        shared.pushes.push((slot, frame.pts()));
        Ok(())
    }

    fn set_state(&mut self, state: EngineState) -> Result<(), StateChangeError> {
        let mut shared = lock(&self.shared);
        if shared.failing_compositor_state == Some(state) {
            return Err(StateChangeError {
                target: "compositor".into(),
                state: format!("{:?}", state),
                reason: "refused by test".into(),
            });
        }
        shared.compositor_states.push(state);
        Ok(())
    }

    fn release_slot(&mut self, slot: SlotId) {
        lock(&self.shared).released.push(slot);
    }

    fn on_error(&mut self, callback: ErrorCallback) {
        lock(&self.shared).compositor_error = Some(Arc::from(callback));
    }
}
