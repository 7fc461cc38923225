pub mod engine;
pub mod orchestrator;
pub mod queue;
pub mod readiness;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_engine;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::MediaEngine;
pub use orchestrator::{ControlEvent, Orchestrator};
pub use queue::{frame_queue, FrameQueue, FrameQueueReceiver, QueueStats};
pub use readiness::ReadinessTracker;
