pub mod compositor;
pub mod layout;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_compositor;

pub use compositor::{Compositor, CompositorHandle, StartPolicy, SubmitOutcome};
pub use layout::{MosaicLayout, Tile};
