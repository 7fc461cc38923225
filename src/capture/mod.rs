pub mod frame;
pub mod rebase;
pub mod source;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_source;

pub use frame::{FrameMetadata, FrameSample, PixelFormat};
pub use rebase::{Rebased, TimestampRebaser};
pub use source::{Accepted, Delivery, Fault, Source, SourceHandle, SourceParams, SourceState};
