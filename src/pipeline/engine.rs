use crate::capture::source::{SourceHandle, SourceParams};
use crate::display::compositor::CompositorHandle;
use crate::display::layout::MosaicLayout;
use crate::error::ConstructionError;
use crate::SlotId;

/// Factory for the pipelines the orchestrator drives
///
/// Implementations do decoding, transport and compositing on their own
/// threads and report back only through the handle callbacks.
pub trait MediaEngine {
    fn create_source(
        &self,
        slot: SlotId,
        params: &SourceParams,
    ) -> Result<Box<dyn SourceHandle>, ConstructionError>;

    /// One slot per tile of `layout`
    fn create_compositor(
        &self,
        layout: &MosaicLayout,
    ) -> Result<Box<dyn CompositorHandle>, ConstructionError>;
}
