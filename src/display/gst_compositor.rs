//! GStreamer compositing pipeline
//!
//! One live appsrc per slot feeds a `compositor` element whose sink pads are
//! placed on the canvas according to the [`MosaicLayout`].

use std::sync::Arc;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info, warn};

use crate::capture::frame::{FrameMetadata, FrameSample};
use crate::capture::source::ErrorCallback;
use crate::display::compositor::CompositorHandle;
use crate::display::layout::MosaicLayout;
use crate::error::{ConstructionError, ErrorOrigin, PipelineError, PushError, StateChangeError};
use crate::{EngineState, SlotId};

struct SlotFeed {
    appsrc: gst_app::AppSrc,
    meta: Option<Arc<FrameMetadata>>,
    /// Canvas running time at which this slot's timeline starts
    base: Option<gst::ClockTime>,
}

pub struct GstCompositor {
    pipeline: gst::Pipeline,
    slots: Vec<SlotFeed>,
}

impl GstCompositor {
    pub fn new(
        layout: &MosaicLayout,
        video_sink: &str,
        latency: Duration,
    ) -> Result<Self, ConstructionError> {
        let pipeline_str = Self::build_pipeline_string(layout, video_sink);
        info!("Compositor pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| match e.kind::<gst::ParseError>() {
                Some(gst::ParseError::NoSuchElement) => ConstructionError::ElementCreation {
                    factory: "compositor".to_string(),
                    reason: e.to_string(),
                },
                _ => ConstructionError::Link(e.to_string()),
            })?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ConstructionError::Link("launch line did not produce a pipeline".into()))?;

        let mosaic = pipeline
            .by_name("mosaic")
            .ok_or_else(|| ConstructionError::Link("compositor element missing".into()))?;

        let mut slots = Vec::with_capacity(layout.slot_count());
        for tile in layout.tiles() {
            let pad = mosaic
                .static_pad(&format!("sink_{}", tile.slot))
                .ok_or_else(|| ConstructionError::Link(format!("no compositor pad for slot {}", tile.slot)))?;
            pad.set_property("xpos", tile.x as i32);
            pad.set_property("ypos", tile.y as i32);
            pad.set_property("width", tile.width as i32);
            pad.set_property("height", tile.height as i32);

            let appsrc = pipeline
                .by_name(&format!("slot{}", tile.slot))
                .ok_or_else(|| ConstructionError::Link(format!("no appsrc for slot {}", tile.slot)))?
                .downcast::<gst_app::AppSrc>()
                .map_err(|_| ConstructionError::Link("slot element is not an appsrc".into()))?;
            appsrc.set_is_live(true);
            appsrc.set_format(gst::Format::Time);
            appsrc.set_stream_type(gst_app::AppStreamType::Stream);
            appsrc.set_property("block", false);

            slots.push(SlotFeed {
                appsrc,
                meta: None,
                base: None,
            });
        }

        pipeline.set_latency(gst::ClockTime::from_nseconds(latency.as_nanos() as u64));

        Ok(Self { pipeline, slots })
    }

    fn build_pipeline_string(layout: &MosaicLayout, video_sink: &str) -> String {
        let mut pipeline = format!(
            "compositor name=mosaic background=black ! \
             video/x-raw,width={},height={} ! \
             videoconvert ! \
             {}",
            layout.width, layout.height, video_sink
        );
        for tile in layout.tiles() {
            pipeline.push_str(&format!(
                " appsrc name=slot{slot} ! \
                 queue max-size-buffers=2 leaky=downstream ! \
                 videoconvert ! \
                 videoscale ! \
                 mosaic.sink_{slot}",
                slot = tile.slot
            ));
        }
        pipeline
    }

    fn running_time(&self) -> gst::ClockTime {
        self.pipeline
            .current_running_time()
            .unwrap_or(gst::ClockTime::ZERO)
    }
}

impl CompositorHandle for GstCompositor {
    fn push_frame(&mut self, slot: SlotId, frame: FrameSample) -> Result<(), PushError> {
        let running_time = self.running_time();
        let feed = self
            .slots
            .get_mut(slot.index())
            .ok_or(PushError::UnknownSlot(slot))?;

        let renegotiate = feed
            .meta
            .as_ref()
            .map_or(true, |meta| !frame.same_format(meta));
        if renegotiate {
            let caps = gst::Caps::builder("video/x-raw")
                .field("format", frame.meta.format.as_caps_format())
                .field("width", frame.meta.width as i32)
                .field("height", frame.meta.height as i32)
                .field("framerate", gst::Fraction::new(0, 1))
                .build();
            debug!(%slot, %caps, "Slot caps");
            feed.appsrc.set_caps(Some(&caps));
            feed.meta = Some(Arc::clone(&frame.meta));
        }

        // A tile joining a running canvas starts at its current running time
        let base = *feed.base.get_or_insert(running_time);
        let pts = base + gst::ClockTime::from_nseconds(frame.pts().as_nanos() as u64);

        let mut buffer = gst::Buffer::from_slice(frame.data.clone());
        buffer.make_mut().set_pts(pts);

        match feed.appsrc.push_buffer(buffer) {
            Ok(_) => Ok(()),
            Err(gst::FlowError::Flushing) => Err(PushError::Busy(slot)),
            Err(e) => Err(PushError::Flow {
                slot,
                reason: format!("{:?}", e),
            }),
        }
    }

    fn set_state(&mut self, state: EngineState) -> Result<(), StateChangeError> {
        // Slots accept data in Ready, so Ready maps to Paused
        let target = match state {
            EngineState::Ready => gst::State::Paused,
            EngineState::Playing => gst::State::Playing,
            EngineState::Stopped => gst::State::Null,
        };
        if state == EngineState::Stopped {
            for feed in &mut self.slots {
                feed.base = None;
            }
        }
        self.pipeline
            .set_state(target)
            .map(|_| ())
            .map_err(|e| StateChangeError {
                target: "compositor".to_string(),
                state: format!("{:?}", target),
                reason: e.to_string(),
            })
    }

    fn release_slot(&mut self, slot: SlotId) {
        if let Some(feed) = self.slots.get_mut(slot.index()) {
            feed.base = None;
        }
    }

    fn on_error(&mut self, callback: ErrorCallback) {
        let Some(bus) = self.pipeline.bus() else {
            warn!("Compositor pipeline has no bus, errors will not be reported");
            return;
        };
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                let mut error = PipelineError::new(ErrorOrigin::Compositor, err.error().to_string());
                if let Some(debug) = err.debug() {
                    error = error.with_debug(debug.as_str());
                }
                callback(error);
            }
            gst::BusSyncReply::Drop
        });
    }
}

impl Drop for GstCompositor {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
