//! GStreamer-backed media engine

use std::time::Duration;

use gstreamer as gst;
use tracing::info;

use crate::capture::gst_source::GstSource;
use crate::capture::source::{SourceHandle, SourceParams};
use crate::display::compositor::CompositorHandle;
use crate::display::gst_compositor::GstCompositor;
use crate::display::layout::MosaicLayout;
use crate::error::ConstructionError;
use crate::pipeline::engine::MediaEngine;
use crate::{utils, Config, SlotId};

pub struct GstEngine {
    decoder: String,
    video_sink: String,
    latency: Duration,
}

impl GstEngine {
    /// Initialise GStreamer and pick decoder and sink elements
    pub fn new(config: &Config) -> Result<Self, ConstructionError> {
        gst::init().map_err(|e| ConstructionError::Init(e.to_string()))?;
        info!("This program is linked against {}", gst::version_string());

        let decoder = match &config.gstreamer.h264_decoder {
            Some(decoder) => decoder.clone(),
            None => utils::detect_h264_decoder(config.gstreamer.use_hardware_acceleration).to_string(),
        };
        info!("Using H.264 decoder: {}", decoder);

        let sink = match &config.gstreamer.video_sink {
            Some(sink) => sink.as_str(),
            None => utils::detect_video_sink(),
        };
        let video_sink = utils::build_video_sink(sink, config.display.fps_overlay);

        Ok(Self {
            decoder,
            video_sink,
            latency: Duration::from_millis(config.pipeline.latency_ms),
        })
    }
}

impl MediaEngine for GstEngine {
    fn create_source(
        &self,
        slot: SlotId,
        params: &SourceParams,
    ) -> Result<Box<dyn SourceHandle>, ConstructionError> {
        Ok(Box::new(GstSource::new(slot, params, &self.decoder)?))
    }

    fn create_compositor(
        &self,
        layout: &MosaicLayout,
    ) -> Result<Box<dyn CompositorHandle>, ConstructionError> {
        Ok(Box::new(GstCompositor::new(layout, &self.video_sink, self.latency)?))
    }
}
