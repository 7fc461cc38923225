//! GStreamer ingest pipeline for one NVR channel
//!
//! dmsssrc ! dmssdemux ! h264parse ! <h264 decoder> ! videoconvert ! appsink

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::frame::{FrameMetadata, FrameSample, PixelFormat};
use crate::capture::source::{ErrorCallback, FrameCallback, SourceHandle, SourceParams};
use crate::error::{ConstructionError, ErrorOrigin, PipelineError, StateChangeError};
use crate::{EngineState, SlotId};

/// Ingest pipeline producing RGB frames for one channel
pub struct GstSource {
    slot: SlotId,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    stages: Arc<Vec<(gst::Element, ErrorOrigin)>>,
    sequence: Arc<AtomicU64>,
}

impl GstSource {
    pub fn new(
        slot: SlotId,
        params: &SourceParams,
        decoder: &str,
    ) -> Result<Self, ConstructionError> {
        info!(%slot, decoder, "Building source pipeline");

        let transport = make_element("dmsssrc", &format!("dmsssrc{}", slot))?;
        transport.set_property_from_str("host", &params.host);
        transport.set_property_from_str("port", &params.port.to_string());
        transport.set_property_from_str("user", &params.username);
        transport.set_property_from_str("password", &params.password);
        transport.set_property_from_str("channel", &params.channel.to_string());
        transport.set_property_from_str("subchannel", &params.subchannel.to_string());
        transport.set_property_from_str("timeout", &params.timeout.as_secs().to_string());

        let demux = make_element("dmssdemux", &format!("dmssdemux{}", slot))?;
        let parse = make_element("h264parse", &format!("h264parse{}", slot))?;
        let decode = make_element(decoder, &format!("h264dec{}", slot))?;
        let convert = make_element("videoconvert", &format!("videoconvert{}", slot))?;

        // Output is always RGB after conversion
        let caps = gst_video::VideoCapsBuilder::new()
            .format(gst_video::VideoFormat::Rgb)
            .build();
        let appsink = gst_app::AppSink::builder()
            .name(format!("video_appsink{}", slot))
            .caps(&caps)
            .max_buffers(3)
            .drop(true)
            .sync(false)
            .build();

        let pipeline = gst::Pipeline::with_name(&format!("source{}", slot));
        let sink: &gst::Element = appsink.upcast_ref();
        pipeline
            .add_many([&transport, &demux, &parse, &decode, &convert, sink])
            .map_err(|e| ConstructionError::Link(e.to_string()))?;
        gst::Element::link_many([&transport, &demux, &parse, &decode, &convert, sink])
            .map_err(|e| ConstructionError::Link(e.to_string()))?;

        let stages = vec![
            (transport, ErrorOrigin::Transport),
            (demux, ErrorOrigin::Demux),
            (parse, ErrorOrigin::Parse),
            (decode, ErrorOrigin::Decode),
            (convert, ErrorOrigin::Convert),
            (appsink.clone().upcast::<gst::Element>(), ErrorOrigin::Sink),
        ];

        Ok(Self {
            slot,
            pipeline,
            appsink,
            stages: Arc::new(stages),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl SourceHandle for GstSource {
    fn on_frame(&mut self, callback: FrameCallback) {
        let slot = self.slot;
        let sequence = Arc::clone(&self.sequence);
        self.appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    match frame_from_sample(&sample, &sequence) {
                        Some(frame) => callback(frame),
                        None => debug!(%slot, "Skipping sample without timestamp or caps"),
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    fn on_error(&mut self, callback: ErrorCallback) {
        let Some(bus) = self.pipeline.bus() else {
            warn!(slot = %self.slot, "Source pipeline has no bus, errors will not be reported");
            return;
        };
        let stages = Arc::clone(&self.stages);
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                let origin = err
                    .src()
                    .map(|src| origin_of(src, &stages))
                    .unwrap_or(ErrorOrigin::Unknown);
                let mut error = PipelineError::new(origin, err.error().to_string());
                if let Some(debug) = err.debug() {
                    error = error.with_debug(debug.as_str());
                }
                callback(error);
            }
            gst::BusSyncReply::Drop
        });
    }

    fn set_state(&mut self, state: EngineState) -> Result<(), StateChangeError> {
        set_pipeline_state(&self.pipeline, state)
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

pub(crate) fn make_element(factory: &str, name: &str) -> Result<gst::Element, ConstructionError> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| ConstructionError::ElementCreation {
            factory: factory.to_string(),
            reason: e.to_string(),
        })
}

pub(crate) fn set_pipeline_state(
    pipeline: &gst::Pipeline,
    state: EngineState,
) -> Result<(), StateChangeError> {
    let target = match state {
        EngineState::Ready => gst::State::Ready,
        EngineState::Playing => gst::State::Playing,
        EngineState::Stopped => gst::State::Null,
    };
    pipeline
        .set_state(target)
        .map(|_| ())
        .map_err(|e| StateChangeError {
            target: pipeline.name().to_string(),
            state: format!("{:?}", target),
            reason: e.to_string(),
        })
}

/// Attribute an error to the stage it came from, including stage internals
fn origin_of(src: &gst::Object, stages: &[(gst::Element, ErrorOrigin)]) -> ErrorOrigin {
    stages
        .iter()
        .find(|(element, _)| {
            let element: &gst::Object = element.upcast_ref();
            src == element || src.has_as_ancestor(element)
        })
        .map(|(_, origin)| *origin)
        .unwrap_or(ErrorOrigin::Unknown)
}

fn frame_from_sample(sample: &gst::Sample, sequence: &AtomicU64) -> Option<FrameSample> {
    let buffer = sample.buffer()?;
    let pts: Duration = buffer.pts()?.into();
    let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    let format = match info.format() {
        gst_video::VideoFormat::Rgb => PixelFormat::Rgb24,
        gst_video::VideoFormat::Bgr => PixelFormat::Bgr24,
        gst_video::VideoFormat::I420 => PixelFormat::I420,
        gst_video::VideoFormat::Nv12 => PixelFormat::Nv12,
        _ => return None,
    };
    let map = buffer.map_readable().ok()?;
    // Copy out so the sample is released before the callback returns
    let data = Bytes::copy_from_slice(map.as_slice());

    let meta = Arc::new(FrameMetadata {
        sequence: sequence.fetch_add(1, Ordering::Relaxed) + 1,
        width: info.width(),
        height: info.height(),
        stride: info.stride()[0] as u32,
        format,
    });
    Some(FrameSample::new(data, meta, pts))
}
