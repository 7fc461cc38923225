//! GStreamer element auto-detection

#[cfg(feature = "gstreamer-pipeline")]
use gstreamer as gst;
#[cfg(feature = "gstreamer-pipeline")]
use tracing::{debug, info, warn};

/// H.264 decoders in order of preference (hardware first)
pub const H264_DECODERS: &[&str] = &[
    "vaapih264dec", // Intel/AMD VAAPI hardware decoder
    "nvh264dec",    // NVIDIA hardware decoder
    "v4l2h264dec",  // V4L2 stateful hardware decoder
    "avdec_h264",   // libav software decoder
    "openh264dec",  // Cisco software decoder (fallback)
];

/// Video sinks in order of preference
pub const VIDEO_SINKS: &[&str] = &[
    "glimagesink",   // OpenGL (hardware accelerated)
    "waylandsink",   // Wayland native (if available)
    "xvimagesink",   // X11 with XVideo extension
    "ximagesink",    // X11 basic
    "autovideosink", // Auto-detect
];

/// Decoders that run on the CPU
#[cfg(any(test, feature = "gstreamer-pipeline"))]
fn is_software_decoder(name: &str) -> bool {
    matches!(name, "avdec_h264" | "openh264dec")
}

/// Detect best available H.264 decoder
#[cfg(feature = "gstreamer-pipeline")]
pub fn detect_h264_decoder(use_hardware: bool) -> &'static str {
    for &decoder in H264_DECODERS {
        if !use_hardware && !is_software_decoder(decoder) {
            continue;
        }
        if let Some(factory) = gst::ElementFactory::find(decoder) {
            debug!("Found decoder: {} - {}", decoder, factory.metadata("long-name").unwrap_or(""));
            return decoder;
        }
    }

    warn!("No H.264 decoder found, falling back to avdec_h264");
    "avdec_h264"
}

/// Detect best available video sink
#[cfg(feature = "gstreamer-pipeline")]
pub fn detect_video_sink() -> &'static str {
    for &sink in VIDEO_SINKS {
        if let Some(factory) = gst::ElementFactory::find(sink) {
            info!("Found video sink: {} - {}", sink, factory.metadata("long-name").unwrap_or(""));
            return sink;
        }
    }

    warn!("Using auto video sink");
    "autovideosink"
}

/// Launch-line fragment for the display sink, optionally wrapped in an FPS overlay
pub fn build_video_sink(sink_name: &str, fps_overlay: bool) -> String {
    let base_sink = match sink_name {
        "glimagesink" | "xvimagesink" | "ximagesink" => {
            format!("{} name=videosink force-aspect-ratio=false", sink_name)
        }
        "waylandsink" => "waylandsink name=videosink fullscreen=false".to_string(),
        other => format!("{} name=videosink", other),
    };

    if fps_overlay {
        format!(
            "fpsdisplaysink video-sink=\"{}\" text-overlay=true sync=false",
            base_sink
        )
    } else {
        base_sink.replace("name=videosink", "name=videosink sync=false")
    }
}
