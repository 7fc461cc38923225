use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded video frame with zero-copy semantics
///
/// Samples are never mutated once built. Rebasing produces a new sample that
/// shares the payload and metadata of the original.
#[derive(Debug, Clone)]
pub struct FrameSample {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Arrival time in the process, for queue latency tracking
    pub received_at: Instant,

    pts: Duration,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    I420,
    Nv12,
}

impl FrameSample {
    pub fn new(data: Bytes, meta: Arc<FrameMetadata>, pts: Duration) -> Self {
        Self {
            data,
            meta,
            received_at: Instant::now(),
            pts,
        }
    }

    /// Presentation timestamp
    pub fn pts(&self) -> Duration {
        self.pts
    }

    /// Copy of this sample carrying a different presentation timestamp
    pub fn with_pts(&self, pts: Duration) -> Self {
        Self {
            data: self.data.clone(),
            meta: Arc::clone(&self.meta),
            received_at: self.received_at,
            pts,
        }
    }

    /// Whether `other` can be fed to the same slot without renegotiating caps
    pub fn same_format(&self, other: &FrameMetadata) -> bool {
        self.meta.width == other.width
            && self.meta.height == other.height
            && self.meta.format == other.format
    }
}

impl PixelFormat {
    /// GStreamer raw video format name
    pub fn as_caps_format(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "RGB",
            PixelFormat::Bgr24 => "BGR",
            PixelFormat::I420 => "I420",
            PixelFormat::Nv12 => "NV12",
        }
    }
}

#[cfg(test)]
pub(crate) fn test_sample(pts_ms: u64) -> FrameSample {
    let meta = Arc::new(FrameMetadata {
        sequence: pts_ms,
        width: 4,
        height: 2,
        stride: 12,
        format: PixelFormat::Rgb24,
    });
    FrameSample::new(Bytes::from_static(&[0u8; 24]), meta, Duration::from_millis(pts_ms))
}
