//! Per-source timestamp rebasing onto the canvas timeline

use std::time::Duration;

use crate::capture::frame::FrameSample;

/// Outcome of rebasing one raw timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rebased {
    pub pts: Duration,
    /// This timestamp became the origin
    pub first: bool,
    /// Raw timestamp was earlier than the origin and was clamped to zero
    pub clamped: bool,
}

/// Zeroes a source's timeline at the first frame of each connection
#[derive(Debug, Default)]
pub struct TimestampRebaser {
    origin: Option<Duration>,
}

impl TimestampRebaser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> Option<Duration> {
        self.origin
    }

    /// Forget the origin; the next timestamp becomes the new one
    pub fn clear(&mut self) {
        self.origin = None;
    }

    pub fn rebase(&mut self, raw: Duration) -> Rebased {
        match self.origin {
            None => {
                self.origin = Some(raw);
                Rebased {
                    pts: Duration::ZERO,
                    first: true,
                    clamped: false,
                }
            }
            Some(origin) => match raw.checked_sub(origin) {
                Some(pts) => Rebased {
                    pts,
                    first: false,
                    clamped: false,
                },
                None => Rebased {
                    pts: Duration::ZERO,
                    first: false,
                    clamped: true,
                },
            },
        }
    }

    /// Rebase a sample, returning a retimed copy
    pub fn rebase_sample(&mut self, sample: &FrameSample) -> (FrameSample, Rebased) {
        let rebased = self.rebase(sample.pts());
        (sample.with_pts(rebased.pts), rebased)
    }
}
