use std::time::Duration;
use tokio::time::Instant;

/// Length of one frame at `fps`, truncated to whole nanoseconds
/// (33_333_333 ns at 30 fps).
pub fn frame_duration(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)))
}

/// Absolute deadline of frame `index`: `start + index * frame_duration`.
///
/// Always derived from the anchor, so lateness of earlier frames never
/// shifts later deadlines.
pub fn frame_target_instant(start: Instant, frame_duration: Duration, index: u64) -> Instant {
    let nanos = (frame_duration.as_nanos() as u64).saturating_mul(index);
    start + Duration::from_nanos(nanos)
}

/// Playback clock anchored at the instant external playback began.
#[derive(Debug, Clone, Copy)]
pub struct Timeline {
    start: Instant,
    frame_duration: Duration,
    index: u64,
}

impl Timeline {
    pub fn new(start: Instant, frame_duration: Duration, index: u64) -> Self {
        Self {
            start,
            frame_duration,
            index,
        }
    }

    #[inline]
    pub fn start(&self) -> Instant {
        self.start
    }

    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Deadline of the current frame.
    #[inline]
    pub fn target(&self) -> Instant {
        frame_target_instant(self.start, self.frame_duration, self.index)
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}
