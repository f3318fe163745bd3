//! Camera Abstraction
//!
//! The capture controller owns the camera hardware exclusively through
//! these traits; nothing else touches the raw stream. Feeds must release
//! their hardware tracks in `stop()` on every exit path.

use thiserror::Error;

use crate::capture::frame::RgbaFrame;

/// Which camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Selfie camera
    Front,
    /// World-facing camera
    Rear,
}

impl FacingMode {
    pub fn opposite(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Rear,
            FacingMode::Rear => FacingMode::Front,
        }
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::Front => write!(f, "front"),
            FacingMode::Rear => write!(f, "rear"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no {0} camera available")]
    NotAvailable(FacingMode),
    #[error("camera stream failed: {0}")]
    StreamFailed(String),
    #[error("camera never became ready")]
    ReadyTimeout,
}

/// An open camera stream. Exactly one feed is live at a time; `stop()` is
/// mandatory on every exit path and must be idempotent.
pub trait CameraFeed: Send {
    /// (width, height); (0, 0) until the stream has negotiated dimensions
    fn dimensions(&self) -> (u32, u32);

    /// Readiness signal; implementations may flip this at different points
    /// of stream startup, which is why the controller also applies a
    /// bounded forced-ready fallback
    fn is_ready(&self) -> bool;

    /// Latest frame off the stream, if one is available
    fn frame(&mut self) -> Option<RgbaFrame>;

    fn facing(&self) -> FacingMode;

    /// Release all hardware tracks
    fn stop(&mut self);
}

/// A camera device that can open feeds
pub trait CameraSource: Send {
    fn open(
        &mut self,
        facing: FacingMode,
    ) -> impl std::future::Future<Output = Result<Box<dyn CameraFeed>, CameraError>> + Send;
}

/// Feed that cycles through a fixed list of frames. Used by the demo binary
/// (images loaded from disk) and by tests.
pub struct FrameSequenceFeed {
    frames: Vec<RgbaFrame>,
    cursor: usize,
    facing: FacingMode,
    /// Polls remaining before `is_ready` flips, to model slow stream startup
    ready_after: u32,
    stopped: bool,
}

impl FrameSequenceFeed {
    pub fn new(frames: Vec<RgbaFrame>, facing: FacingMode) -> Self {
        Self {
            frames,
            cursor: 0,
            facing,
            ready_after: 0,
            stopped: false,
        }
    }

    /// Delay readiness by a number of `is_ready` polls
    pub fn with_slow_start(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl CameraFeed for FrameSequenceFeed {
    fn dimensions(&self) -> (u32, u32) {
        self.frames
            .first()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0))
    }

    fn is_ready(&self) -> bool {
        self.ready_after == 0 && !self.stopped && !self.frames.is_empty()
    }

    fn frame(&mut self) -> Option<RgbaFrame> {
        if self.ready_after > 0 {
            self.ready_after -= 1;
            return None;
        }
        if self.stopped || self.frames.is_empty() {
            return None;
        }
        let frame = self.frames[self.cursor % self.frames.len()].clone();
        self.cursor += 1;
        Some(frame)
    }

    fn facing(&self) -> FacingMode {
        self.facing
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Source producing [`FrameSequenceFeed`]s; can be told to fail one facing
/// mode to exercise the rear-to-front retry path.
pub struct SyntheticCamera {
    frames: Vec<RgbaFrame>,
    pub fail_facing: Option<FacingMode>,
    pub slow_start_polls: u32,
}

impl SyntheticCamera {
    pub fn new(frames: Vec<RgbaFrame>) -> Self {
        Self {
            frames,
            fail_facing: None,
            slow_start_polls: 0,
        }
    }
}

impl CameraSource for SyntheticCamera {
    async fn open(&mut self, facing: FacingMode) -> Result<Box<dyn CameraFeed>, CameraError> {
        if self.fail_facing == Some(facing) {
            return Err(CameraError::NotAvailable(facing));
        }
        Ok(Box::new(
            FrameSequenceFeed::new(self.frames.clone(), facing)
                .with_slow_start(self.slow_start_polls),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_cycles_frames() {
        let frames = vec![RgbaFrame::solid(4, 4, 10), RgbaFrame::solid(4, 4, 20)];
        let mut feed = FrameSequenceFeed::new(frames, FacingMode::Front);
        assert!(feed.is_ready());
        let a = feed.frame().unwrap();
        let b = feed.frame().unwrap();
        let c = feed.frame().unwrap();
        assert!((a.mean_luma() - 10.0).abs() < 0.1);
        assert!((b.mean_luma() - 20.0).abs() < 0.1);
        assert!((c.mean_luma() - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_stopped_feed_yields_nothing() {
        let mut feed =
            FrameSequenceFeed::new(vec![RgbaFrame::solid(4, 4, 10)], FacingMode::Front);
        feed.stop();
        assert!(!feed.is_ready());
        assert!(feed.frame().is_none());
        feed.stop(); // idempotent
    }

    #[test]
    fn test_slow_start_delays_readiness() {
        let mut feed = FrameSequenceFeed::new(vec![RgbaFrame::solid(4, 4, 10)], FacingMode::Rear)
            .with_slow_start(2);
        assert!(!feed.is_ready());
        assert!(feed.frame().is_none());
        assert!(feed.frame().is_none());
        assert!(feed.is_ready());
        assert!(feed.frame().is_some());
    }

    #[tokio::test]
    async fn test_source_fails_configured_facing() {
        let mut cam = SyntheticCamera::new(vec![RgbaFrame::solid(4, 4, 10)]);
        cam.fail_facing = Some(FacingMode::Rear);
        assert!(cam.open(FacingMode::Rear).await.is_err());
        assert!(cam.open(FacingMode::Front).await.is_ok());
    }
}
