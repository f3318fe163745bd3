//! Capture Controller
//!
//! Owns the live camera feed, runs the face/quality/liveness estimators on
//! their own cadences, and exposes manual and auto photo capture. All exit
//! paths funnel through one teardown routine so hardware tracks are always
//! released.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::camera::{CameraError, CameraFeed, CameraSource, FacingMode};
use crate::capture::face::{FaceBox, FaceDetector};
use crate::capture::frame::RgbaFrame;
use crate::capture::liveness::{LivenessEstimator, NEUTRAL_SCORE};
use crate::capture::quality;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture requested while camera is not ready")]
    NotReady,
    #[error("capture already in progress")]
    InFlight,
    #[error("no frame available from the camera feed")]
    NoFrame,
    #[error("frame has zero dimensions")]
    ZeroDimensions,
    #[error("image encoding failed: {0}")]
    Encode(String),
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Starting,
    Ready,
    Capturing,
}

/// Tunable capture policy. The numeric thresholds are provisional policy
/// constants, expected to be tuned against a calibrated model.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub auto_capture: bool,
    /// Quality gate for auto capture
    pub quality_threshold: f32,
    /// Delay between the gate being met and the auto trigger
    pub settle_delay: Duration,
    /// Cadence of the four-pass quality scan (expensive)
    pub quality_interval: Duration,
    /// Cadence of liveness sampling
    pub liveness_interval: Duration,
    /// Cadence of face detection
    pub face_interval: Duration,
    /// Bound on waiting for stream readiness before forcing or failing
    pub ready_timeout: Duration,
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            auto_capture: false,
            quality_threshold: 0.7,
            settle_delay: Duration::from_millis(1000),
            quality_interval: Duration::from_millis(1000),
            liveness_interval: Duration::from_millis(200),
            face_interval: Duration::from_millis(500),
            ready_timeout: Duration::from_millis(3000),
            jpeg_quality: 90,
        }
    }
}

/// Latest estimator outputs gating capture readiness
#[derive(Debug, Clone, Default)]
pub struct CaptureSignals {
    pub face_detected: bool,
    pub face_boxes: Vec<FaceBox>,
    pub quality: f32,
    pub liveness: f32,
}

/// The artifact of one photo capture. Immutable; a retake produces a new
/// one rather than mutating this.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// JPEG-encoded still
    pub image_jpeg: Vec<u8>,
    pub face_detected: bool,
    pub quality_score: f32,
    pub liveness_score: f32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub device: String,
    /// `{width}x{height}`
    pub resolution: String,
}

pub struct CaptureController<S: CameraSource> {
    source: S,
    feed: Option<Box<dyn CameraFeed>>,
    detector: Box<dyn FaceDetector>,
    liveness: LivenessEstimator,
    cfg: CaptureConfig,
    state: ControllerState,
    signals: CaptureSignals,

    last_quality_at: Option<Instant>,
    last_liveness_at: Option<Instant>,
    last_face_at: Option<Instant>,

    /// When the auto-capture gate was first continuously met
    gate_met_at: Option<Instant>,
    /// One auto trigger per readiness window
    auto_fired: bool,
    capture_in_flight: bool,
}

impl<S: CameraSource> CaptureController<S> {
    pub fn new(source: S, detector: Box<dyn FaceDetector>, cfg: CaptureConfig) -> Self {
        Self {
            source,
            feed: None,
            detector,
            liveness: LivenessEstimator::new(),
            cfg,
            state: ControllerState::Idle,
            signals: CaptureSignals {
                liveness: NEUTRAL_SCORE,
                ..CaptureSignals::default()
            },
            last_quality_at: None,
            last_liveness_at: None,
            last_face_at: None,
            gate_met_at: None,
            auto_fired: false,
            capture_in_flight: false,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn signals(&self) -> &CaptureSignals {
        &self.signals
    }

    pub fn facing(&self) -> Option<FacingMode> {
        self.feed.as_ref().map(|f| f.facing())
    }

    /// Open the camera. A failed rear-facing request is retried once with
    /// the front camera before the error surfaces. Emits ready on the first
    /// readiness signal, or forces readiness after a bounded timeout when
    /// dimensions are already negotiated.
    pub async fn start(&mut self, facing: FacingMode) -> Result<(), CameraError> {
        // Previous stream must be fully released before acquiring a new one
        self.teardown();
        self.state = ControllerState::Starting;
        info!("starting camera, facing={}", facing);

        let feed = match self.source.open(facing).await {
            Ok(feed) => feed,
            Err(err) if facing == FacingMode::Rear => {
                warn!("rear camera failed ({}), retrying front once", err);
                match self.source.open(FacingMode::Front).await {
                    Ok(feed) => feed,
                    Err(front_err) => {
                        self.state = ControllerState::Idle;
                        return Err(front_err);
                    }
                }
            }
            Err(err) => {
                self.state = ControllerState::Idle;
                return Err(err);
            }
        };
        self.feed = Some(feed);

        let deadline = tokio::time::Instant::now() + self.cfg.ready_timeout;
        loop {
            let Some(feed) = self.feed.as_ref() else {
                self.state = ControllerState::Idle;
                return Err(CameraError::StreamFailed("feed lost during startup".to_string()));
            };
            if feed.is_ready() {
                info!("camera ready ({})", feed.facing());
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                let (w, h) = feed.dimensions();
                if w > 0 && h > 0 {
                    // Flaky readiness events; dimensions prove the stream
                    // is alive, so force ready rather than hang
                    warn!("camera ready timeout, forcing ready at {}x{}", w, h);
                    break;
                }
                self.teardown();
                return Err(CameraError::ReadyTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.state = ControllerState::Ready;
        self.reset_gate();
        self.liveness.reset();
        self.signals = CaptureSignals {
            liveness: NEUTRAL_SCORE,
            ..CaptureSignals::default()
        };
        Ok(())
    }

    /// Restart with the opposite facing mode
    pub async fn switch_camera(&mut self) -> Result<(), CameraError> {
        let next = self
            .facing()
            .map(FacingMode::opposite)
            .unwrap_or(FacingMode::Front);
        info!("switching camera to {}", next);
        self.start(next).await
    }

    /// One pipeline cycle: sample a frame, run whichever estimators are due,
    /// and fire auto capture when the gate has settled. Estimator problems
    /// never propagate; they just mean no update this cycle.
    pub fn process(&mut self, now: Instant) -> Option<CaptureResult> {
        if self.state != ControllerState::Ready {
            return None;
        }
        let frame = self.feed.as_mut()?.frame()?;
        if frame.is_empty() {
            return None;
        }

        if due(self.last_face_at, now, self.cfg.face_interval) {
            self.last_face_at = Some(now);
            let boxes = self.detector.detect(&frame);
            self.signals.face_detected = !boxes.is_empty();
            self.signals.face_boxes = boxes;
        }
        if due(self.last_quality_at, now, self.cfg.quality_interval) {
            self.last_quality_at = Some(now);
            self.signals.quality = quality::assess(&frame).overall;
        }
        if due(self.last_liveness_at, now, self.cfg.liveness_interval) {
            self.last_liveness_at = Some(now);
            self.signals.liveness = self.liveness.observe(&frame);
        }

        self.ingest_signals(self.signals.face_detected, self.signals.quality, now);
        if self.auto_capture_due(now) {
            match self.capture_frame(&frame) {
                Ok(result) => {
                    self.auto_fired = true;
                    info!("auto capture fired, quality={:.2}", result.quality_score);
                    return Some(result);
                }
                Err(err) => {
                    // Refused, not fatal; the user can still capture manually
                    warn!("auto capture refused: {}", err);
                }
            }
        }
        None
    }

    /// Record externally computed gate signals. `process` feeds this from
    /// the live estimators; tests feed it directly.
    pub fn ingest_signals(&mut self, face_detected: bool, quality: f32, now: Instant) {
        self.signals.face_detected = face_detected;
        self.signals.quality = quality;

        let gate = face_detected && quality >= self.cfg.quality_threshold;
        if gate {
            self.gate_met_at.get_or_insert(now);
        } else {
            // Gate dropped: new readiness window, auto capture re-arms
            self.gate_met_at = None;
            self.auto_fired = false;
        }
    }

    /// Whether the auto trigger should fire now
    pub fn auto_capture_due(&self, now: Instant) -> bool {
        if !self.cfg.auto_capture || self.auto_fired || self.capture_in_flight {
            return false;
        }
        match self.gate_met_at {
            Some(at) => now.duration_since(at) >= self.cfg.settle_delay,
            None => false,
        }
    }

    /// Auto-capture step against the current feed frame; `None` when the
    /// gate is not due. Used by callers driving the gate via
    /// [`Self::ingest_signals`] rather than `process`.
    pub fn try_auto_capture(&mut self, now: Instant) -> Option<CaptureResult> {
        if !self.auto_capture_due(now) {
            return None;
        }
        let frame = self.feed.as_mut()?.frame()?;
        match self.capture_frame(&frame) {
            Ok(result) => {
                self.auto_fired = true;
                Some(result)
            }
            Err(err) => {
                warn!("auto capture refused: {}", err);
                None
            }
        }
    }

    /// Manual capture. Valid only while `Ready`.
    pub fn capture(&mut self) -> Result<CaptureResult, CaptureError> {
        if self.state != ControllerState::Ready {
            return Err(CaptureError::NotReady);
        }
        if self.capture_in_flight {
            return Err(CaptureError::InFlight);
        }
        let frame = self
            .feed
            .as_mut()
            .ok_or(CaptureError::NotReady)?
            .frame()
            .ok_or(CaptureError::NoFrame)?;
        self.capture_frame(&frame)
    }

    /// Re-arm auto capture after the user discards a photo
    pub fn reset_gate(&mut self) {
        self.gate_met_at = None;
        self.auto_fired = false;
    }

    /// Stop the camera and release all hardware tracks. Mandatory side
    /// effect of every exit path, also invoked from `Drop`.
    pub fn stop(&mut self) {
        self.teardown();
        self.state = ControllerState::Idle;
    }

    fn teardown(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            debug!("releasing camera feed ({})", feed.facing());
            feed.stop();
        }
    }

    fn capture_frame(&mut self, frame: &RgbaFrame) -> Result<CaptureResult, CaptureError> {
        if frame.is_empty() {
            return Err(CaptureError::ZeroDimensions);
        }
        self.capture_in_flight = true;
        self.state = ControllerState::Capturing;

        let result = self.encode_capture(frame);

        self.state = ControllerState::Ready;
        self.capture_in_flight = false;
        result
    }

    fn encode_capture(&self, frame: &RgbaFrame) -> Result<CaptureResult, CaptureError> {
        // JPEG carries no alpha; drop it
        let mut rgb = Vec::with_capacity(frame.pixel_count() * 3);
        for px in frame.data.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }

        let mut jpeg = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut jpeg,
            self.cfg.jpeg_quality,
        );
        image::ImageEncoder::write_image(
            encoder,
            &rgb,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

        let facing = self
            .feed
            .as_ref()
            .map(|f| f.facing().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(CaptureResult {
            image_jpeg: jpeg,
            face_detected: self.signals.face_detected,
            quality_score: self.signals.quality,
            liveness_score: self.signals.liveness,
            captured_at: chrono::Utc::now(),
            device: format!("{}-camera/{}", facing, std::env::consts::OS),
            resolution: format!("{}x{}", frame.width, frame.height),
        })
    }
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(at) => now.duration_since(at) >= interval,
        None => true,
    }
}

impl<S: CameraSource> Drop for CaptureController<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::camera::SyntheticCamera;
    use crate::capture::face::FixedFaceDetector;

    fn controller(cfg: CaptureConfig) -> CaptureController<SyntheticCamera> {
        let frames = vec![RgbaFrame::solid(32, 32, 120)];
        CaptureController::new(
            SyntheticCamera::new(frames),
            Box::new(FixedFaceDetector::always(0.9)),
            cfg,
        )
    }

    #[tokio::test]
    async fn test_start_reaches_ready() {
        let mut ctl = controller(CaptureConfig::default());
        ctl.start(FacingMode::Front).await.unwrap();
        assert_eq!(ctl.state(), ControllerState::Ready);
    }

    #[tokio::test]
    async fn test_rear_failure_falls_back_to_front() {
        let mut cam = SyntheticCamera::new(vec![RgbaFrame::solid(32, 32, 120)]);
        cam.fail_facing = Some(FacingMode::Rear);
        let mut ctl =
            CaptureController::new(cam, Box::new(FixedFaceDetector::always(0.9)), CaptureConfig::default());
        ctl.start(FacingMode::Rear).await.unwrap();
        assert_eq!(ctl.facing(), Some(FacingMode::Front));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_ready_after_timeout_with_dimensions() {
        let mut cam = SyntheticCamera::new(vec![RgbaFrame::solid(32, 32, 120)]);
        cam.slow_start_polls = 1000; // readiness event never fires
        let mut ctl =
            CaptureController::new(cam, Box::new(FixedFaceDetector::always(0.9)), CaptureConfig::default());
        ctl.start(FacingMode::Front).await.unwrap();
        assert_eq!(ctl.state(), ControllerState::Ready);
    }

    #[tokio::test]
    async fn test_capture_requires_ready() {
        let mut ctl = controller(CaptureConfig::default());
        assert!(matches!(ctl.capture(), Err(CaptureError::NotReady)));
        ctl.start(FacingMode::Front).await.unwrap();
        let result = ctl.capture().unwrap();
        assert!(!result.image_jpeg.is_empty());
        assert_eq!(result.resolution, "32x32");
    }

    #[tokio::test]
    async fn test_stop_releases_feed() {
        let mut ctl = controller(CaptureConfig::default());
        ctl.start(FacingMode::Front).await.unwrap();
        ctl.stop();
        assert_eq!(ctl.state(), ControllerState::Idle);
        assert!(matches!(ctl.capture(), Err(CaptureError::NotReady)));
    }

    #[tokio::test]
    async fn test_auto_capture_fires_once_after_settle() {
        let cfg = CaptureConfig {
            auto_capture: true,
            quality_threshold: 0.7,
            settle_delay: Duration::from_secs(1),
            ..CaptureConfig::default()
        };
        let mut ctl = controller(cfg);
        ctl.start(FacingMode::Front).await.unwrap();

        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(500);
        let t2 = t1 + Duration::from_millis(500);

        // Sample sequence: no face, then face at low quality, then face at
        // gate-passing quality
        ctl.ingest_signals(false, 0.0, t0);
        assert!(ctl.try_auto_capture(t0).is_none());
        ctl.ingest_signals(true, 0.5, t1);
        assert!(ctl.try_auto_capture(t1).is_none());
        ctl.ingest_signals(true, 0.8, t2);
        assert!(ctl.try_auto_capture(t2).is_none(), "must wait out the settle delay");

        // Settle delay elapses after the third sample
        let t3 = t2 + Duration::from_secs(1);
        ctl.ingest_signals(true, 0.8, t3);
        assert!(ctl.try_auto_capture(t3).is_some());

        // No re-trigger while the gate stays continuously met
        let t4 = t3 + Duration::from_secs(5);
        ctl.ingest_signals(true, 0.9, t4);
        assert!(ctl.try_auto_capture(t4).is_none());
    }

    #[tokio::test]
    async fn test_auto_capture_rearms_after_gate_drop() {
        let cfg = CaptureConfig {
            auto_capture: true,
            settle_delay: Duration::from_secs(1),
            ..CaptureConfig::default()
        };
        let mut ctl = controller(cfg);
        ctl.start(FacingMode::Front).await.unwrap();

        let t0 = Instant::now();
        ctl.ingest_signals(true, 0.9, t0);
        let t1 = t0 + Duration::from_secs(1);
        ctl.ingest_signals(true, 0.9, t1);
        assert!(ctl.try_auto_capture(t1).is_some());

        // Gate drops, then is met again: new readiness window
        let t2 = t1 + Duration::from_secs(1);
        ctl.ingest_signals(false, 0.9, t2);
        let t3 = t2 + Duration::from_secs(1);
        ctl.ingest_signals(true, 0.9, t3);
        let t4 = t3 + Duration::from_secs(1);
        ctl.ingest_signals(true, 0.9, t4);
        assert!(ctl.try_auto_capture(t4).is_some());
    }

    #[tokio::test]
    async fn test_switch_camera_changes_facing() {
        let mut ctl = controller(CaptureConfig::default());
        ctl.start(FacingMode::Front).await.unwrap();
        ctl.switch_camera().await.unwrap();
        assert_eq!(ctl.facing(), Some(FacingMode::Rear));
    }
}
