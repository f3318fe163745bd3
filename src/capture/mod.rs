//! Capture Pipeline
//!
//! Camera ownership, frame scoring (quality, liveness, face presence) and
//! the controller that composes them into gated photo capture.

pub mod camera;
pub mod controller;
pub mod face;
pub mod frame;
pub mod liveness;
pub mod quality;

pub use camera::{CameraError, CameraFeed, CameraSource, FacingMode, SyntheticCamera};
pub use controller::{
    CaptureConfig, CaptureController, CaptureError, CaptureResult, CaptureSignals, ControllerState,
};
pub use face::{FaceBox, FaceDetector, FixedFaceDetector, HeuristicFaceDetector};
pub use frame::RgbaFrame;
pub use liveness::{LivenessEstimator, NEUTRAL_SCORE};
pub use quality::{assess as assess_quality, QualityScore};
