//! Liveness Estimator
//!
//! Distinguishes a live camera subject from a static photo or looping
//! replay by watching motion, brightness variance and temporal patterns
//! over a short rolling window of frames.

use std::collections::VecDeque;
use std::time::Instant;

use crate::capture::frame::RgbaFrame;

const WEIGHT_MOTION: f32 = 0.5;
const WEIGHT_BRIGHTNESS: f32 = 0.3;
const WEIGHT_TEMPORAL: f32 = 0.2;

/// Window size: 10 seconds of history at the 5 Hz sampling cadence
const WINDOW: usize = 50;
/// Minimum samples before motion/brightness sub-scores are confident
const MIN_HISTORY: usize = 10;
/// Minimum samples before the temporal sub-score is confident
const MIN_TEMPORAL_HISTORY: usize = 20;

/// Explicit "unknown" returned while history is insufficient
pub const NEUTRAL_SCORE: f32 = 0.5;

/// Per-frame statistics retained in the rolling window
#[derive(Debug, Clone, Copy)]
struct FrameSample {
    #[allow(dead_code)]
    at: Instant,
    brightness: f32,
    /// Mean absolute luma delta from the previous frame
    motion: f32,
}

/// Rolling-window liveness scorer
pub struct LivenessEstimator {
    history: VecDeque<FrameSample>,
    previous: Option<RgbaFrame>,
    last_score: f32,
}

impl LivenessEstimator {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(WINDOW),
            previous: None,
            last_score: NEUTRAL_SCORE,
        }
    }

    /// Feed one frame and get the updated liveness score in [0, 1].
    /// Returns exactly [`NEUTRAL_SCORE`] until enough history exists.
    pub fn observe(&mut self, frame: &RgbaFrame) -> f32 {
        let motion = match &self.previous {
            Some(prev) => frame.mean_abs_diff(prev),
            None => 0.0,
        };
        let sample = FrameSample {
            at: frame.sampled_at,
            brightness: frame.mean_luma(),
            motion,
        };

        if self.history.len() == WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.previous = Some(frame.clone());

        // Below the confidence floor the answer is "unknown", not a guess
        if self.history.len() < MIN_HISTORY {
            self.last_score = NEUTRAL_SCORE;
            return NEUTRAL_SCORE;
        }

        let score = (self.motion_score() * WEIGHT_MOTION
            + self.brightness_variation_score() * WEIGHT_BRIGHTNESS
            + self.temporal_consistency_score() * WEIGHT_TEMPORAL)
            .clamp(0.0, 1.0);
        self.last_score = score;
        score
    }

    /// Most recent score without feeding a new frame
    pub fn score(&self) -> f32 {
        self.last_score
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.previous = None;
        self.last_score = NEUTRAL_SCORE;
    }

    /// Near-zero motion reads as a static photo, excessive motion as an
    /// unstable hand; a moderate band scores highest.
    fn motion_score(&self) -> f32 {
        if self.history.len() < MIN_HISTORY {
            return NEUTRAL_SCORE;
        }
        let recent: Vec<f32> = self
            .history
            .iter()
            .rev()
            .take(MIN_HISTORY)
            .map(|s| s.motion)
            .collect();
        let avg = recent.iter().sum::<f32>() / recent.len() as f32;

        if avg < 2.0 {
            0.2
        } else if avg > 30.0 {
            0.3
        } else {
            0.8
        }
    }

    /// Natural lighting flickers a little; a frozen or wildly swinging
    /// brightness curve suggests a non-live source.
    fn brightness_variation_score(&self) -> f32 {
        if self.history.len() < MIN_HISTORY {
            return NEUTRAL_SCORE;
        }
        let recent: Vec<f32> = self
            .history
            .iter()
            .rev()
            .take(MIN_HISTORY)
            .map(|s| s.brightness)
            .collect();
        let stddev = stddev(&recent);

        if stddev < 1.0 {
            0.3
        } else if stddev > 20.0 {
            0.4
        } else {
            0.8
        }
    }

    /// Penalizes looping replay (periodic motion) and image switching
    /// (too many abrupt frame-to-frame jumps).
    fn temporal_consistency_score(&self) -> f32 {
        if self.history.len() < MIN_TEMPORAL_HISTORY {
            return NEUTRAL_SCORE;
        }
        let recent: Vec<FrameSample> = self
            .history
            .iter()
            .rev()
            .take(MIN_TEMPORAL_HISTORY)
            .cloned()
            .collect();

        let motion: Vec<f32> = recent.iter().map(|s| s.motion).collect();
        if has_periodic_pattern(&motion) {
            return 0.2;
        }

        let mut sudden = 0usize;
        for pair in recent.windows(2) {
            let motion_jump = (pair[1].motion - pair[0].motion).abs();
            let brightness_jump = (pair[1].brightness - pair[0].brightness).abs();
            if motion_jump > 15.0 || brightness_jump > 30.0 {
                sudden += 1;
            }
        }
        let ratio = sudden as f32 / (recent.len() - 1) as f32;
        if ratio > 0.3 {
            0.3
        } else {
            0.9
        }
    }
}

impl Default for LivenessEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn stddev(values: &[f32]) -> f32 {
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// Autocorrelation across small lags; a high normalized correlation marks a
/// repeating motion pattern, the signature of looped video playback.
fn has_periodic_pattern(values: &[f32]) -> bool {
    if values.len() < 10 {
        return false;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    if variance <= 0.0 {
        return false;
    }

    let max_lag = (values.len() / 2).min(10);
    for lag in 2..=max_lag {
        let mut correlation = 0.0f32;
        let count = values.len() - lag;
        for i in 0..count {
            correlation += (values[i] - mean) * (values[i + lag] - mean);
        }
        correlation /= count as f32;
        if correlation / variance > 0.7 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jittered(base: u8, i: usize) -> RgbaFrame {
        // Gentle pseudo-natural wobble in the live band
        let level = base.wrapping_add(((i * 7) % 11) as u8);
        RgbaFrame::solid(16, 16, level)
    }

    #[test]
    fn test_cold_start_is_exactly_neutral() {
        let mut est = LivenessEstimator::new();
        let frame = RgbaFrame::solid(16, 16, 120);
        for _ in 0..MIN_HISTORY - 1 {
            assert_eq!(est.observe(&frame), NEUTRAL_SCORE);
        }
        assert!(est.sample_count() < MIN_HISTORY);
    }

    #[test]
    fn test_static_frames_score_low() {
        let mut est = LivenessEstimator::new();
        let frame = RgbaFrame::solid(16, 16, 120);
        let mut score = NEUTRAL_SCORE;
        for _ in 0..30 {
            score = est.observe(&frame);
        }
        // Zero motion and zero brightness variance both read as a photo
        assert!(score < NEUTRAL_SCORE, "static feed scored {}", score);
    }

    #[test]
    fn test_moderate_motion_scores_high() {
        let mut est = LivenessEstimator::new();
        let mut score = NEUTRAL_SCORE;
        for i in 0..30 {
            score = est.observe(&jittered(110, i));
        }
        assert!(score > 0.6, "live-like feed scored {}", score);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut est = LivenessEstimator::new();
        for i in 0..120 {
            est.observe(&jittered(110, i));
        }
        assert_eq!(est.sample_count(), WINDOW);
    }

    #[test]
    fn test_score_always_bounded() {
        let mut est = LivenessEstimator::new();
        for i in 0..60 {
            let level = if i % 2 == 0 { 0 } else { 255 };
            let s = est.observe(&RgbaFrame::solid(16, 16, level));
            assert!((0.0..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_reset_returns_to_neutral() {
        let mut est = LivenessEstimator::new();
        for i in 0..30 {
            est.observe(&jittered(110, i));
        }
        est.reset();
        assert_eq!(est.score(), NEUTRAL_SCORE);
        assert_eq!(est.sample_count(), 0);
    }
}
