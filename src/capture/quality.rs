//! Image Quality Estimator
//!
//! Scores a single frame for sharpness, exposure, contrast and noise,
//! producing one quality scalar in [0, 1]. The four-pass pixel scan is
//! expensive relative to frame rate, so the controller throttles calls
//! to roughly one per second.

use crate::capture::frame::RgbaFrame;

const WEIGHT_SHARPNESS: f32 = 0.4;
const WEIGHT_BRIGHTNESS: f32 = 0.2;
const WEIGHT_CONTRAST: f32 = 0.3;
const WEIGHT_NOISE: f32 = 0.1;

/// Empirical ceiling for mean Sobel gradient magnitude
const SHARPNESS_CEILING: f32 = 100.0;
/// Luma stddev considered full contrast
const CONTRAST_CEILING: f32 = 60.0;
/// Local-block variance considered fully noisy
const NOISE_CEILING: f32 = 1000.0;
/// Tile edge for the local-variance noise pass
const NOISE_TILE: u32 = 8;

/// Per-frame quality breakdown
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityScore {
    pub sharpness: f32,
    pub brightness: f32,
    pub contrast: f32,
    pub noise: f32,
    /// Weighted blend, clamped to [0, 1]
    pub overall: f32,
}

/// Score one frame. Degenerate frames (zero dimension, or too small for the
/// Sobel window) score 0.
pub fn assess(frame: &RgbaFrame) -> QualityScore {
    if frame.is_empty() || frame.width < 3 || frame.height < 3 {
        return QualityScore::default();
    }

    let sharpness = sharpness_score(frame);
    let brightness = brightness_score(frame);
    let contrast = contrast_score(frame);
    let noise = noise_estimate(frame);

    let overall = (sharpness * WEIGHT_SHARPNESS
        + brightness * WEIGHT_BRIGHTNESS
        + contrast * WEIGHT_CONTRAST
        + (1.0 - noise) * WEIGHT_NOISE)
        .clamp(0.0, 1.0);

    QualityScore {
        sharpness,
        brightness,
        contrast,
        noise,
        overall,
    }
}

/// Mean Sobel gradient magnitude over interior pixels, normalized by an
/// empirical ceiling
fn sharpness_score(frame: &RgbaFrame) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0u64;

    for y in 1..frame.height - 1 {
        for x in 1..frame.width - 1 {
            let gx = -frame.luma(x - 1, y - 1) + frame.luma(x + 1, y - 1)
                - 2.0 * frame.luma(x - 1, y)
                + 2.0 * frame.luma(x + 1, y)
                - frame.luma(x - 1, y + 1)
                + frame.luma(x + 1, y + 1);
            let gy = -frame.luma(x - 1, y - 1) - 2.0 * frame.luma(x, y - 1)
                - frame.luma(x + 1, y - 1)
                + frame.luma(x - 1, y + 1)
                + 2.0 * frame.luma(x, y + 1)
                + frame.luma(x + 1, y + 1);
            sum += ((gx * gx + gy * gy) as f64).sqrt();
            count += 1;
        }
    }

    let mean = (sum / count as f64) as f32;
    (mean / SHARPNESS_CEILING).min(1.0)
}

/// Closeness of mean luma to mid-gray; penalizes both under- and
/// over-exposure symmetrically
fn brightness_score(frame: &RgbaFrame) -> f32 {
    let mean = frame.mean_luma();
    let deviation = (mean - 128.0).abs() / 128.0;
    (1.0 - deviation).max(0.0)
}

/// Luma standard deviation across the frame, normalized
fn contrast_score(frame: &RgbaFrame) -> f32 {
    let mean = frame.mean_luma() as f64;
    let mut variance = 0.0f64;
    for px in frame.data.chunks_exact(4) {
        let l = (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0;
        variance += (l - mean) * (l - mean);
    }
    let stddev = (variance / frame.pixel_count() as f64).sqrt() as f32;
    (stddev / CONTRAST_CEILING).min(1.0)
}

/// Average local variance over small non-overlapping tiles; high values read
/// as sensor noise
fn noise_estimate(frame: &RgbaFrame) -> f32 {
    let mut sum = 0.0f64;
    let mut tiles = 0u64;

    let mut y = 0;
    while y + NOISE_TILE <= frame.height {
        let mut x = 0;
        while x + NOISE_TILE <= frame.width {
            sum += tile_variance(frame, x, y);
            tiles += 1;
            x += NOISE_TILE;
        }
        y += NOISE_TILE;
    }

    if tiles == 0 {
        return 0.0;
    }
    ((sum / tiles as f64) as f32 / NOISE_CEILING).min(1.0)
}

fn tile_variance(frame: &RgbaFrame, x0: u32, y0: u32) -> f64 {
    let n = (NOISE_TILE * NOISE_TILE) as f64;
    let mut sum = 0.0f64;
    for y in y0..y0 + NOISE_TILE {
        for x in x0..x0 + NOISE_TILE {
            sum += frame.luma(x, y) as f64;
        }
    }
    let mean = sum / n;

    let mut variance = 0.0f64;
    for y in y0..y0 + NOISE_TILE {
        for x in x0..x0 + NOISE_TILE {
            let d = frame.luma(x, y) as f64 - mean;
            variance += d * d;
        }
    }
    variance / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_frame(width: u32, height: u32, seed: u32) -> RgbaFrame {
        // Small deterministic LCG so the test never depends on rand state
        let mut state = seed;
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            let v = (state >> 24) as u8;
            data.extend_from_slice(&[v, v, v, 255]);
        }
        RgbaFrame::new(width, height, data)
    }

    #[test]
    fn test_all_black_bounded() {
        let q = assess(&RgbaFrame::solid(64, 64, 0));
        assert!((0.0..=1.0).contains(&q.overall));
    }

    #[test]
    fn test_all_white_bounded() {
        let q = assess(&RgbaFrame::solid(64, 64, 255));
        assert!((0.0..=1.0).contains(&q.overall));
    }

    #[test]
    fn test_random_noise_bounded() {
        for seed in [1, 7, 99] {
            let q = assess(&noise_frame(64, 64, seed));
            assert!((0.0..=1.0).contains(&q.overall));
            assert!((0.0..=1.0).contains(&q.sharpness));
            assert!((0.0..=1.0).contains(&q.contrast));
            assert!((0.0..=1.0).contains(&q.noise));
        }
    }

    #[test]
    fn test_zero_dimension_frame_scores_zero() {
        let q = assess(&RgbaFrame::new(0, 0, Vec::new()));
        assert_eq!(q.overall, 0.0);
    }

    #[test]
    fn test_mid_gray_beats_black_on_brightness() {
        let mid = assess(&RgbaFrame::solid(32, 32, 128));
        let black = assess(&RgbaFrame::solid(32, 32, 0));
        assert!(mid.brightness > black.brightness);
    }

    #[test]
    fn test_flat_frame_has_no_contrast() {
        let q = assess(&RgbaFrame::solid(32, 32, 128));
        assert_eq!(q.contrast, 0.0);
        assert_eq!(q.sharpness, 0.0);
    }
}
