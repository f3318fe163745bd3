//! Video Frames
//!
//! RGBA frame buffer shared by the estimators and the QR scan loop.

use std::time::Instant;

/// One RGBA video frame as sampled from the camera feed
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, `width * height * 4` bytes
    pub data: Vec<u8>,
    /// Monotonic sample time
    pub sampled_at: Instant,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            data,
            sampled_at: Instant::now(),
        }
    }

    /// Frame with all pixels set to one gray level (synthetic feeds and tests)
    pub fn solid(width: u32, height: u32, level: u8) -> Self {
        let mut data = vec![level; (width * height * 4) as usize];
        for px in data.chunks_exact_mut(4) {
            px[3] = 255;
        }
        Self::new(width, height, data)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Grayscale value at (x, y), the (r + g + b) / 3 average
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> f32 {
        let idx = ((y * self.width + x) * 4) as usize;
        (self.data[idx] as f32 + self.data[idx + 1] as f32 + self.data[idx + 2] as f32) / 3.0
    }

    /// Mean luma over the whole frame
    pub fn mean_luma(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let mut sum = 0.0f64;
        for px in self.data.chunks_exact(4) {
            sum += (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0;
        }
        (sum / self.pixel_count() as f64) as f32
    }

    /// Mean absolute per-pixel luma difference against another frame.
    /// Frames of different dimensions compare as maximally different.
    pub fn mean_abs_diff(&self, other: &RgbaFrame) -> f32 {
        if self.width != other.width || self.height != other.height || self.is_empty() {
            return 255.0;
        }
        let mut sum = 0.0f64;
        for (a, b) in self
            .data
            .chunks_exact(4)
            .zip(other.data.chunks_exact(4))
        {
            let la = (a[0] as f64 + a[1] as f64 + a[2] as f64) / 3.0;
            let lb = (b[0] as f64 + b[1] as f64 + b[2] as f64) / 3.0;
            sum += (la - lb).abs();
        }
        (sum / self.pixel_count() as f64) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame_luma() {
        let frame = RgbaFrame::solid(8, 8, 100);
        assert!((frame.mean_luma() - 100.0).abs() < 0.01);
        assert!((frame.luma(3, 3) - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_mean_abs_diff() {
        let a = RgbaFrame::solid(8, 8, 100);
        let b = RgbaFrame::solid(8, 8, 110);
        assert!((a.mean_abs_diff(&b) - 10.0).abs() < 0.01);
        assert!((a.mean_abs_diff(&a)).abs() < 0.01);
    }

    #[test]
    fn test_dimension_mismatch_is_max_diff() {
        let a = RgbaFrame::solid(8, 8, 100);
        let b = RgbaFrame::solid(4, 4, 100);
        assert_eq!(a.mean_abs_diff(&b), 255.0);
    }
}
