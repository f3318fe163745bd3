//! QR Scan Loop
//!
//! Samples camera frames through the codec looking for a rotating-token
//! payload, short-circuiting once one is found.

use tracing::{debug, info};

use super::codec;
use crate::capture::frame::RgbaFrame;

/// Payload prefix identifying a rotating-token symbol
pub const ROTATING_PREFIX: &str = "STEP-";

/// Frame scanner for rotating-token QR symbols
pub struct QrScanLoop {
    /// Whether scanning is active
    active: bool,
    /// Last payload that matched the expected shape
    last_detected: Option<String>,
    /// Frame counter for rate limiting
    frame_count: u64,
    /// Scan every N frames to reduce CPU usage
    scan_interval: u64,
}

impl QrScanLoop {
    pub fn new() -> Self {
        Self {
            active: false,
            last_detected: None,
            frame_count: 0,
            scan_interval: 10,
        }
    }

    /// Start scanning
    pub fn start(&mut self) {
        info!("QR scan loop started");
        self.active = true;
        self.last_detected = None;
        self.frame_count = 0;
    }

    /// Stop scanning (also happens automatically on detection)
    pub fn stop(&mut self) {
        if self.active {
            info!("QR scan loop stopped");
        }
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_detected(&self) -> Option<&str> {
        self.last_detected.as_deref()
    }

    /// Scan one frame. Returns the payload once a symbol with the expected
    /// prefix is decoded; the loop deactivates itself at that point.
    ///
    /// Zero-dimension frames and frames that decode to nothing are the
    /// normal case and simply yield `None` for this cycle.
    pub fn scan_frame(&mut self, frame: &RgbaFrame) -> Option<String> {
        if !self.active {
            return None;
        }

        if frame.is_empty() {
            // Feed not delivering real frames yet; try again next cycle
            return None;
        }

        self.frame_count += 1;
        if self.frame_count % self.scan_interval != 0 {
            return None;
        }

        debug!(
            "scanning frame {} for rotating QR ({}x{})",
            self.frame_count, frame.width, frame.height
        );

        let content = codec::decode(frame)?;
        if content.starts_with(ROTATING_PREFIX) {
            info!("rotating QR detected: {}", content);
            self.last_detected = Some(content.clone());
            self.active = false;
            Some(content)
        } else {
            debug!("QR payload ignored, expected {}* shape", ROTATING_PREFIX);
            None
        }
    }

    /// Inject a detected payload (manual entry or tests)
    pub fn set_detected(&mut self, payload: String) {
        self.last_detected = Some(payload);
        self.active = false;
    }
}

impl Default for QrScanLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qr::codec::{encode, EncodeOptions};

    fn frame_with_symbol(payload: &str) -> RgbaFrame {
        let img = encode(payload, EncodeOptions::default()).unwrap();
        let mut data = Vec::with_capacity((img.width() * img.height() * 4) as usize);
        for px in img.pixels() {
            let v = px.0[0];
            data.extend_from_slice(&[v, v, v, 255]);
        }
        RgbaFrame::new(img.width(), img.height(), data)
    }

    fn scan_until(scan: &mut QrScanLoop, frame: &RgbaFrame, max_cycles: u64) -> Option<String> {
        for _ in 0..max_cycles {
            if let Some(payload) = scan.scan_frame(frame) {
                return Some(payload);
            }
        }
        None
    }

    #[test]
    fn test_detects_rotating_payload_and_stops() {
        let frame = frame_with_symbol("STEP-abc.7.sig");
        let mut scan = QrScanLoop::new();
        scan.start();

        let found = scan_until(&mut scan, &frame, 20);
        assert_eq!(found.as_deref(), Some("STEP-abc.7.sig"));
        assert!(!scan.is_active());
        assert_eq!(scan.last_detected(), Some("STEP-abc.7.sig"));
    }

    #[test]
    fn test_ignores_foreign_payload() {
        let frame = frame_with_symbol("https://example.com");
        let mut scan = QrScanLoop::new();
        scan.start();

        assert!(scan_until(&mut scan, &frame, 30).is_none());
        assert!(scan.is_active());
    }

    #[test]
    fn test_inactive_scanner_yields_nothing() {
        let frame = frame_with_symbol("STEP-abc.7.sig");
        let mut scan = QrScanLoop::new();
        assert!(scan_until(&mut scan, &frame, 20).is_none());
    }

    #[test]
    fn test_zero_dimension_frame_reschedules() {
        let mut scan = QrScanLoop::new();
        scan.start();
        let empty = RgbaFrame::new(0, 0, Vec::new());
        assert!(scan.scan_frame(&empty).is_none());
        assert!(scan.is_active());
    }
}
