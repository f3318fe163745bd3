//! QR Symbol Codec
//!
//! Encodes text payloads into scannable symbols and decodes camera frames
//! back into payloads. Stateless; safe to call from concurrent frames.

use image::GrayImage;
use qrcode::{EcLevel, QrCode};
use thiserror::Error;
use tracing::debug;

use crate::capture::frame::RgbaFrame;

#[derive(Debug, Error)]
pub enum EncodeError {
    /// Payload exceeds symbol capacity for the chosen error-correction level
    #[error("payload of {len} bytes exceeds QR capacity at this density")]
    PayloadTooLong { len: usize },
    #[error("QR encoding failed: {0}")]
    Encoding(String),
}

/// Error-correction level, trading redundancy for symbol density
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCorrection {
    Low,
    Medium,
    Quartile,
    High,
}

impl From<ErrorCorrection> for EcLevel {
    fn from(ec: ErrorCorrection) -> Self {
        match ec {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        }
    }
}

/// Options for [`encode`]
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Target edge length in pixels; the symbol is scaled up to at least this
    pub size: u32,
    pub error_correction: ErrorCorrection,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            size: 256,
            error_correction: ErrorCorrection::Medium,
        }
    }
}

/// Encode a text payload into a grayscale QR symbol.
/// Deterministic for identical inputs.
pub fn encode(payload: &str, opts: EncodeOptions) -> Result<GrayImage, EncodeError> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), opts.error_correction.into())
        .map_err(|e| match e {
            qrcode::types::QrError::DataTooLong => EncodeError::PayloadTooLong {
                len: payload.len(),
            },
            other => EncodeError::Encoding(other.to_string()),
        })?;

    let modules = code.width() as u32;
    let colors = code.to_colors();

    // Quiet zone of 4 modules on each side, per the symbol spec
    const QUIET: u32 = 4;
    let scale = (opts.size / (modules + 2 * QUIET)).max(1);
    let edge = (modules + 2 * QUIET) * scale;

    let mut img = GrayImage::from_pixel(edge, edge, image::Luma([255u8]));
    for my in 0..modules {
        for mx in 0..modules {
            if colors[(my * modules + mx) as usize] == qrcode::Color::Dark {
                let x0 = (mx + QUIET) * scale;
                let y0 = (my + QUIET) * scale;
                for y in y0..y0 + scale {
                    for x in x0..x0 + scale {
                        img.put_pixel(x, y, image::Luma([0u8]));
                    }
                }
            }
        }
    }
    Ok(img)
}

/// Best-effort single-frame decode. `None` means no symbol was found in this
/// frame, the expected common case while scanning — not a failure.
pub fn decode(frame: &RgbaFrame) -> Option<String> {
    if frame.is_empty() {
        return None;
    }

    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        frame.width as usize,
        frame.height as usize,
        |x, y| frame.luma(x as u32, y as u32) as u8,
    );

    let grids = prepared.detect_grids();
    for grid in grids {
        match grid.decode() {
            Ok((_, content)) => return Some(content),
            Err(e) => {
                debug!("grid decode failed: {:?}", e);
            }
        }
    }
    None
}

/// Decode a standalone grayscale image (used for symbols rendered by [`encode`])
pub fn decode_image(img: &GrayImage) -> Option<String> {
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        img.width() as usize,
        img.height() as usize,
        |x, y| img.get_pixel(x as u32, y as u32).0[0],
    );
    prepared
        .detect_grids()
        .into_iter()
        .find_map(|g| g.decode().ok().map(|(_, content)| content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_to_rgba(img: &GrayImage) -> RgbaFrame {
        let mut data = Vec::with_capacity((img.width() * img.height() * 4) as usize);
        for px in img.pixels() {
            let v = px.0[0];
            data.extend_from_slice(&[v, v, v, 255]);
        }
        RgbaFrame::new(img.width(), img.height(), data)
    }

    #[test]
    fn test_round_trip() {
        let payload = "STEP-abc123.42.deadbeef";
        let img = encode(payload, EncodeOptions::default()).unwrap();
        let frame = gray_to_rgba(&img);
        assert_eq!(decode(&frame).as_deref(), Some(payload));
    }

    #[test]
    fn test_round_trip_high_ec() {
        let payload = "SESSION-xyz.1700000000.sig";
        let opts = EncodeOptions {
            size: 320,
            error_correction: ErrorCorrection::High,
        };
        let img = encode(payload, opts).unwrap();
        assert_eq!(decode_image(&img).as_deref(), Some(payload));
    }

    #[test]
    fn test_encode_deterministic() {
        let a = encode("hello", EncodeOptions::default()).unwrap();
        let b = encode("hello", EncodeOptions::default()).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_payload_too_long() {
        let huge = "x".repeat(8000);
        match encode(&huge, EncodeOptions::default()) {
            Err(EncodeError::PayloadTooLong { len }) => assert_eq!(len, 8000),
            other => panic!("expected PayloadTooLong, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_decode_blank_frame_is_none() {
        let frame = RgbaFrame::solid(64, 64, 128);
        assert!(decode(&frame).is_none());
    }

    #[test]
    fn test_decode_zero_dimension_frame() {
        let frame = RgbaFrame::new(0, 0, Vec::new());
        assert!(decode(&frame).is_none());
    }
}
