//! QR Symbols
//!
//! Symbol codec and the scan loop that watches the camera feed for
//! rotating-token payloads.

pub mod codec;
pub mod scan_loop;

pub use codec::{decode, encode, EncodeError, EncodeOptions, ErrorCorrection};
pub use scan_loop::{QrScanLoop, ROTATING_PREFIX};
