//! QR Attendance Client
//!
//! Client side of a two-stage QR attendance handshake: a static classroom
//! QR yields a session token, a rotating on-screen QR proves presence at
//! submission time, and a camera capture with quality and liveness scoring
//! backs the attendance record.

pub mod api;
pub mod capture;
pub mod config;
pub mod qr;
pub mod session;
