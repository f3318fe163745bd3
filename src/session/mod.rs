//! Session Protocol
//!
//! Token parsing, the handshake state machine, the push channel and the
//! async driver that ties them to the server API.

pub mod driver;
pub mod handshake;
pub mod push;
pub mod token;

pub use driver::{DriverConfig, SessionDriver};
pub use handshake::{FailureReason, Handshake, HandshakeEvent, HandshakeState, TokenSource};
pub use push::{PushClient, PushError, PushEvent};
pub use token::{RotatingToken, SessionToken};
