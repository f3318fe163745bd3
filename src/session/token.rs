//! Session Tokens
//!
//! Opaque server-issued credentials. The client never verifies signatures;
//! it only recovers the embedded session id by fixed-format parsing:
//! `PREFIX-{sessionId}.{issuedAt}.{signature}`.

/// Credential identifying one classroom session, obtained from the static
/// QR symbol. Immutable for the life of one attendance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    raw: String,
    session_id: String,
}

impl SessionToken {
    /// Parse a raw token, recovering the session id between the first `-`
    /// and the next `.` after it. A malformed token is a `None`, never a
    /// panic — the caller decides whether that is terminal.
    pub fn parse(raw: &str) -> Option<Self> {
        let dash = raw.find('-')?;
        let rest = &raw[dash + 1..];
        let dot = rest.find('.')?;
        let session_id = &rest[..dot];
        if session_id.is_empty() {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            session_id: session_id.to_string(),
        })
    }

    /// The full opaque token as issued
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Time-boxed rotating credential. Opaque to the client; only meaningful
/// paired with the SessionToken whose session activated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatingToken {
    pub value: String,
    /// Remaining validity as reported by the server, when known
    pub valid_for_ms: Option<u64>,
}

impl RotatingToken {
    pub fn new(value: impl Into<String>, valid_for_ms: Option<u64>) -> Self {
        Self {
            value: value.into(),
            valid_for_ms,
        }
    }
}
