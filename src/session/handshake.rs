//! Handshake State Machine
//!
//! The protocol core: a pure `(state, event) -> state` machine for one
//! attendance attempt, independent of timers, sockets and UI. The async
//! driver feeds it events; rotating-token acceptance is first-wins across
//! all delivery channels.

use tracing::{debug, info};

use super::token::{RotatingToken, SessionToken};

/// Position in the attendance protocol. Transitions are monotonic forward,
/// except that `AwaitingSubmission -> AwaitingCapture` (retake) is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingStaticToken,
    AwaitingCamera,
    AwaitingRotatingToken,
    AwaitingCapture,
    AwaitingSubmission,
    Completed,
    /// Terminal for this attempt; the user must re-scan a fresh static QR
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// SessionToken missing or unparsable; no network calls were attempted
    MissingSessionToken,
    /// Server reported the session expired (HTTP 410)
    SessionExpired,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::MissingSessionToken => {
                write!(f, "attendance token missing; scan the classroom QR again")
            }
            FailureReason::SessionExpired => {
                write!(f, "session expired; scan a fresh classroom QR")
            }
        }
    }
}

/// Which channel delivered a rotating token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Push,
    Poll,
    /// Decoded locally from the video feed (server-validated before offer)
    Scan,
}

/// Protocol events, fed by the driver
#[derive(Debug, Clone)]
pub enum HandshakeEvent {
    CameraReady,
    RotatingTokenOffered {
        token: RotatingToken,
        source: TokenSource,
    },
    PhotoCaptured,
    /// User discarded the photo before submitting (retake)
    PhotoDiscarded,
    SubmissionSucceeded,
    SessionExpired,
}

/// One attendance attempt
pub struct Handshake {
    state: HandshakeState,
    session: Option<SessionToken>,
    accepted: Option<(RotatingToken, TokenSource)>,
    has_photo: bool,
}

impl Handshake {
    /// Attempt with a parsed SessionToken, starting at `AwaitingCamera`
    pub fn new(session: SessionToken) -> Self {
        Self {
            state: HandshakeState::AwaitingCamera,
            session: Some(session),
            accepted: None,
            has_photo: false,
        }
    }

    /// Attempt that failed before it began (missing/unparsable token).
    /// The driver makes no network calls for such an attempt.
    pub fn failed_static_token() -> Self {
        Self {
            state: HandshakeState::Failed(FailureReason::MissingSessionToken),
            session: None,
            accepted: None,
            has_photo: false,
        }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn session(&self) -> Option<&SessionToken> {
        self.session.as_ref()
    }

    /// The accepted rotating token, once any channel has won
    pub fn rotating_token(&self) -> Option<&RotatingToken> {
        self.accepted.as_ref().map(|(t, _)| t)
    }

    pub fn token_source(&self) -> Option<TokenSource> {
        self.accepted.as_ref().map(|(_, s)| *s)
    }

    pub fn has_photo(&self) -> bool {
        self.has_photo
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            HandshakeState::Completed | HandshakeState::Failed(_)
        )
    }

    /// Apply one event. Events that make no sense in the current state are
    /// ignored; terminal states absorb everything.
    pub fn apply(&mut self, event: HandshakeEvent) -> &HandshakeState {
        if self.is_terminal() {
            debug!("event in terminal state ignored: {:?}", event);
            return &self.state;
        }

        match event {
            HandshakeEvent::CameraReady => {
                if self.state == HandshakeState::AwaitingCamera {
                    // A push-delivered token may already have been accepted
                    // while the camera was starting
                    self.state = if self.accepted.is_some() {
                        HandshakeState::AwaitingCapture
                    } else {
                        HandshakeState::AwaitingRotatingToken
                    };
                }
            }
            HandshakeEvent::RotatingTokenOffered { token, source } => {
                self.offer_rotating(token, source);
            }
            HandshakeEvent::PhotoCaptured => {
                if self.state == HandshakeState::AwaitingCapture {
                    self.has_photo = true;
                    self.state = HandshakeState::AwaitingSubmission;
                }
            }
            HandshakeEvent::PhotoDiscarded => {
                // Tokens and photos are independent axes; retake keeps the
                // accepted rotating token
                if self.state == HandshakeState::AwaitingSubmission {
                    self.has_photo = false;
                    self.state = HandshakeState::AwaitingCapture;
                }
            }
            HandshakeEvent::SubmissionSucceeded => {
                if self.state == HandshakeState::AwaitingSubmission {
                    self.state = HandshakeState::Completed;
                }
            }
            HandshakeEvent::SessionExpired => {
                info!("session expired, attempt is terminal");
                self.state = HandshakeState::Failed(FailureReason::SessionExpired);
            }
        }
        &self.state
    }

    /// First-wins acceptance across push, poll and scan. Returns true only
    /// for the winning offer; duplicates and late arrivals are ignored.
    ///
    /// The check and set happen synchronously within one callback, never
    /// split across an await point, which is what makes the dual-channel
    /// design safe against duplicate or out-of-order delivery.
    pub fn offer_rotating(&mut self, token: RotatingToken, source: TokenSource) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.accepted.is_some() {
            debug!("rotating token from {:?} ignored, already accepted", source);
            return false;
        }
        info!("rotating token accepted from {:?}", source);
        self.accepted = Some((token, source));
        if self.state == HandshakeState::AwaitingRotatingToken {
            self.state = HandshakeState::AwaitingCapture;
        }
        true
    }
}
