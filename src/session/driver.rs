//! Session Driver
//!
//! Async orchestration around the handshake machine: stage-two activation,
//! the push-first/poll-fallback wait for the rotating token, the scan
//! validation path and attendance submission. All waiting uses the tokio
//! clock so scenario tests can run under a paused runtime.

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::{ApiError, SessionApi, SubmitResponse};
use crate::capture::CaptureResult;

use super::handshake::{Handshake, HandshakeEvent, HandshakeState, TokenSource};
use super::push::PushEvent;
use super::token::{RotatingToken, SessionToken};

/// Timing knobs for the dual-channel token wait
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long to give the push channel before the first poll
    pub push_grace: Duration,
    pub poll_interval: Duration,
    /// Total polling budget before advising a page reload
    pub poll_budget: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            push_grace: Duration::from_secs(3),
            poll_interval: Duration::from_secs(5),
            poll_budget: Duration::from_secs(300),
        }
    }
}

pub struct SessionDriver<A: SessionApi> {
    api: A,
    cfg: DriverConfig,
    handshake: Handshake,
    state_tx: watch::Sender<HandshakeState>,
    push_connected: bool,
    /// Set when the polling budget ran out with no token; the UI should
    /// tell the user to reload rather than keep hammering the server
    reload_advised: bool,
    outcome: Option<SubmitResponse>,
}

impl<A: SessionApi> SessionDriver<A> {
    /// Build a driver for one attempt. A missing or unparsable static token
    /// yields an already-failed attempt; no network calls will be made.
    pub fn new(api: A, raw_session_token: Option<&str>, cfg: DriverConfig) -> Self {
        let handshake = match raw_session_token.and_then(SessionToken::parse) {
            Some(token) => {
                info!("attempt started for session {}", token.session_id());
                Handshake::new(token)
            }
            None => {
                warn!("no usable session token, attempt is dead on arrival");
                Handshake::failed_static_token()
            }
        };
        let (state_tx, _) = watch::channel(handshake.state().clone());
        Self {
            api,
            cfg,
            handshake,
            state_tx,
            push_connected: false,
            reload_advised: false,
            outcome: None,
        }
    }

    /// Observe state transitions without holding the driver
    pub fn subscribe(&self) -> watch::Receiver<HandshakeState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state().clone()
    }

    pub fn rotating_token(&self) -> Option<RotatingToken> {
        self.handshake.rotating_token().cloned()
    }

    pub fn reload_advised(&self) -> bool {
        self.reload_advised
    }

    /// The server's verdict, once submission has completed
    pub fn outcome(&self) -> Option<&SubmitResponse> {
        self.outcome.as_ref()
    }

    fn publish(&self) {
        let _ = self.state_tx.send_replace(self.handshake.state().clone());
    }

    fn apply(&mut self, event: HandshakeEvent) {
        self.handshake.apply(event);
        self.publish();
    }

    fn offer(&mut self, token: RotatingToken, source: TokenSource) -> bool {
        let accepted = self.handshake.offer_rotating(token, source);
        if accepted {
            self.publish();
        }
        accepted
    }

    /// Tell the server to open stage two. The activation body echoes the
    /// current rotating token, but acceptance is reserved for the push and
    /// poll channels so every client observes the same delivery order.
    pub async fn activate(&mut self) {
        let Some(session_id) = self.session_id() else {
            return;
        };
        match self.api.activate_qr2(&session_id).await {
            Ok(body) => {
                debug!(
                    "stage two active, token rotates every {:?} ms",
                    body.valid_for_ms
                );
            }
            Err(ApiError::SessionExpired) | Err(ApiError::UnknownSession) => {
                self.apply(HandshakeEvent::SessionExpired);
            }
            Err(ApiError::Transient(e)) => {
                // Poll fallback can still recover the token
                warn!("activation failed transiently: {}", e);
            }
        }
    }

    pub fn camera_ready(&mut self) {
        self.apply(HandshakeEvent::CameraReady);
    }

    /// Wait for a rotating token on any channel. Push gets a head start;
    /// polling begins after the grace period and stops as soon as push
    /// connects, the server disowns the session, or the budget runs out.
    /// Locally scanned candidates arrive on `scanned` and go through server
    /// validation before they can win the slot.
    /// Returns when a token is accepted or the attempt turns terminal.
    pub async fn await_rotating_token(
        &mut self,
        mut push: mpsc::Receiver<PushEvent>,
        mut scanned: mpsc::Receiver<String>,
    ) {
        let start = Instant::now();
        let budget_end = start + self.cfg.poll_budget;
        let mut next_poll = start + self.cfg.push_grace;
        let mut polling = true;
        let mut push_open = true;
        let mut scan_open = true;

        loop {
            if self.handshake.is_terminal() || self.handshake.rotating_token().is_some() {
                return;
            }
            if !push_open && !scan_open && !polling {
                // Nothing left that could deliver a token
                warn!("all token channels are dead");
                return;
            }

            tokio::select! {
                maybe = push.recv(), if push_open => match maybe {
                    Some(event) => self.handle_push(event),
                    None => {
                        push_open = false;
                        self.push_connected = false;
                    }
                },
                maybe = scanned.recv(), if scan_open => match maybe {
                    Some(candidate) => {
                        if let Err(e) = self.offer_scanned(&candidate).await {
                            debug!("scan validation failed: {}", e);
                        }
                    }
                    None => scan_open = false,
                },
                _ = sleep_until(next_poll), if polling && !self.push_connected => {
                    if Instant::now() >= budget_end {
                        warn!("polling budget exhausted, advising reload");
                        self.reload_advised = true;
                        polling = false;
                        continue;
                    }
                    polling = self.poll_once().await;
                    next_poll = Instant::now() + self.cfg.poll_interval;
                }
            }
        }
    }

    fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected => {
                info!("push channel live, polling stands down");
                self.push_connected = true;
            }
            PushEvent::Qr2Activated { token } => {
                self.offer(token, TokenSource::Push);
            }
            PushEvent::SessionEnded => {
                self.apply(HandshakeEvent::SessionExpired);
            }
            PushEvent::Disconnected => {
                info!("push channel lost, polling resumes");
                self.push_connected = false;
            }
        }
    }

    /// One poll of the status endpoint. Returns false when polling should
    /// stop for good.
    async fn poll_once(&mut self) -> bool {
        let Some(session_id) = self.session_id() else {
            return false;
        };
        match self.api.session_status(&session_id).await {
            Ok(status) => {
                if status.qr2_active {
                    if let Some(value) = status.rotating_token {
                        self.offer(
                            RotatingToken::new(value, status.valid_for_ms),
                            TokenSource::Poll,
                        );
                    }
                } else {
                    debug!("stage two not yet active");
                }
                true
            }
            Err(ApiError::SessionExpired) => {
                self.apply(HandshakeEvent::SessionExpired);
                false
            }
            Err(ApiError::UnknownSession) => {
                // The server will never learn about this session; go quiet
                // and leave the push channel as the only hope
                warn!("server does not know session {}, polling stops", session_id);
                false
            }
            Err(ApiError::Transient(e)) => {
                debug!("status poll failed transiently: {}", e);
                true
            }
        }
    }

    /// Offer a rotating token decoded from the video feed. Scanned tokens
    /// are never trusted directly; the server validates currency first.
    /// Returns whether the token ended up accepted.
    pub async fn offer_scanned(&mut self, raw: &str) -> Result<bool, ApiError> {
        if self.handshake.is_terminal() || self.handshake.rotating_token().is_some() {
            return Ok(false);
        }
        let Some(session_id) = self.session_id() else {
            return Ok(false);
        };
        match self.api.validate_qr(&session_id, raw).await {
            Ok(true) => Ok(self.offer(RotatingToken::new(raw, None), TokenSource::Scan)),
            Ok(false) => {
                debug!("scanned token is stale, waiting for the next rotation");
                Ok(false)
            }
            Err(ApiError::SessionExpired) => {
                self.apply(HandshakeEvent::SessionExpired);
                Err(ApiError::SessionExpired)
            }
            Err(e) => Err(e),
        }
    }

    pub fn photo_captured(&mut self) {
        self.apply(HandshakeEvent::PhotoCaptured);
    }

    /// Discard the current photo and return to capture. The accepted
    /// rotating token survives.
    pub fn retake(&mut self) {
        self.apply(HandshakeEvent::PhotoDiscarded);
    }

    /// Submit the captured photo with both credentials. Transient failures
    /// leave the attempt in `AwaitingSubmission` so the user can retry.
    pub async fn submit(&mut self, capture: &CaptureResult) -> Result<SubmitResponse, ApiError> {
        if *self.handshake.state() != HandshakeState::AwaitingSubmission {
            return Err(ApiError::Transient("nothing to submit".to_string()));
        }
        let (session_raw, rotating) = match (
            self.handshake.session().map(|s| s.raw().to_string()),
            self.handshake.rotating_token().map(|t| t.value.clone()),
        ) {
            (Some(s), Some(r)) => (s, r),
            _ => return Err(ApiError::Transient("missing credentials".to_string())),
        };

        match self.api.submit_attendance(&session_raw, &rotating, capture).await {
            Ok(response) => {
                self.outcome = Some(response.clone());
                self.apply(HandshakeEvent::SubmissionSucceeded);
                Ok(response)
            }
            Err(ApiError::SessionExpired) => {
                self.apply(HandshakeEvent::SessionExpired);
                Err(ApiError::SessionExpired)
            }
            Err(e) => {
                warn!("submission failed, attempt stays retryable: {}", e);
                Err(e)
            }
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.handshake.session().map(|s| s.session_id().to_string())
    }
}
