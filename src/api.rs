//! Attendance API Client
//!
//! HTTP client for the attendance server. The trait seam exists so the
//! session driver can run against a scripted server in tests; the real
//! implementation is a thin reqwest wrapper with the status-code mapping
//! the protocol depends on (410 expired, 404/400 unknown).

use std::future::Future;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::CaptureResult;

#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 410: the session is over, terminal for the attempt
    #[error("session expired")]
    SessionExpired,
    /// HTTP 404 or 400: the server does not know this session
    #[error("unknown session")]
    UnknownSession,
    /// Anything retryable: network failure, 5xx, malformed body
    #[error("transient api failure: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transient(e.to_string())
    }
}

/// Response to stage-two activation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateQr2Response {
    pub rotating_token: String,
    pub valid_for_ms: Option<u64>,
}

/// Current session state as reported by the polling endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_token: Option<String>,
    pub rotating_token: Option<String>,
    #[serde(default)]
    pub qr2_active: bool,
    pub valid_for_ms: Option<u64>,
}

/// Tri-state verdict on a submitted attendance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum AttendanceVerdict {
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "REVIEW")]
    Review,
    #[serde(rename = "REJECTED")]
    Rejected,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub status: AttendanceVerdict,
    /// Student id, echoed when the server recognized the face
    pub mssv: Option<String>,
    /// Student display name
    pub ho_ten: Option<String>,
    pub confidence: Option<f32>,
}

/// Server operations the session driver needs. Implemented by
/// [`HttpSessionApi`] against the real server and by scripted fakes in
/// the scenario tests.
pub trait SessionApi: Send {
    fn activate_qr2(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<ActivateQr2Response, ApiError>> + Send;

    fn session_status(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<SessionStatus, ApiError>> + Send;

    /// Ask the server whether a locally scanned rotating token is current
    fn validate_qr(
        &self,
        session_id: &str,
        rotating_token: &str,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;

    fn submit_attendance(
        &self,
        session_token: &str,
        rotating_token: &str,
        capture: &CaptureResult,
    ) -> impl Future<Output = Result<SubmitResponse, ApiError>> + Send;
}

pub struct HttpSessionApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSessionApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn map_status(status: reqwest::StatusCode) -> Option<ApiError> {
        if status.is_success() {
            return None;
        }
        match status.as_u16() {
            410 => Some(ApiError::SessionExpired),
            400 | 404 => Some(ApiError::UnknownSession),
            s => Some(ApiError::Transient(format!("http {}", s))),
        }
    }
}

impl SessionApi for HttpSessionApi {
    async fn activate_qr2(&self, session_id: &str) -> Result<ActivateQr2Response, ApiError> {
        let url = format!("{}/sessions/{}/activate-qr2", self.base_url, session_id);
        info!("activating stage two: {}", url);

        let response = self.client.post(&url).send().await?;
        if let Some(err) = Self::map_status(response.status()) {
            warn!("activation failed: {}", err);
            return Err(err);
        }
        Ok(response.json().await?)
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus, ApiError> {
        let url = format!("{}/sessions/{}/status", self.base_url, session_id);

        let response = self.client.get(&url).send().await?;
        if let Some(err) = Self::map_status(response.status()) {
            return Err(err);
        }
        Ok(response.json().await?)
    }

    async fn validate_qr(&self, session_id: &str, rotating_token: &str) -> Result<bool, ApiError> {
        let url = format!("{}/sessions/{}/validate-qr", self.base_url, session_id);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "rotatingToken": rotating_token }))
            .send()
            .await?;
        match response.status().as_u16() {
            200 => Ok(true),
            // A stale scan is an expected outcome, not an error
            400 | 401 | 403 | 409 => Ok(false),
            410 => Err(ApiError::SessionExpired),
            s => Err(ApiError::Transient(format!("http {}", s))),
        }
    }

    async fn submit_attendance(
        &self,
        session_token: &str,
        rotating_token: &str,
        capture: &CaptureResult,
    ) -> Result<SubmitResponse, ApiError> {
        let url = format!("{}/attendances", self.base_url);
        info!(
            "submitting attendance ({} bytes jpeg)",
            capture.image_jpeg.len()
        );

        let part = reqwest::multipart::Part::bytes(capture.image_jpeg.clone())
            .file_name("capture.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ApiError::Transient(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("sessionToken", session_token.to_string())
            .text("rotatingToken", rotating_token.to_string())
            .part("image", part);

        let response = self.client.post(&url).multipart(form).send().await?;
        if let Some(err) = Self::map_status(response.status()) {
            warn!("submission failed: {}", err);
            return Err(err);
        }
        let parsed: SubmitResponse = response.json().await?;
        info!("attendance verdict: {:?}", parsed.status);
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;
        assert!(HttpSessionApi::map_status(StatusCode::OK).is_none());
        assert!(matches!(
            HttpSessionApi::map_status(StatusCode::GONE),
            Some(ApiError::SessionExpired)
        ));
        assert!(matches!(
            HttpSessionApi::map_status(StatusCode::NOT_FOUND),
            Some(ApiError::UnknownSession)
        ));
        assert!(matches!(
            HttpSessionApi::map_status(StatusCode::BAD_REQUEST),
            Some(ApiError::UnknownSession)
        ));
        assert!(matches!(
            HttpSessionApi::map_status(StatusCode::INTERNAL_SERVER_ERROR),
            Some(ApiError::Transient(_))
        ));
    }

    #[test]
    fn test_status_body_with_token() {
        let status: SessionStatus = serde_json::from_str(
            r#"{"sessionToken":"SESSION-s1.1.sig","rotatingToken":"STEP-s1.3.sig","qr2Active":true,"validForMs":15000}"#,
        )
        .unwrap();
        assert!(status.qr2_active);
        assert_eq!(status.rotating_token.as_deref(), Some("STEP-s1.3.sig"));
        assert_eq!(status.valid_for_ms, Some(15000));
    }

    #[test]
    fn test_status_body_before_activation() {
        let status: SessionStatus =
            serde_json::from_str(r#"{"sessionToken":"SESSION-s1.1.sig","qr2Active":false}"#)
                .unwrap();
        assert!(!status.qr2_active);
        assert!(status.rotating_token.is_none());
    }

    #[test]
    fn test_submit_response_verdicts() {
        let accepted: SubmitResponse = serde_json::from_str(
            r#"{"status":"ACCEPTED","mssv":"20210001","hoTen":"Nguyen Van A","confidence":0.93}"#,
        )
        .unwrap();
        assert_eq!(accepted.status, AttendanceVerdict::Accepted);
        assert_eq!(accepted.mssv.as_deref(), Some("20210001"));

        let rejected: SubmitResponse = serde_json::from_str(r#"{"status":"REJECTED"}"#).unwrap();
        assert_eq!(rejected.status, AttendanceVerdict::Rejected);
        assert!(rejected.mssv.is_none());
    }

    #[test]
    fn test_activation_body() {
        let body: ActivateQr2Response =
            serde_json::from_str(r#"{"rotatingToken":"STEP-s1.2.sig","validForMs":20000}"#).unwrap();
        assert_eq!(body.rotating_token, "STEP-s1.2.sig");
        assert_eq!(body.valid_for_ms, Some(20000));
    }
}
