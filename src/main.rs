//! QR Attendance Client - Demo Binary
//!
//! Headless run of one attendance attempt: parse the attend link, open the
//! (synthetic) camera, wait for the rotating token on push/poll/scan, then
//! capture and submit.

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qrattend::api::HttpSessionApi;
use qrattend::capture::{
    CaptureController, FacingMode, HeuristicFaceDetector, RgbaFrame, SyntheticCamera,
};
use qrattend::config::Settings;
use qrattend::qr::QrScanLoop;
use qrattend::session::{FailureReason, HandshakeState, PushClient, SessionDriver};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("qrattend=info")),
        )
        .init();

    let settings = Settings::load()?;

    let mut args = std::env::args().skip(1);
    let target = args
        .next()
        .context("usage: qrattend <attend-url-or-session-token> [frames-dir]")?;
    let frames = match args.next() {
        Some(dir) => load_frames(&dir)?,
        None => vec![RgbaFrame::solid(640, 480, 128)],
    };

    let token = session_token_from_arg(&target);
    let api = HttpSessionApi::new(&settings.api_base_url);
    let mut driver = SessionDriver::new(api, token.as_deref(), settings.driver_config());

    if let HandshakeState::Failed(reason) = driver.state() {
        anyhow::bail!("{}", reason);
    }

    driver.activate().await;
    if let HandshakeState::Failed(reason) = driver.state() {
        anyhow::bail!("{}", reason);
    }

    // Push is best effort; a failed connect leaves polling as the fallback
    let session_id = driver
        .session_id()
        .context("session id missing after activation")?;
    let push_rx = match PushClient::new(&settings.push_ws_url, &session_id)
        .connect()
        .await
    {
        Ok(rx) => rx,
        Err(e) => {
            warn!("push channel unavailable ({}), relying on polling", e);
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            rx
        }
    };

    let mut controller = CaptureController::new(
        SyntheticCamera::new(frames.clone()),
        Box::new(HeuristicFaceDetector::new()),
        settings.capture_config(),
    );
    controller.start(FacingMode::Front).await?;
    driver.camera_ready();

    let scan_rx = spawn_scan_task(frames);
    driver.await_rotating_token(push_rx, scan_rx).await;

    if driver.reload_advised() {
        controller.stop();
        anyhow::bail!("no rotating token arrived in time; reload the attend page and retry");
    }
    if let HandshakeState::Failed(reason) = driver.state() {
        controller.stop();
        anyhow::bail!("{}", reason);
    }
    info!("rotating token accepted, capture window open");

    let capture = capture_photo(&mut controller).await?;
    info!(
        "captured {} at {} (quality {:.2}, liveness {:.2})",
        capture.resolution, capture.captured_at, capture.quality_score, capture.liveness_score
    );
    driver.photo_captured();

    let verdict = driver.submit(&capture).await;
    controller.stop();

    match verdict {
        Ok(response) => {
            println!("attendance {:?}", response.status);
            if let (Some(mssv), Some(name)) = (&response.mssv, &response.ho_ten) {
                println!("recognized: {} ({})", name, mssv);
            }
            if let Some(confidence) = response.confidence {
                println!("confidence: {:.2}", confidence);
            }
            Ok(())
        }
        Err(e) => match driver.state() {
            HandshakeState::Failed(FailureReason::SessionExpired) => {
                anyhow::bail!("session expired before submission went through")
            }
            _ => anyhow::bail!("submission failed: {}", e),
        },
    }
}

/// Extract the session token from an attend link, or accept a raw token
fn session_token_from_arg(arg: &str) -> Option<String> {
    if let Some(idx) = arg.find("session=") {
        let raw = &arg[idx + "session=".len()..];
        let raw = raw.split('&').next().unwrap_or(raw);
        if raw.is_empty() {
            return None;
        }
        return urlencoding::decode(raw).map(|s| s.into_owned()).ok();
    }
    if arg.is_empty() {
        None
    } else {
        Some(arg.to_string())
    }
}

fn load_frames(dir: &str) -> Result<Vec<RgbaFrame>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading frames dir {}", dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    paths.sort();

    let mut frames = Vec::new();
    for path in paths {
        let img = image::open(&path)
            .with_context(|| format!("loading frame {}", path.display()))?
            .to_rgba8();
        let (w, h) = img.dimensions();
        frames.push(RgbaFrame::new(w, h, img.into_raw()));
    }
    anyhow::ensure!(!frames.is_empty(), "frames dir {} is empty", dir);
    info!("loaded {} frames from {}", frames.len(), dir);
    Ok(frames)
}

/// Run the rotating-QR scan loop over the frame sequence, feeding decoded
/// candidates to the driver until the receiver goes away.
fn spawn_scan_task(frames: Vec<RgbaFrame>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut scanner = QrScanLoop::new();
        scanner.start();
        let mut cursor = 0usize;
        loop {
            let frame = &frames[cursor % frames.len()];
            cursor += 1;
            if let Some(candidate) = scanner.scan_frame(frame) {
                if tx.send(candidate).await.is_err() {
                    break;
                }
                // Re-arm in case the candidate turns out stale
                scanner.start();
            }
            if tx.is_closed() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });
    rx
}

/// Wait for auto capture; fall back to a manual capture if the gate never
/// opens within a reasonable window.
async fn capture_photo(
    controller: &mut CaptureController<SyntheticCamera>,
) -> Result<qrattend::capture::CaptureResult> {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(15);
    loop {
        if let Some(result) = controller.process(Instant::now()) {
            return Ok(result);
        }
        if tokio::time::Instant::now() >= deadline {
            info!("auto capture gate never opened, capturing manually");
            return Ok(controller.capture()?);
        }
        tokio::time::sleep(std::time::Duration::from_millis(66)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_attend_url() {
        let url = "https://att.example.edu/attend?session=SESSION-s1.1700000000.sig";
        assert_eq!(
            session_token_from_arg(url).as_deref(),
            Some("SESSION-s1.1700000000.sig")
        );
    }

    #[test]
    fn test_token_from_encoded_url() {
        let url = "https://att.example.edu/attend?session=SESSION-s1.1700000000.sig%3D%3D&x=1";
        assert_eq!(
            session_token_from_arg(url).as_deref(),
            Some("SESSION-s1.1700000000.sig==")
        );
    }

    #[test]
    fn test_raw_token_passes_through() {
        assert_eq!(
            session_token_from_arg("SESSION-s1.1.sig").as_deref(),
            Some("SESSION-s1.1.sig")
        );
    }

    #[test]
    fn test_empty_session_param() {
        assert!(session_token_from_arg("https://x/attend?session=").is_none());
        assert!(session_token_from_arg("").is_none());
    }
}
