//! Application Configuration
//!
//! Persistent settings for the attendance client.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Server ===
    /// Base URL of the attendance API
    pub api_base_url: String,

    /// WebSocket URL of the push endpoint
    pub push_ws_url: String,

    // === Token wait ===
    /// Head start given to the push channel before polling begins, ms
    pub push_grace_ms: u64,

    /// Status poll interval, ms
    pub poll_interval_ms: u64,

    /// Total polling budget before advising a reload, ms
    pub poll_budget_ms: u64,

    // === Capture ===
    /// Preferred camera resolution (e.g., "1280x720")
    pub resolution: String,

    /// Auto-capture when face and quality gates hold
    pub auto_capture: bool,

    /// Minimum quality score for auto-capture (0..1)
    pub quality_threshold: f32,

    /// Settle delay between the gate opening and the shutter, ms
    pub settle_delay_ms: u64,

    /// JPEG encode quality (1..100)
    pub jpeg_quality: u8,

    // === Scoring cadences ===
    /// Quality assessment interval, ms
    pub quality_interval_ms: u64,

    /// Liveness sampling interval, ms
    pub liveness_interval_ms: u64,

    /// Face detection interval, ms
    pub face_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Server
            api_base_url: "http://localhost:8080/api".to_string(),
            push_ws_url: "ws://localhost:8080/ws/session".to_string(),

            // Token wait
            push_grace_ms: 3_000,
            poll_interval_ms: 5_000,
            poll_budget_ms: 300_000,

            // Capture
            resolution: "1280x720".to_string(),
            auto_capture: true,
            quality_threshold: 0.7,
            settle_delay_ms: 1_000,
            jpeg_quality: 90,

            // Cadences
            quality_interval_ms: 1_000,
            liveness_interval_ms: 200,
            face_interval_ms: 500,
        }
    }
}

impl Settings {
    /// Get settings file path
    fn file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("qrattend").join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::file_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::file_path().ok_or_else(|| anyhow::anyhow!("No config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get resolution as (width, height)
    pub fn resolution_tuple(&self) -> (u32, u32) {
        let parts: Vec<&str> = self.resolution.split('x').collect();
        if parts.len() == 2 {
            let width = parts[0].parse().unwrap_or(1280);
            let height = parts[1].parse().unwrap_or(720);
            (width, height)
        } else {
            (1280, 720)
        }
    }

    pub fn driver_config(&self) -> crate::session::DriverConfig {
        crate::session::DriverConfig {
            push_grace: Duration::from_millis(self.push_grace_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_budget: Duration::from_millis(self.poll_budget_ms),
        }
    }

    pub fn capture_config(&self) -> crate::capture::CaptureConfig {
        crate::capture::CaptureConfig {
            auto_capture: self.auto_capture,
            quality_threshold: self.quality_threshold,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            quality_interval: Duration::from_millis(self.quality_interval_ms),
            liveness_interval: Duration::from_millis(self.liveness_interval_ms),
            face_interval: Duration::from_millis(self.face_interval_ms),
            jpeg_quality: self.jpeg_quality,
            ..Default::default()
        }
    }
}
