//! Player configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// When the once-per-session `view` event is emitted
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewPolicy {
    /// As soon as the player mounts
    OnMount,
    /// After this many seconds of actual playback
    AfterWatched { seconds: f64 },
}

impl Default for ViewPolicy {
    fn default() -> Self {
        ViewPolicy::OnMount
    }
}

/// Player configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Base of every endpoint this player talks to
    pub api_base_url: Url,
    /// Rolling telemetry rate-limit window (milliseconds)
    pub telemetry_window_ms: u64,
    /// Fraction of the duration that counts as completed
    pub completion_threshold: f64,
    /// Relative seek applied by the skip gestures (seconds)
    pub skip_seconds: f64,
    /// Volume delta applied by the volume gestures
    pub volume_step: f64,
    /// Inactivity before controls hide while playing (milliseconds)
    pub controls_hide_delay_ms: u64,
    /// Reported user, until authentication exists
    pub user_id: String,
    /// When to count a view
    pub view_policy: ViewPolicy,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8080/api/").expect("static URL"),
            telemetry_window_ms: 1000,
            completion_threshold: 0.9,
            skip_seconds: 5.0,
            volume_step: 0.1,
            controls_hide_delay_ms: 3000,
            user_id: "anonymous".to_string(),
            view_policy: ViewPolicy::OnMount,
            request_timeout_ms: 10000,
        }
    }
}

impl PlayerConfig {
    /// Load a configuration from JSON, falling back to defaults for missing keys
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the controller cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.telemetry_window_ms == 0 {
            return Err(Error::InvalidConfig("telemetry_window_ms must be positive".into()));
        }
        if !(self.completion_threshold > 0.0 && self.completion_threshold < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "completion_threshold must be in (0, 1), got {}",
                self.completion_threshold
            )));
        }
        if !(self.skip_seconds > 0.0) || !(self.volume_step > 0.0) {
            return Err(Error::InvalidConfig("skip and volume steps must be positive".into()));
        }
        if let ViewPolicy::AfterWatched { seconds } = self.view_policy {
            if !(seconds >= 0.0) {
                return Err(Error::InvalidConfig("view threshold must be non-negative".into()));
            }
        }
        Ok(())
    }

    pub fn telemetry_window(&self) -> Duration {
        Duration::from_millis(self.telemetry_window_ms)
    }

    pub fn controls_hide_delay(&self) -> Duration {
        Duration::from_millis(self.controls_hide_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Segmented-stream manifest for a video
    pub fn manifest_url(&self, video_id: &str) -> Result<Url> {
        self.endpoint(&format!("videos/{}/stream/master.m3u8", video_id))
    }

    /// Cue-timing document for a video's scrub previews
    pub fn cue_document_url(&self, video_id: &str) -> Result<Url> {
        self.endpoint(&format!("videos/{}/thumbnails/sprite.vtt", video_id))
    }

    /// Sprite sheet image for a video
    pub fn sprite_url(&self, video_id: &str) -> Result<Url> {
        self.endpoint(&format!("videos/{}/thumbnails/sprite.jpg", video_id))
    }

    /// Telemetry ingestion endpoint
    pub fn telemetry_url(&self) -> Result<Url> {
        self.endpoint("analytics/events")
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base_url
            .join(path)
            .map_err(|e| Error::InvalidConfig(format!("bad endpoint {}: {}", path, e)))
    }
}
