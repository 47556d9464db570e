//! Core types for Pixl Player

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Playback state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackStatus {
    /// Mounted, no stream attached
    Idle,
    /// Manifest loading, no frame yet
    Loading,
    /// Content is playing
    Playing,
    /// Playback paused
    Paused,
    /// Buffer underrun, waiting for data
    Buffering,
    /// Seek in flight
    Seeking,
    /// Fatal fault, terminal
    Errored,
}

impl PlaybackStatus {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: PlaybackStatus) -> bool {
        use PlaybackStatus::*;
        match (self, target) {
            // Terminal until the whole controller is rebuilt
            (Errored, _) => false,
            (_, Errored) => true,
            // Stalls can interrupt anything that has a stream
            (Idle, Buffering) => false,
            (Buffering, Buffering) => false,
            (_, Buffering) => true,
            _ => matches!(
                (self, target),
                (Idle, Loading) |
                (Loading, Paused) |
                (Paused, Playing) | (Playing, Paused) |
                (Playing, Seeking) | (Paused, Seeking) | (Seeking, Seeking) |
                (Seeking, Playing) | (Seeking, Paused) |
                (Buffering, Playing) | (Buffering, Paused)
            ),
        }
    }

    /// True when transport commands are meaningful
    pub fn has_media(&self) -> bool {
        matches!(
            self,
            PlaybackStatus::Playing
                | PlaybackStatus::Paused
                | PlaybackStatus::Seeking
                | PlaybackStatus::Buffering
        )
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Idle => write!(f, "idle"),
            PlaybackStatus::Loading => write!(f, "loading"),
            PlaybackStatus::Playing => write!(f, "playing"),
            PlaybackStatus::Paused => write!(f, "paused"),
            PlaybackStatus::Buffering => write!(f, "buffering"),
            PlaybackStatus::Seeking => write!(f, "seeking"),
            PlaybackStatus::Errored => write!(f, "errored"),
        }
    }
}

/// Manual or automatic level selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSelection {
    /// Let the engine's ABR pick
    #[default]
    Auto,
    /// Pin to a level index from the descriptor list
    Manual(usize),
}

impl std::fmt::Display for LevelSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelSelection::Auto => write!(f, "auto"),
            LevelSelection::Manual(index) => write!(f, "{}", index),
        }
    }
}

/// One selectable rendition, as presented to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDescriptor {
    /// Position in the ascending list
    pub index: usize,
    /// Bucketed label, e.g. "720p"
    pub label: String,
    /// Bits per second
    pub bitrate: u64,
    /// Vertical resolution reported by the manifest
    pub height: u32,
    /// Index the engine uses for the same rendition
    pub engine_index: usize,
}

/// Immutable level list, replaced wholesale on every manifest parse
pub type LevelList = Arc<[LevelDescriptor]>;

/// Bucket a vertical resolution to its display label.
pub fn quality_label(height: u32) -> &'static str {
    match height {
        0..=360 => "360p",
        361..=480 => "480p",
        481..=720 => "720p",
        721..=1080 => "1080p",
        _ => "native",
    }
}

/// Snapshot of everything the controller owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    /// Seconds
    pub current_time: f64,
    /// Seconds, 0 until the first frame is ready
    pub duration: f64,
    /// 0.0 ..= 1.0
    pub volume: f64,
    pub muted: bool,
    pub playback_rate: f64,
    pub active_level: LevelSelection,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            playback_rate: 1.0,
            active_level: LevelSelection::Auto,
        }
    }
}

impl PlaybackState {
    /// Fraction watched, 0 when duration is unknown
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            self.current_time / self.duration
        } else {
            0.0
        }
    }
}

/// Rates offered by the speed selector
pub const PLAYBACK_RATE_PRESETS: [f64; 6] = [0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

/// Format seconds as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;

    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use PlaybackStatus::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Seeking));
        assert!(Seeking.can_transition_to(Paused));
        assert!(Playing.can_transition_to(Buffering));
        assert!(Buffering.can_transition_to(Playing));

        assert!(!Idle.can_transition_to(Playing));
        assert!(!Loading.can_transition_to(Playing));
        assert!(!Idle.can_transition_to(Buffering));
    }

    #[test]
    fn test_errored_is_terminal() {
        use PlaybackStatus::*;
        for state in [Idle, Loading, Playing, Paused, Buffering, Seeking] {
            assert!(state.can_transition_to(Errored));
            assert!(!Errored.can_transition_to(state));
        }
        assert!(!Errored.can_transition_to(Errored));
    }

    #[test]
    fn test_quality_label() {
        assert_eq!(quality_label(240), "360p");
        assert_eq!(quality_label(360), "360p");
        assert_eq!(quality_label(480), "480p");
        assert_eq!(quality_label(720), "720p");
        assert_eq!(quality_label(1080), "1080p");
        assert_eq!(quality_label(2160), "native");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(65.4), "1:05");
        assert_eq!(format_time(3725.0), "1:02:05");
        assert_eq!(format_time(-3.0), "0:00");
        assert_eq!(format_time(f64::NAN), "0:00");
    }
}
