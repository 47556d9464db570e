//! Keyboard and pointer surface
//!
//! Gestures map to commands through a static table ([`KEY_BINDINGS`]) so the
//! bindings can be listed and tested without a UI. The surface also owns the
//! purely presentational toggles (fullscreen, shortcut overlay) and the
//! controls auto-hide timer.

use crate::{
    config::PlayerConfig,
    controller::PlaybackController,
    cue_index::{CueIndex, SpriteRegion},
    error::Result,
    types::{format_time, PlaybackStatus},
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// A key as the surface sees it, already normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Space,
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    /// Lowercase letter or symbol
    Char(char),
    Digit(u8),
}

impl Key {
    /// Normalize a DOM `KeyboardEvent.key` value
    pub fn from_dom_key(key: &str) -> Option<Key> {
        match key {
            " " | "Spacebar" => Some(Key::Space),
            "ArrowLeft" | "Left" => Some(Key::ArrowLeft),
            "ArrowRight" | "Right" => Some(Key::ArrowRight),
            "ArrowUp" | "Up" => Some(Key::ArrowUp),
            "ArrowDown" | "Down" => Some(Key::ArrowDown),
            _ => {
                let mut chars = key.chars();
                let (c, None) = (chars.next()?, chars.next()) else {
                    return None;
                };
                match c.to_digit(10) {
                    Some(d) => Some(Key::Digit(d as u8)),
                    None => Some(Key::Char(c.to_ascii_lowercase())),
                }
            }
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Space => write!(f, "Space"),
            Key::ArrowLeft => write!(f, "←"),
            Key::ArrowRight => write!(f, "→"),
            Key::ArrowUp => write!(f, "↑"),
            Key::ArrowDown => write!(f, "↓"),
            Key::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            Key::Digit(d) => write!(f, "{}", d),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub fn any(&self) -> bool {
        self.ctrl || self.alt || self.meta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    /// Focus is inside a text input, textarea or contenteditable
    pub in_text_entry: bool,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            in_text_entry: false,
            modifiers: Modifiers::default(),
        }
    }

    pub fn in_text_entry(mut self) -> Self {
        self.in_text_entry = true;
        self
    }
}

/// What a gesture asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    TogglePlay,
    SkipBackward,
    SkipForward,
    VolumeUp,
    VolumeDown,
    ToggleMute,
    ToggleFullscreen,
    ToggleShortcutOverlay,
    /// Seek to `duration * n / 10`
    SeekToTenth(u8),
}

impl Command {
    pub fn description(&self) -> String {
        match self {
            Command::TogglePlay => "Play / pause".to_string(),
            Command::SkipBackward => "Skip backward".to_string(),
            Command::SkipForward => "Skip forward".to_string(),
            Command::VolumeUp => "Volume up".to_string(),
            Command::VolumeDown => "Volume down".to_string(),
            Command::ToggleMute => "Mute / unmute".to_string(),
            Command::ToggleFullscreen => "Toggle fullscreen".to_string(),
            Command::ToggleShortcutOverlay => "Show / hide shortcuts".to_string(),
            Command::SeekToTenth(n) => format!("Seek to {}%", u32::from(*n) * 10),
        }
    }

    /// Commands that drive the controller rather than the chrome
    pub fn is_transport(&self) -> bool {
        !matches!(self, Command::ToggleFullscreen | Command::ToggleShortcutOverlay)
    }
}

/// The gesture table
pub static KEY_BINDINGS: &[(Key, Command)] = &[
    (Key::Space, Command::TogglePlay),
    (Key::Char('k'), Command::TogglePlay),
    (Key::ArrowLeft, Command::SkipBackward),
    (Key::Char('j'), Command::SkipBackward),
    (Key::ArrowRight, Command::SkipForward),
    (Key::Char('l'), Command::SkipForward),
    (Key::ArrowUp, Command::VolumeUp),
    (Key::ArrowDown, Command::VolumeDown),
    (Key::Char('m'), Command::ToggleMute),
    (Key::Char('f'), Command::ToggleFullscreen),
    (Key::Char('h'), Command::ToggleShortcutOverlay),
    (Key::Digit(0), Command::SeekToTenth(0)),
    (Key::Digit(1), Command::SeekToTenth(1)),
    (Key::Digit(2), Command::SeekToTenth(2)),
    (Key::Digit(3), Command::SeekToTenth(3)),
    (Key::Digit(4), Command::SeekToTenth(4)),
    (Key::Digit(5), Command::SeekToTenth(5)),
    (Key::Digit(6), Command::SeekToTenth(6)),
    (Key::Digit(7), Command::SeekToTenth(7)),
    (Key::Digit(8), Command::SeekToTenth(8)),
    (Key::Digit(9), Command::SeekToTenth(9)),
];

pub fn command_for(key: Key) -> Option<Command> {
    KEY_BINDINGS
        .iter()
        .find(|(bound, _)| *bound == key)
        .map(|(_, command)| *command)
}

/// Thumbnail to show over the seek bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrubPreview {
    pub time: f64,
    /// Formatted `time`
    pub label: String,
    pub sheet_url: String,
    pub region: SpriteRegion,
}

/// Preview for a pointer at `fraction` of the seek bar. `None` means no
/// thumbnail covers that time.
pub fn scrub_preview(fraction: f64, duration: f64, cues: &CueIndex) -> Option<ScrubPreview> {
    if !(fraction.is_finite() && duration.is_finite() && duration > 0.0) {
        return None;
    }
    let time = fraction.clamp(0.0, 1.0) * duration;
    let cue = cues.lookup(time)?;
    Some(ScrubPreview {
        time,
        label: format_time(time),
        sheet_url: cue.sheet_url.clone(),
        region: cue.region,
    })
}

/// Gesture dispatch plus UI chrome state
pub struct InputSurface {
    skip_seconds: f64,
    volume_step: f64,
    hide_delay: Duration,
    fullscreen: bool,
    shortcut_overlay: bool,
    controls_visible: Arc<AtomicBool>,
    hide_timer: Option<JoinHandle<()>>,
}

impl InputSurface {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            skip_seconds: config.skip_seconds,
            volume_step: config.volume_step,
            hide_delay: config.controls_hide_delay(),
            fullscreen: false,
            shortcut_overlay: false,
            controls_visible: Arc::new(AtomicBool::new(true)),
            hide_timer: None,
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn shortcut_overlay_visible(&self) -> bool {
        self.shortcut_overlay
    }

    pub fn controls_visible(&self) -> bool {
        self.controls_visible.load(Ordering::Acquire)
    }

    /// Handle a key press. Returns the command that ran, or `None` when the
    /// event was not for the player.
    pub fn handle_key(&mut self, event: KeyEvent, controller: &mut PlaybackController) -> Result<Option<Command>> {
        if event.in_text_entry {
            trace!(key = %event.key, "Key ignored, text entry focused");
            return Ok(None);
        }
        if event.modifiers.any() {
            trace!(key = %event.key, "Key ignored, modifier held");
            return Ok(None);
        }
        let Some(command) = command_for(event.key) else {
            return Ok(None);
        };

        self.execute(command, controller)?;
        Ok(Some(command))
    }

    /// Run a command against the controller or the chrome
    pub fn execute(&mut self, command: Command, controller: &mut PlaybackController) -> Result<()> {
        debug!(?command, "Executing command");
        match command {
            Command::TogglePlay => controller.toggle_play()?,
            Command::SkipBackward => controller.skip_by(-self.skip_seconds)?,
            Command::SkipForward => controller.skip_by(self.skip_seconds)?,
            Command::VolumeUp => controller.adjust_volume(self.volume_step)?,
            Command::VolumeDown => controller.adjust_volume(-self.volume_step)?,
            Command::ToggleMute => controller.toggle_mute()?,
            Command::ToggleFullscreen => self.fullscreen = !self.fullscreen,
            Command::ToggleShortcutOverlay => self.shortcut_overlay = !self.shortcut_overlay,
            Command::SeekToTenth(n) => {
                let duration = controller.state().duration;
                controller.seek(duration * f64::from(n) / 10.0)?
            }
        }

        if command.is_transport() {
            self.pointer_activity(controller.status());
        }
        Ok(())
    }

    /// Seek-bar click at `fraction` of its width
    pub fn seek_to_fraction(&mut self, fraction: f64, controller: &mut PlaybackController) -> Result<()> {
        let duration = controller.state().duration;
        controller.seek(fraction.clamp(0.0, 1.0) * duration)
    }

    /// Show the controls and, while playing, schedule them to hide again.
    ///
    /// Must be called from within a tokio runtime.
    pub fn pointer_activity(&mut self, status: PlaybackStatus) {
        self.cancel_hide();
        self.controls_visible.store(true, Ordering::Release);

        if status != PlaybackStatus::Playing {
            return;
        }

        let visible = self.controls_visible.clone();
        let delay = self.hide_delay;
        self.hide_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            visible.store(false, Ordering::Release);
            trace!("Controls hidden");
        }));
    }

    /// Cancel a pending auto-hide
    pub fn cancel_hide(&mut self) {
        if let Some(timer) = self.hide_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for InputSurface {
    fn drop(&mut self) {
        self.cancel_hide();
    }
}
