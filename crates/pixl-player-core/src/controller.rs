//! Playback controller - the transport state machine
//!
//! ```text
//!  Idle ──attach──▶ Loading ──first frame──▶ Paused ◀──pause── Playing
//!                                              │  └────play────▶  │
//!                                              └──seek──▶ Seeking ◀┘
//!                                         (settle restores the prior state)
//!  any ──stall──▶ Buffering ──resume──▶ Playing, if playing was intended
//!                                      └──▶ Paused otherwise
//!  any ──fatal──▶ Errored (terminal)
//! ```
//!
//! The controller is the only writer of [`PlaybackState`]. Engagement actions
//! queue exactly one [`TelemetryIntent`] each; the owner drains them into a
//! telemetry dispatcher.

use crate::{
    config::{PlayerConfig, ViewPolicy},
    error::{Error, FatalStreamFault, Result},
    stream::{MediaElement, StreamAdapter, StreamSignal},
    telemetry::{TelemetryEventType, TelemetryIntent},
    types::*,
};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Time updates further apart than this are jumps, not playback
const MAX_WATCH_STEP: f64 = 2.0;

/// Notifications from the media element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaEvent {
    /// First frame decoded, duration known
    FirstFrameReady { duration: f64 },
    /// Duration changed (e.g. after a discontinuity)
    DurationChanged { duration: f64 },
    /// Playhead advanced
    TimeUpdate { current_time: f64 },
    /// Seek completed
    SeekSettled,
    /// Enough data buffered to continue after a stall
    CanPlay,
}

/// Stall bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StallStats {
    pub stall_count: u32,
    pub stalled_for: Duration,
}

/// Owns [`PlaybackState`] and the stream adapter
pub struct PlaybackController {
    state: PlaybackState,
    adapter: StreamAdapter,
    levels: LevelList,
    /// Level the engine last confirmed rendering
    rendered_level: Option<usize>,
    fault: Option<FatalStreamFault>,
    /// Status to restore when a seek settles
    seek_return: Option<PlaybackStatus>,
    /// Status to restore when a stall clears
    resume_to: PlaybackStatus,
    stall_started: Option<Instant>,
    stalls: StallStats,
    completion_threshold: f64,
    completion_reported: bool,
    view_policy: ViewPolicy,
    view_reported: bool,
    watched: f64,
    intents: Vec<TelemetryIntent>,
}

impl PlaybackController {
    pub fn new(adapter: StreamAdapter, config: &PlayerConfig) -> Self {
        let mut controller = Self {
            state: PlaybackState::default(),
            adapter,
            levels: Vec::new().into(),
            rendered_level: None,
            fault: None,
            seek_return: None,
            resume_to: PlaybackStatus::Paused,
            stall_started: None,
            stalls: StallStats::default(),
            completion_threshold: config.completion_threshold,
            completion_reported: false,
            view_policy: config.view_policy,
            view_reported: false,
            watched: 0.0,
            intents: Vec::new(),
        };

        if controller.view_policy == ViewPolicy::OnMount {
            controller.report_view();
        }
        controller
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        &self.levels
    }

    /// Last level the engine reported rendering at.
    ///
    /// Only engine `LevelSwitched` confirmations move this. It is `None`
    /// until the first confirmation after a manifest, and a request alone
    /// (manual or `Auto`) leaves the previous confirmation in place.
    pub fn rendered_level(&self) -> Option<usize> {
        self.rendered_level
    }

    pub fn fault(&self) -> Option<&FatalStreamFault> {
        self.fault.as_ref()
    }

    pub fn stall_stats(&self) -> StallStats {
        self.stalls
    }

    /// True while the user wants playback running, even mid-seek or mid-stall
    pub fn is_running(&self) -> bool {
        match self.state.status {
            PlaybackStatus::Playing => true,
            PlaybackStatus::Seeking => self.seek_return == Some(PlaybackStatus::Playing),
            PlaybackStatus::Buffering => self.resume_to == PlaybackStatus::Playing,
            _ => false,
        }
    }

    /// Label reported with telemetry: level label or "auto"
    pub fn quality(&self) -> String {
        match self.state.active_level {
            LevelSelection::Auto => "auto".to_string(),
            LevelSelection::Manual(index) => self
                .levels
                .get(index)
                .map(|l| l.label.clone())
                .unwrap_or_else(|| "auto".to_string()),
        }
    }

    /// Take the telemetry intents queued since the last call
    pub fn drain_intents(&mut self) -> Vec<TelemetryIntent> {
        std::mem::take(&mut self.intents)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Attach the stream and start loading
    #[instrument(skip(self, media), fields(media = media.id()))]
    pub fn attach(&mut self, media: MediaElement, manifest_url: Url) -> Result<()> {
        self.ensure_live()?;
        if self.state.status != PlaybackStatus::Idle {
            return Err(Error::AlreadyAttached);
        }
        self.adapter.attach(media, manifest_url)?;
        self.transition(PlaybackStatus::Loading);
        Ok(())
    }

    /// Release the stream. The controller keeps its last state.
    pub fn detach(&mut self) -> Option<MediaElement> {
        self.adapter.detach()
    }

    /// Wait for the next stream signal and apply it.
    ///
    /// Returns `None` once the stream is detached or the engine has gone away.
    pub async fn pump(&mut self) -> Option<PlaybackStatus> {
        let signal = self.adapter.next_signal().await?;
        self.apply_signal(signal);
        Some(self.state.status)
    }

    /// Apply every stream signal that is already queued
    pub fn pump_ready(&mut self) -> usize {
        let mut applied = 0;
        while let Some(signal) = self.adapter.try_next_signal() {
            self.apply_signal(signal);
            applied += 1;
        }
        applied
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        self.ensure_live()?;
        match self.state.status {
            PlaybackStatus::Paused => {
                self.transition(PlaybackStatus::Playing);
                self.emit(TelemetryEventType::Play);
            }
            PlaybackStatus::Seeking if self.seek_return != Some(PlaybackStatus::Playing) => {
                self.seek_return = Some(PlaybackStatus::Playing);
                self.emit(TelemetryEventType::Play);
            }
            PlaybackStatus::Buffering if self.resume_to != PlaybackStatus::Playing => {
                self.resume_to = PlaybackStatus::Playing;
                self.emit(TelemetryEventType::Play);
            }
            PlaybackStatus::Idle | PlaybackStatus::Loading => {
                warn!(state = %self.state.status, "Cannot play before the first frame");
            }
            _ => debug!(state = %self.state.status, "Already playing"),
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.ensure_live()?;
        match self.state.status {
            PlaybackStatus::Playing => {
                self.transition(PlaybackStatus::Paused);
                self.emit(TelemetryEventType::Pause);
            }
            PlaybackStatus::Seeking if self.seek_return == Some(PlaybackStatus::Playing) => {
                self.seek_return = Some(PlaybackStatus::Paused);
                self.emit(TelemetryEventType::Pause);
            }
            PlaybackStatus::Buffering if self.resume_to == PlaybackStatus::Playing => {
                self.resume_to = PlaybackStatus::Paused;
                self.emit(TelemetryEventType::Pause);
            }
            _ => debug!(state = %self.state.status, "Nothing to pause"),
        }
        Ok(())
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        if self.is_running() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Seek to `time`, clamped to `[0, duration]`
    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.ensure_live()?;
        if time.is_nan() {
            return Err(Error::InvalidArgument("seek target is NaN".into()));
        }

        let status = self.state.status;
        match status {
            PlaybackStatus::Idle | PlaybackStatus::Loading | PlaybackStatus::Errored => {
                warn!(state = %status, "Cannot seek without media");
                return Ok(());
            }
            PlaybackStatus::Playing | PlaybackStatus::Paused => {
                self.seek_return = Some(status);
                self.transition(PlaybackStatus::Seeking);
            }
            // Retarget; keep the state to restore
            PlaybackStatus::Seeking | PlaybackStatus::Buffering => {}
        }

        let target = time.clamp(0.0, self.state.duration.max(0.0));
        info!(from = self.state.current_time, to = target, "Seeking");
        self.state.current_time = target;
        self.emit(TelemetryEventType::Seek);
        self.check_completion();
        Ok(())
    }

    /// Relative seek, same clamping as [`seek`](Self::seek)
    pub fn skip_by(&mut self, delta: f64) -> Result<()> {
        self.seek(self.state.current_time + delta)
    }

    /// Set volume, clamped to `[0, 1]`. Zero mutes, anything else unmutes.
    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.ensure_live()?;
        if volume.is_nan() {
            return Err(Error::InvalidArgument("volume is NaN".into()));
        }
        self.state.volume = volume.clamp(0.0, 1.0);
        self.state.muted = self.state.volume == 0.0;
        debug!(volume = self.state.volume, muted = self.state.muted, "Volume set");
        Ok(())
    }

    pub fn adjust_volume(&mut self, delta: f64) -> Result<()> {
        self.set_volume(self.state.volume + delta)
    }

    pub fn toggle_mute(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.state.muted = !self.state.muted;
        debug!(muted = self.state.muted, "Mute toggled");
        Ok(())
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        self.ensure_live()?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "playback rate must be positive, got {}",
                rate
            )));
        }
        self.state.playback_rate = rate;
        debug!(rate, "Playback rate set");
        Ok(())
    }

    /// Request a level from the stream and record it as active.
    ///
    /// The switch itself is asynchronous; see [`rendered_level`](Self::rendered_level).
    pub fn set_level(&mut self, selection: LevelSelection) -> Result<()> {
        self.ensure_live()?;
        if selection == self.state.active_level {
            debug!(%selection, "Level already active");
            return Ok(());
        }

        self.adapter.set_level(selection)?;
        self.state.active_level = selection;
        info!(%selection, quality = %self.quality(), "Level changed");
        self.emit(TelemetryEventType::QualityChange);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inbound events
    // ---------------------------------------------------------------------

    /// Apply a stream signal. Ignored once errored.
    pub fn apply_signal(&mut self, signal: StreamSignal) {
        if self.state.status == PlaybackStatus::Errored {
            debug!(?signal, "Ignoring stream signal after fatal fault");
            return;
        }

        match signal {
            StreamSignal::LevelsReady(levels) => {
                if let LevelSelection::Manual(index) = self.state.active_level {
                    if index >= levels.len() {
                        warn!(index, "Active level missing from new manifest, back to auto");
                        self.state.active_level = LevelSelection::Auto;
                    }
                }
                self.levels = levels;
                self.rendered_level = None;
            }
            StreamSignal::LevelSwitched(index) => {
                debug!(index, "Engine switched level");
                self.rendered_level = Some(index);
            }
            StreamSignal::Stalled => self.on_stall(),
            StreamSignal::Fatal(fault) => self.on_fatal(fault),
        }
    }

    /// Apply a media element notification. Ignored once errored.
    pub fn on_media_event(&mut self, event: MediaEvent) {
        let status = self.state.status;
        if status == PlaybackStatus::Errored {
            debug!(?event, "Ignoring media event after fatal fault");
            return;
        }

        match event {
            MediaEvent::FirstFrameReady { duration } => {
                self.set_duration(duration);
                if status == PlaybackStatus::Loading {
                    self.transition(PlaybackStatus::Paused);
                }
            }
            MediaEvent::DurationChanged { duration } => self.set_duration(duration),
            MediaEvent::TimeUpdate { current_time } => self.on_time_update(current_time),
            MediaEvent::SeekSettled => {
                if status == PlaybackStatus::Seeking {
                    let target = self.seek_return.take().unwrap_or(PlaybackStatus::Paused);
                    self.transition(target);
                }
            }
            MediaEvent::CanPlay => {
                if status == PlaybackStatus::Buffering {
                    if let Some(started) = self.stall_started.take() {
                        self.stalls.stalled_for += started.elapsed();
                    }
                    self.transition(self.resume_to);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn ensure_live(&self) -> Result<()> {
        match &self.fault {
            Some(fault) => Err(Error::FatalStream(fault.clone())),
            None => Ok(()),
        }
    }

    fn transition(&mut self, to: PlaybackStatus) -> bool {
        let from = self.state.status;
        if !from.can_transition_to(to) {
            warn!(%from, %to, "Rejected state transition");
            return false;
        }
        self.state.status = to;
        info!(%from, %to, "State transition");
        true
    }

    fn emit(&mut self, event_type: TelemetryEventType) {
        let intent = TelemetryIntent::new(event_type, self.state.current_time, self.quality());
        debug!(event_type = %intent.event_type, video_time = intent.video_time, "Telemetry intent");
        self.intents.push(intent);
    }

    fn set_duration(&mut self, duration: f64) {
        if duration.is_finite() && duration >= 0.0 {
            self.state.duration = duration;
            self.state.current_time = self.state.current_time.min(duration);
        } else {
            warn!(duration, "Ignoring unusable duration");
        }
    }

    fn on_time_update(&mut self, current_time: f64) {
        if !self.state.status.has_media() || !current_time.is_finite() {
            return;
        }

        let clamped = if self.state.duration > 0.0 {
            current_time.clamp(0.0, self.state.duration)
        } else {
            current_time.max(0.0)
        };

        let step = clamped - self.state.current_time;
        if self.state.status == PlaybackStatus::Playing && step > 0.0 && step <= MAX_WATCH_STEP {
            self.watched += step;
        }
        self.state.current_time = clamped;

        if let ViewPolicy::AfterWatched { seconds } = self.view_policy {
            if !self.view_reported && self.watched >= seconds {
                self.report_view();
            }
        }
        self.check_completion();
    }

    fn check_completion(&mut self) {
        if !self.completion_reported
            && self.state.duration > 0.0
            && self.state.progress() > self.completion_threshold
        {
            self.completion_reported = true;
            info!(video_time = self.state.current_time, "Playback completed");
            self.emit(TelemetryEventType::Complete);
        }
    }

    fn report_view(&mut self) {
        self.view_reported = true;
        self.emit(TelemetryEventType::View);
    }

    fn on_stall(&mut self) {
        let status = self.state.status;
        if !status.can_transition_to(PlaybackStatus::Buffering) {
            debug!(state = %status, "Stall ignored");
            return;
        }

        self.resume_to = match status {
            PlaybackStatus::Playing => PlaybackStatus::Playing,
            PlaybackStatus::Seeking => self.seek_return.take().unwrap_or(PlaybackStatus::Paused),
            _ => PlaybackStatus::Paused,
        };
        self.stall_started = Some(Instant::now());
        self.stalls.stall_count += 1;
        self.transition(PlaybackStatus::Buffering);
        self.emit(TelemetryEventType::Buffer);
    }

    fn on_fatal(&mut self, fault: FatalStreamFault) {
        warn!(details = %fault.details, message = %fault.message, "Playback errored");
        self.transition(PlaybackStatus::Errored);
        self.fault = Some(fault);
        self.seek_return = None;
        self.stall_started = None;
    }
}
