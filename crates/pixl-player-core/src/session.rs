//! Player Session - per-mount orchestrator
//!
//! Coordinates:
//! - Stream attachment and stream signals
//! - Playback commands and media notifications
//! - Keyboard and pointer gestures
//! - Scrub-preview cues
//! - Engagement telemetry
//!
//! Every mutation goes through the session, which forwards the controller's
//! telemetry intents to the dispatcher and publishes the new state.

use crate::{
    config::PlayerConfig,
    controller::{MediaEvent, PlaybackController, StallStats},
    cue_index::CueIndex,
    input::{scrub_preview, Command, InputSurface, KeyEvent, ScrubPreview},
    stream::{MediaElement, StreamAdapter, StreamEngine},
    telemetry::{DispatchStats, TelemetryDispatcher, TelemetrySink},
    types::*,
    Error, Result,
};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// One mounted player for one video
pub struct PlayerSession {
    video_id: String,
    config: PlayerConfig,
    controller: PlaybackController,
    input: InputSurface,
    dispatcher: TelemetryDispatcher,
    cues: CueIndex,
    /// HTTP client for cue documents
    client: Client,
    state_tx: watch::Sender<PlaybackState>,
    torn_down: bool,
}

impl PlayerSession {
    /// Create a session. Must be called from within a tokio runtime.
    pub fn new(
        video_id: impl Into<String>,
        config: PlayerConfig,
        engine: Box<dyn StreamEngine>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        config.validate()?;
        let video_id = video_id.into();
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        let controller = PlaybackController::new(StreamAdapter::new(engine), &config);
        let dispatcher = TelemetryDispatcher::new(video_id.clone(), &config, sink);
        let (state_tx, _) = watch::channel(controller.state().clone());

        let mut session = Self {
            input: InputSurface::new(&config),
            video_id,
            config,
            controller,
            dispatcher,
            cues: CueIndex::default(),
            client,
            state_tx,
            torn_down: false,
        };
        // Flush the mount-time view, if the policy emits one
        session.flush();

        info!(
            video_id = %session.video_id,
            session_id = %session.dispatcher.session_id(),
            "Player session created"
        );
        Ok(session)
    }

    /// Session backed by the bundled HLS engine and HTTP telemetry
    #[cfg(feature = "hls")]
    pub fn with_http(video_id: impl Into<String>, config: PlayerConfig) -> Result<Self> {
        let engine = crate::stream::HlsEngine::new(config.request_timeout())?;
        let sink = crate::telemetry::HttpTelemetrySink::from_config(&config)?;
        Self::new(video_id, config, Box::new(engine), Arc::new(sink))
    }

    // ---------------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------------

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn session_id(&self) -> &str {
        self.dispatcher.session_id()
    }

    pub fn state(&self) -> &PlaybackState {
        self.controller.state()
    }

    /// Subscribe to state changes
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub fn levels(&self) -> &[LevelDescriptor] {
        self.controller.levels()
    }

    pub fn quality(&self) -> String {
        self.controller.quality()
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn input(&self) -> &InputSurface {
        &self.input
    }

    pub fn cues(&self) -> &CueIndex {
        &self.cues
    }

    pub fn stall_stats(&self) -> StallStats {
        self.controller.stall_stats()
    }

    pub fn telemetry_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Attach `media` to this video's manifest
    #[instrument(skip(self, media), fields(video_id = %self.video_id))]
    pub fn attach(&mut self, media: MediaElement) -> Result<()> {
        if self.torn_down {
            return Err(Error::SessionClosed);
        }
        let url = self.config.manifest_url(&self.video_id)?;
        let result = self.controller.attach(media, url);
        self.flush();
        result
    }

    /// Install an already parsed cue index
    pub fn load_cues(&mut self, cues: CueIndex) {
        debug!(cues = cues.len(), skipped = cues.skipped(), "Cue index installed");
        self.cues = cues;
    }

    /// Fetch this video's cue document.
    ///
    /// Failures leave scrub previews disabled; playback is unaffected.
    #[instrument(skip(self), fields(video_id = %self.video_id))]
    pub async fn fetch_cues(&mut self) -> Result<usize> {
        let url = self.config.cue_document_url(&self.video_id)?;
        match CueIndex::fetch(&self.client, &url).await {
            Ok(cues) => {
                let count = cues.len();
                self.load_cues(cues);
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, "Cue document unavailable, previews disabled");
                self.cues = CueIndex::default();
                Err(e)
            }
        }
    }

    /// Wait for one stream signal and apply it. `None` once the stream ends.
    pub async fn pump(&mut self) -> Option<PlaybackStatus> {
        if self.torn_down {
            return None;
        }
        let status = self.controller.pump().await;
        self.flush();
        status
    }

    /// Apply every stream signal already queued
    pub fn pump_ready(&mut self) -> usize {
        if self.torn_down {
            return 0;
        }
        let applied = self.controller.pump_ready();
        self.flush();
        applied
    }

    /// Media element notification. Ignored once torn down.
    pub fn on_media_event(&mut self, event: MediaEvent) {
        if self.torn_down {
            return;
        }
        self.controller.on_media_event(event);
        self.flush();
    }

    /// Release the stream, cancel timers and close telemetry.
    ///
    /// Terminal: afterwards commands fail with [`Error::SessionClosed`] and
    /// notifications are ignored. Idempotent. In-flight telemetry deliveries finish on their own.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.flush();
        self.input.cancel_hide();
        self.controller.detach();
        self.dispatcher.shutdown();
        info!(video_id = %self.video_id, "Player session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    pub fn play(&mut self) -> Result<()> {
        self.command(|c, _| c.play())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.command(|c, _| c.pause())
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        self.command(|c, _| c.toggle_play())
    }

    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.command(|c, _| c.seek(time))
    }

    pub fn skip_by(&mut self, delta: f64) -> Result<()> {
        self.command(|c, _| c.skip_by(delta))
    }

    pub fn set_volume(&mut self, volume: f64) -> Result<()> {
        self.command(|c, _| c.set_volume(volume))
    }

    pub fn adjust_volume(&mut self, delta: f64) -> Result<()> {
        self.command(|c, _| c.adjust_volume(delta))
    }

    pub fn toggle_mute(&mut self) -> Result<()> {
        self.command(|c, _| c.toggle_mute())
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        self.command(|c, _| c.set_playback_rate(rate))
    }

    pub fn set_level(&mut self, selection: LevelSelection) -> Result<()> {
        self.command(|c, _| c.set_level(selection))
    }

    // ---------------------------------------------------------------------
    // Gestures
    // ---------------------------------------------------------------------

    pub fn handle_key(&mut self, event: KeyEvent) -> Result<Option<Command>> {
        self.command(|c, input| input.handle_key(event, c))
    }

    /// Pointer over the seek bar at `fraction` of its width
    pub fn hover(&self, fraction: f64) -> Option<ScrubPreview> {
        scrub_preview(fraction, self.controller.state().duration, &self.cues)
    }

    /// Click on the seek bar at `fraction` of its width
    pub fn click_seek_bar(&mut self, fraction: f64) -> Result<()> {
        self.command(|c, input| input.seek_to_fraction(fraction, c))
    }

    /// Pointer moved anywhere over the player
    pub fn pointer_moved(&mut self) {
        if self.torn_down {
            return;
        }
        self.input.pointer_activity(self.controller.status());
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Run a controller or gesture command, then flush. Rejected once torn down.
    fn command<T>(
        &mut self,
        run: impl FnOnce(&mut PlaybackController, &mut InputSurface) -> Result<T>,
    ) -> Result<T> {
        if self.torn_down {
            debug!(video_id = %self.video_id, "Command after teardown rejected");
            return Err(Error::SessionClosed);
        }
        let result = run(&mut self.controller, &mut self.input);
        self.flush();
        result
    }

    /// Forward queued intents and publish state
    fn flush(&mut self) {
        for intent in self.controller.drain_intents() {
            self.dispatcher.track(intent);
        }
        self.state_tx.send_if_modified(|current| {
            if current != self.controller.state() {
                *current = self.controller.state().clone();
                true
            } else {
                false
            }
        });
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewPolicy;
    use crate::input::Key;
    use crate::stream::{EngineEvent, EngineLevel, ExternalEngine, ExternalEngineHandle};
    use crate::telemetry::{ChannelSink, TelemetryEvent, TelemetryEventType};
    use tokio::sync::mpsc;

    fn session(config: PlayerConfig) -> (PlayerSession, ExternalEngineHandle, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (engine, handle) = ExternalEngine::new();
        let (sink, rx) = ChannelSink::new();
        let session = PlayerSession::new("v1", config, Box::new(engine), Arc::new(sink)).unwrap();
        (session, handle, rx)
    }

    #[tokio::test]
    async fn test_session_creation() {
        let (session, _handle, _rx) = session(PlayerConfig::default());
        assert_eq!(session.video_id(), "v1");
        assert!(session.session_id().starts_with("session-"));
        assert_eq!(session.state().status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_attach_uses_manifest_endpoint() {
        let (mut session, handle, _rx) = session(PlayerConfig::default());
        session.attach(MediaElement::new("video")).unwrap();
        assert_eq!(
            handle.manifest_url().unwrap().as_str(),
            "http://localhost:8080/api/videos/v1/stream/master.m3u8"
        );
        assert_eq!(session.state().status, PlaybackStatus::Loading);
    }

    #[tokio::test]
    async fn test_state_published() {
        let (mut session, handle, _rx) = session(PlayerConfig::default());
        let mut states = session.subscribe_state();

        session.attach(MediaElement::new("video")).unwrap();
        assert!(states.has_changed().unwrap());
        assert_eq!(states.borrow_and_update().status, PlaybackStatus::Loading);

        handle.emit(EngineEvent::ManifestParsed {
            levels: vec![EngineLevel { width: 1280, height: 720, bitrate: 2_800_000 }],
        });
        assert_eq!(session.pump().await, Some(PlaybackStatus::Loading));
        assert_eq!(session.levels().len(), 1);
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_view_on_mount_delivered() {
        let (mut session, _handle, mut rx) = session(PlayerConfig::default());
        session.teardown();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, TelemetryEventType::View);
        assert_eq!(event.video_id, "v1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let config = PlayerConfig {
            view_policy: ViewPolicy::AfterWatched { seconds: 10.0 },
            ..Default::default()
        };
        let (mut session, handle, mut rx) = session(config);
        session.attach(MediaElement::new("video")).unwrap();
        session.on_media_event(MediaEvent::FirstFrameReady { duration: 60.0 });
        session.play().unwrap();
        session.pointer_moved();

        session.teardown();
        session.teardown();
        assert!(handle.is_destroyed());
        assert!(session.is_torn_down());

        let mut delivered = Vec::new();
        while let Some(event) = rx.recv().await {
            delivered.push(event.event_type);
        }
        assert_eq!(delivered, [TelemetryEventType::Play]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_teardown_rejected() {
        let (mut session, handle, mut rx) = session(PlayerConfig {
            view_policy: ViewPolicy::AfterWatched { seconds: 10.0 },
            ..Default::default()
        });
        session.attach(MediaElement::new("video")).unwrap();
        session.on_media_event(MediaEvent::FirstFrameReady { duration: 60.0 });
        session.teardown();
        let frozen = session.state().clone();

        assert!(matches!(session.handle_key(KeyEvent::new(Key::Space)), Err(Error::SessionClosed)));
        assert!(matches!(session.play(), Err(Error::SessionClosed)));
        assert!(session.seek(30.0).is_err());
        assert!(session.click_seek_bar(0.5).is_err());
        assert!(session.set_volume(0.0).is_err());
        assert!(session.attach(MediaElement::new("again")).is_err());
        session.on_media_event(MediaEvent::TimeUpdate { current_time: 59.0 });
        session.pointer_moved();
        assert_eq!(session.pump_ready(), 0);
        assert_eq!(session.pump().await, None);

        assert_eq!(session.state(), &frozen);
        assert_eq!(handle.load_count(), 1);

        // No timer was started after teardown
        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        assert!(session.input().controls_visible());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let (mut session, handle, _rx) = session(PlayerConfig::default());
        session.attach(MediaElement::new("video")).unwrap();
        drop(session);
        assert!(handle.is_destroyed());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = PlayerConfig {
            completion_threshold: 1.5,
            ..Default::default()
        };
        let (engine, _handle) = ExternalEngine::new();
        let (sink, _rx) = ChannelSink::new();
        assert!(PlayerSession::new("v1", config, Box::new(engine), Arc::new(sink)).is_err());
    }
}
