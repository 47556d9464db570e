//! Integration tests for Pixl Player Core

use pixl_player_core::{
    ChannelSink, CueIndex, EngineEvent, EngineLevel, Error, ExternalEngine, ExternalEngineHandle,
    Key, KeyEvent, LevelSelection, MediaElement, MediaEvent, PlaybackStatus, PlayerConfig,
    PlayerSession, TelemetryDispatcher, TelemetryEvent, TelemetryEventType, TelemetryIntent,
    TelemetrySink, ViewPolicy,
};
use std::sync::Arc;
use tokio::sync::mpsc;

const TWO_CUES: &str = "WEBVTT

00:00:00.000 --> 00:00:05.000
sheet.jpg#10,10,160,90

00:00:05.000 --> 00:00:10.000
sheet.jpg#170,10,160,90
";

fn quiet_config() -> PlayerConfig {
    PlayerConfig {
        view_policy: ViewPolicy::AfterWatched { seconds: 60.0 },
        ..Default::default()
    }
}

fn new_session(
    config: PlayerConfig,
) -> (PlayerSession, ExternalEngineHandle, mpsc::UnboundedReceiver<TelemetryEvent>) {
    let (engine, handle) = ExternalEngine::new();
    let (sink, rx) = ChannelSink::new();
    let session = PlayerSession::new("video-42", config, Box::new(engine), Arc::new(sink)).unwrap();
    (session, handle, rx)
}

/// Attach, parse a three-level manifest and decode the first frame
fn playable(config: PlayerConfig, duration: f64) -> (PlayerSession, ExternalEngineHandle, mpsc::UnboundedReceiver<TelemetryEvent>) {
    let (mut session, handle, rx) = new_session(config);
    session.attach(MediaElement::new("video")).unwrap();
    handle.emit(EngineEvent::ManifestParsed {
        levels: vec![
            EngineLevel { width: 640, height: 360, bitrate: 800_000 },
            EngineLevel { width: 1280, height: 720, bitrate: 2_800_000 },
            EngineLevel { width: 1920, height: 1080, bitrate: 5_000_000 },
        ],
    });
    session.pump_ready();
    session.on_media_event(MediaEvent::FirstFrameReady { duration });
    (session, handle, rx)
}

/// Tear down and collect everything the sink received
async fn delivered(mut session: PlayerSession, mut rx: mpsc::UnboundedReceiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
    session.teardown();
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// =============================================================================
// Cue Index Tests
// =============================================================================

#[test]
fn test_two_cue_scenario() {
    let index = CueIndex::parse(TWO_CUES);
    assert_eq!(index.len(), 2);

    let first = index.lookup(3.0).unwrap();
    assert_eq!((first.region.x, first.region.y), (10, 10));
    assert_eq!(first.sheet_url, "sheet.jpg");

    let second = index.lookup(7.0).unwrap();
    assert_eq!(second.region.x, 170);

    assert!(index.lookup(12.0).is_none());
}

#[test]
fn test_cues_ordered_and_lookup_exact() {
    let doc = "WEBVTT

00:00:20.000 --> 00:00:30.000
s.jpg#0,90,160,90

00:00:00.000 --> 00:00:10.000
s.jpg#0,0,160,90

00:00:10.000 --> 00:00:15.000
s.jpg#160,0,160,90
";
    let index = CueIndex::parse(doc);
    assert!(index.cues().windows(2).all(|w| w[0].start <= w[1].start));

    for t in [0.0, 4.99, 10.0, 14.5, 20.0, 29.9] {
        let cue = index.lookup(t).unwrap();
        assert!(cue.start <= t && t < cue.end);
    }
    // Gap between 15 and 20, before start, past end
    assert!(index.lookup(17.0).is_none());
    assert!(index.lookup(-1.0).is_none());
    assert!(index.lookup(30.0).is_none());
}

#[test]
fn test_malformed_cues_skipped() {
    let doc = "WEBVTT

00:00:00.000 --> 00:00:05.000
sheet.jpg#0,0,160,90

garbage --> also garbage
sheet.jpg#160,0,160,90

00:00:10.000 --> 00:00:15.000
sheet.jpg#320,0,160,90
";
    let (index, errors) = CueIndex::parse_with_errors(doc);
    assert_eq!(index.len(), 2);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::CueParse { line: 6, .. }));
}

#[tokio::test]
async fn test_session_scrub_preview() {
    let (mut session, _handle, _rx) = playable(quiet_config(), 10.0);
    assert!(session.hover(0.3).is_none());

    session.load_cues(CueIndex::parse(TWO_CUES));
    let preview = session.hover(0.7).unwrap();
    assert_eq!(preview.region.x, 170);
    assert_eq!(preview.label, "0:07");
    // Cue ends are exclusive
    assert!(session.hover(1.5).is_none());
}

// =============================================================================
// Playback Controller Tests
// =============================================================================

#[tokio::test]
async fn test_seek_clamping() {
    let (mut session, _handle, _rx) = playable(quiet_config(), 100.0);

    session.seek(-5.0).unwrap();
    assert_eq!(session.state().current_time, 0.0);

    session.seek(200.0).unwrap();
    assert_eq!(session.state().current_time, 100.0);
}

#[tokio::test]
async fn test_skip_back_clamps_to_zero() {
    let (mut session, _handle, _rx) = playable(quiet_config(), 100.0);
    session.seek(2.0).unwrap();
    session.on_media_event(MediaEvent::SeekSettled);
    assert_eq!(session.state().current_time, 2.0);

    session.skip_by(-1000.0).unwrap();
    assert_eq!(session.state().current_time, 0.0);
}

#[tokio::test]
async fn test_fatal_fault_is_terminal() {
    let (mut session, handle, _rx) = playable(quiet_config(), 100.0);
    session.play().unwrap();

    handle.emit(EngineEvent::Error {
        details: "bufferAppendError".into(),
        message: "decoder rejected segment".into(),
        fatal: true,
    });
    assert_eq!(session.pump().await, Some(PlaybackStatus::Errored));
    let frozen = session.state().clone();

    assert!(matches!(session.play(), Err(Error::FatalStream(_))));
    assert!(session.seek(10.0).is_err());
    assert!(session.set_level(LevelSelection::Manual(1)).is_err());
    assert!(session.handle_key(KeyEvent::new(Key::Space)).is_err());

    assert_eq!(session.state(), &frozen);
    assert_eq!(handle.requested_level(), None);
}

#[tokio::test]
async fn test_stall_during_playback() {
    let (mut session, handle, _rx) = playable(quiet_config(), 100.0);
    session.play().unwrap();

    handle.emit(EngineEvent::Error {
        details: "bufferStalledError".into(),
        message: "buffer empty".into(),
        fatal: false,
    });
    assert_eq!(session.pump().await, Some(PlaybackStatus::Buffering));

    session.on_media_event(MediaEvent::CanPlay);
    assert_eq!(session.state().status, PlaybackStatus::Playing);
    assert_eq!(session.stall_stats().stall_count, 1);
}

// =============================================================================
// Telemetry Tests
// =============================================================================

#[tokio::test]
async fn test_quality_change_scenario() {
    let (mut session, handle, rx) = playable(quiet_config(), 100.0);
    assert_eq!(session.levels().len(), 3);

    session.set_level(LevelSelection::Manual(1)).unwrap();
    assert_eq!(session.state().active_level, LevelSelection::Manual(1));
    assert_eq!(handle.requested_level(), Some(Some(1)));

    let events = delivered(session, rx).await;
    let changes: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == TelemetryEventType::QualityChange)
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].quality, "720p");
    assert_eq!(changes[0].video_id, "video-42");
}

#[tokio::test]
async fn test_ten_plays_one_event() {
    let (mut session, _handle, rx) = playable(quiet_config(), 100.0);

    for _ in 0..10 {
        session.toggle_play().unwrap();
        session.toggle_play().unwrap();
    }
    let events = delivered(session, rx).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, TelemetryEventType::Play);
}

#[tokio::test]
async fn test_complete_never_rate_limited() {
    let (mut session, _handle, rx) = playable(quiet_config(), 100.0);
    session.play().unwrap();
    session.on_media_event(MediaEvent::TimeUpdate { current_time: 95.0 });

    let events = delivered(session, rx).await;
    let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, [TelemetryEventType::Play, TelemetryEventType::Complete]);

    let session_id = &events[0].session_id;
    assert!(events.iter().all(|e| &e.session_id == session_id));
}

#[tokio::test]
async fn test_failing_sink_does_not_affect_playback() {
    struct Unreachable;

    #[async_trait::async_trait]
    impl TelemetrySink for Unreachable {
        async fn deliver(&self, _event: &TelemetryEvent) -> pixl_player_core::Result<()> {
            Err(Error::TelemetryDelivery("connection refused".into()))
        }
    }

    let (engine, _handle) = ExternalEngine::new();
    let mut session = PlayerSession::new("v", PlayerConfig::default(), Box::new(engine), Arc::new(Unreachable)).unwrap();
    session.attach(MediaElement::new("video")).unwrap();
    session.on_media_event(MediaEvent::FirstFrameReady { duration: 30.0 });
    session.play().unwrap();
    tokio::task::yield_now().await;

    assert_eq!(session.state().status, PlaybackStatus::Playing);
}

#[tokio::test]
async fn test_players_do_not_share_limits() {
    let config = PlayerConfig::default();
    let (sink_a, rx_a) = ChannelSink::new();
    let (sink_b, rx_b) = ChannelSink::new();
    let mut a = TelemetryDispatcher::new("a", &config, Arc::new(sink_a));
    let mut b = TelemetryDispatcher::new("b", &config, Arc::new(sink_b));

    assert!(a.track(TelemetryIntent::new(TelemetryEventType::View, 0.0, "auto")));
    assert!(b.track(TelemetryIntent::new(TelemetryEventType::View, 0.0, "auto")));
    assert!(!a.track(TelemetryIntent::new(TelemetryEventType::Play, 0.0, "auto")));

    drop(a);
    drop(b);
    for mut rx in [rx_a, rx_b] {
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_teardown_stops_everything() {
    let (mut session, handle, rx) = playable(quiet_config(), 100.0);
    session.play().unwrap();
    session.pointer_moved();
    assert!(session.input().controls_visible());

    let events = delivered(session, rx).await;
    assert!(handle.is_destroyed());
    assert!(!handle.emit(EngineEvent::LevelSwitched { engine_index: 0 }));
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_second_attach_is_rejected() {
    let (mut session, handle, _rx) = new_session(quiet_config());
    session.attach(MediaElement::new("video")).unwrap();

    let err = session.attach(MediaElement::new("other")).unwrap_err();
    assert!(matches!(err, Error::AlreadyAttached));
    assert_eq!(handle.load_count(), 1);
}

#[tokio::test]
async fn test_keyboard_drives_session() {
    let (mut session, _handle, _rx) = playable(quiet_config(), 100.0);

    session.handle_key(KeyEvent::new(Key::Char('k'))).unwrap();
    assert_eq!(session.state().status, PlaybackStatus::Playing);

    session.handle_key(KeyEvent::new(Key::Digit(9))).unwrap();
    assert_eq!(session.state().current_time, 90.0);

    let ignored = session.handle_key(KeyEvent::new(Key::Char('m')).in_text_entry()).unwrap();
    assert!(ignored.is_none());
    assert!(!session.state().muted);
}
