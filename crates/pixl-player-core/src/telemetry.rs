//! Engagement telemetry
//!
//! The controller produces [`TelemetryIntent`]s; the [`TelemetryDispatcher`]
//! stamps them with video, user and session identity, applies the rate
//! limit and hands them to a background delivery task. Delivery is
//! fire-and-forget: failures are logged and the event is discarded.

use crate::{config::PlayerConfig, error::Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Queue depth between `track` and the delivery task
const DELIVERY_QUEUE: usize = 256;

/// Engagement event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventType {
    View,
    Play,
    Pause,
    Seek,
    Complete,
    QualityChange,
    Buffer,
}

impl std::fmt::Display for TelemetryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TelemetryEventType::View => "view",
            TelemetryEventType::Play => "play",
            TelemetryEventType::Pause => "pause",
            TelemetryEventType::Seek => "seek",
            TelemetryEventType::Complete => "complete",
            TelemetryEventType::QualityChange => "quality_change",
            TelemetryEventType::Buffer => "buffer",
        };
        f.write_str(name)
    }
}

/// Partial event produced by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryIntent {
    pub event_type: TelemetryEventType,
    /// Playhead position in seconds
    pub video_time: f64,
    /// Active level label or "auto"
    pub quality: String,
}

impl TelemetryIntent {
    pub fn new(event_type: TelemetryEventType, video_time: f64, quality: impl Into<String>) -> Self {
        Self {
            event_type,
            video_time,
            quality: quality.into(),
        }
    }
}

/// Wire format posted to the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub video_id: String,
    pub user_id: String,
    pub session_id: String,
    pub event_type: TelemetryEventType,
    pub video_time: f64,
    pub quality: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for delivered events
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn deliver(&self, event: &TelemetryEvent) -> Result<()>;
}

/// POSTs each event as JSON
pub struct HttpTelemetrySink {
    client: Client,
    endpoint: Url,
}

impl HttpTelemetrySink {
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &PlayerConfig) -> Result<Self> {
        Self::new(config.telemetry_url()?, config.request_timeout())
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn deliver(&self, event: &TelemetryEvent) -> Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(event)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::TelemetryDelivery(e.to_string()))?;
        Ok(())
    }
}

/// Forwards events to an in-process receiver
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn deliver(&self, event: &TelemetryEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| Error::TelemetryDelivery("receiver closed".into()))
    }
}

/// At most one event per rolling window. `complete` is never limited but,
/// like every admitted event, restarts the window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    last_admitted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_admitted: None,
        }
    }

    /// Decide whether an event arriving at `now` goes out
    pub fn admit(&mut self, event_type: TelemetryEventType, now: Instant) -> bool {
        let within_window = self
            .last_admitted
            .is_some_and(|last| now.saturating_duration_since(last) < self.window);

        if within_window && event_type != TelemetryEventType::Complete {
            return false;
        }
        self.last_admitted = Some(now);
        true
    }
}

/// Generate a session id: millisecond prefix plus random suffix
pub fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("session-{}-{}", Utc::now().timestamp_millis(), &suffix[..9])
}

/// Counters for one dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub queued: u64,
    pub rate_limited: u64,
    pub overflowed: u64,
}

/// Session-scoped telemetry pipeline
pub struct TelemetryDispatcher {
    video_id: String,
    user_id: String,
    session_id: String,
    limiter: RateLimiter,
    queue: Option<mpsc::Sender<TelemetryEvent>>,
    worker: Option<JoinHandle<()>>,
    stats: DispatchStats,
}

impl TelemetryDispatcher {
    /// Create a dispatcher and spawn its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(video_id: impl Into<String>, config: &PlayerConfig, sink: Arc<dyn TelemetrySink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<TelemetryEvent>(DELIVERY_QUEUE);

        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match sink.deliver(&event).await {
                    Ok(()) => debug!(
                        event_type = %event.event_type,
                        video_time = event.video_time,
                        "Telemetry delivered"
                    ),
                    Err(e) => warn!(
                        event_type = %event.event_type,
                        error = %e,
                        "Telemetry delivery failed, event dropped"
                    ),
                }
            }
        });

        let dispatcher = Self {
            video_id: video_id.into(),
            user_id: config.user_id.clone(),
            session_id: new_session_id(),
            limiter: RateLimiter::new(config.telemetry_window()),
            queue: Some(tx),
            worker: Some(worker),
            stats: DispatchStats::default(),
        };

        info!(
            video_id = %dispatcher.video_id,
            session_id = %dispatcher.session_id,
            "Telemetry session started"
        );
        dispatcher
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Fill in identity and timestamp and queue for delivery.
    ///
    /// Returns false when the event was dropped (rate limit, full queue or
    /// shut down). Never blocks.
    pub fn track(&mut self, intent: TelemetryIntent) -> bool {
        self.track_at(intent, Instant::now())
    }

    fn track_at(&mut self, intent: TelemetryIntent, now: Instant) -> bool {
        let Some(queue) = &self.queue else {
            debug!(event_type = %intent.event_type, "Dispatcher shut down, event dropped");
            return false;
        };

        if !self.limiter.admit(intent.event_type, now) {
            self.stats.rate_limited += 1;
            debug!(event_type = %intent.event_type, "Rate limited");
            return false;
        }

        let event = TelemetryEvent {
            video_id: self.video_id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            event_type: intent.event_type,
            video_time: intent.video_time,
            quality: intent.quality,
            timestamp: Utc::now(),
        };

        match queue.try_send(event) {
            Ok(()) => {
                self.stats.queued += 1;
                true
            }
            Err(e) => {
                self.stats.overflowed += 1;
                warn!(error = %e, "Telemetry queue unavailable, event dropped");
                false
            }
        }
    }

    /// Stop accepting events. Already queued deliveries finish in the
    /// background; this does not wait for them.
    pub fn shutdown(&mut self) {
        if self.queue.take().is_some() {
            // Detach rather than abort so in-flight posts can complete
            self.worker.take();
            info!(session_id = %self.session_id, stats = ?self.stats, "Telemetry session closed");
        }
    }
}

impl Drop for TelemetryDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl TelemetrySink for FailingSink {
        async fn deliver(&self, _event: &TelemetryEvent) -> Result<()> {
            Err(Error::TelemetryDelivery("connection refused".into()))
        }
    }

    fn play_at(t: f64) -> TelemetryIntent {
        TelemetryIntent::new(TelemetryEventType::Play, t, "auto")
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<TelemetryEvent>) -> Vec<TelemetryEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_rate_limiter_window() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.admit(TelemetryEventType::Play, start));
        assert!(!limiter.admit(TelemetryEventType::Pause, start + Duration::from_millis(999)));
        assert!(limiter.admit(TelemetryEventType::Pause, start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_rate_limiter_complete_bypasses() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.admit(TelemetryEventType::Play, start));
        assert!(limiter.admit(TelemetryEventType::Complete, start));
        assert!(limiter.admit(TelemetryEventType::Complete, start + Duration::from_millis(400)));
        // Completion restarts the window
        assert!(!limiter.admit(TelemetryEventType::Seek, start + Duration::from_millis(1000)));
        assert!(limiter.admit(TelemetryEventType::Seek, start + Duration::from_millis(1400)));
    }

    #[test]
    fn test_session_id_shape() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.starts_with("session-"));
        assert_eq!(a.rsplit('-').next().unwrap().len(), 9);
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_json_shape() {
        let event = TelemetryEvent {
            video_id: "v1".into(),
            user_id: "anonymous".into(),
            session_id: "session-1-abc".into(),
            event_type: TelemetryEventType::QualityChange,
            video_time: 12.5,
            quality: "720p".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["videoId"], "v1");
        assert_eq!(json["sessionId"], "session-1-abc");
        assert_eq!(json["eventType"], "quality_change");
        assert_eq!(json["videoTime"], 12.5);
    }

    #[tokio::test]
    async fn test_ten_plays_in_one_second() {
        let (sink, rx) = ChannelSink::new();
        let mut dispatcher = TelemetryDispatcher::new("v1", &PlayerConfig::default(), Arc::new(sink));

        let start = Instant::now();
        let admitted = (0..10)
            .filter(|i| dispatcher.track_at(play_at(*i as f64), start + Duration::from_millis(i * 90)))
            .count();
        assert_eq!(admitted, 1);

        let complete = TelemetryIntent::new(TelemetryEventType::Complete, 95.0, "auto");
        assert!(dispatcher.track_at(complete, start + Duration::from_millis(950)));
        assert_eq!(dispatcher.stats().rate_limited, 9);

        let session_id = dispatcher.session_id().to_string();
        dispatcher.shutdown();

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, TelemetryEventType::Play);
        assert_eq!(events[1].event_type, TelemetryEventType::Complete);
        assert!(events.iter().all(|e| e.session_id == session_id && e.video_id == "v1"));
        assert_eq!(events[0].user_id, "anonymous");
    }

    #[tokio::test]
    async fn test_delivery_failure_is_absorbed() {
        let mut dispatcher = TelemetryDispatcher::new("v1", &PlayerConfig::default(), Arc::new(FailingSink));
        assert!(dispatcher.track(play_at(0.0)));
        tokio::task::yield_now().await;
        // Still usable after a failed post
        assert!(dispatcher.track(TelemetryIntent::new(TelemetryEventType::Complete, 1.0, "auto")));
    }

    #[tokio::test]
    async fn test_track_after_shutdown() {
        let (sink, rx) = ChannelSink::new();
        let mut dispatcher = TelemetryDispatcher::new("v1", &PlayerConfig::default(), Arc::new(sink));
        dispatcher.shutdown();
        assert!(!dispatcher.track(play_at(0.0)));
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_instances_do_not_share_limits() {
        let (sink_a, rx_a) = ChannelSink::new();
        let (sink_b, rx_b) = ChannelSink::new();
        let config = PlayerConfig::default();
        let mut a = TelemetryDispatcher::new("v1", &config, Arc::new(sink_a));
        let mut b = TelemetryDispatcher::new("v2", &config, Arc::new(sink_b));

        assert!(a.track(play_at(0.0)));
        assert!(b.track(play_at(0.0)));
        assert_ne!(a.session_id(), b.session_id());

        drop(a);
        drop(b);
        assert_eq!(drain(rx_a).await.len(), 1);
        assert_eq!(drain(rx_b).await.len(), 1);
    }
}
