//! Bundled HLS engine
//!
//! Loads the multivariant (master) playlist, reports its variants and
//! records level requests. Segment scheduling and bandwidth estimation stay
//! with the media pipeline that consumes the selected variant.

use super::{EngineEvent, EngineEventSender, EngineLevel, MediaElement, StreamEngine};
use crate::{error::Error, Result};
use m3u8_rs::MasterPlaylist;
use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Fetches and parses HLS master playlists
pub struct HlsEngine {
    client: Client,
    load_task: Option<JoinHandle<()>>,
    events: Option<EngineEventSender>,
    /// Engine index the next segment request should use; `None` is auto
    pending_level: Option<usize>,
}

impl HlsEngine {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            load_task: None,
            events: None,
            pending_level: None,
        }
    }

    /// Level the next segment request will be made at
    pub fn pending_level(&self) -> Option<usize> {
        self.pending_level
    }
}

impl StreamEngine for HlsEngine {
    fn load(&mut self, media: &MediaElement, manifest_url: &Url, events: EngineEventSender) -> Result<()> {
        if self.load_task.is_some() {
            return Err(Error::AlreadyAttached);
        }

        debug!(media = media.id(), "Starting manifest load");
        let client = self.client.clone();
        let url = manifest_url.clone();
        let tx = events.clone();

        self.load_task = Some(tokio::spawn(async move {
            let event = match fetch_levels(&client, &url).await {
                Ok(levels) => EngineEvent::ManifestParsed { levels },
                Err(e) => EngineEvent::Error {
                    details: "manifestLoadError".to_string(),
                    message: e.to_string(),
                    fatal: true,
                },
            };
            // Receiver gone means the adapter detached meanwhile
            let _ = tx.send(event);
        }));
        self.events = Some(events);
        self.pending_level = None;
        Ok(())
    }

    fn request_level(&mut self, engine_index: Option<usize>) {
        // No segments are fetched here, so nothing ever renders at the new
        // level and no `LevelSwitched` is reported.
        if self.events.is_none() {
            warn!(?engine_index, "Level requested while detached");
            return;
        }
        debug!(?engine_index, "Level requested");
        self.pending_level = engine_index;
    }

    fn destroy(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.events = None;
        self.pending_level = None;
    }

    fn name(&self) -> &'static str {
        "hls"
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[instrument(skip(client))]
async fn fetch_levels(client: &Client, url: &Url) -> Result<Vec<EngineLevel>> {
    let content = client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let levels = levels_from_master(&content)?;
    info!(levels = levels.len(), "Master playlist loaded");
    Ok(levels)
}

/// Variants of a master playlist, in playlist order. I-frame variants are skipped.
pub fn levels_from_master(content: &str) -> Result<Vec<EngineLevel>> {
    let master: MasterPlaylist = m3u8_rs::parse_master_playlist_res(content.as_bytes())
        .map_err(|e| Error::FatalStream(crate::FatalStreamFault::new(
            "manifestParsingError",
            format!("Failed to parse HLS master: {:?}", e),
        )))?;

    let levels: Vec<EngineLevel> = master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| {
            let (width, height) = v
                .resolution
                .map(|r| (r.width as u32, r.height as u32))
                .unwrap_or((0, 0));
            EngineLevel {
                width,
                height,
                bitrate: v.bandwidth,
            }
        })
        .collect();

    if levels.is_empty() {
        warn!("Master playlist has no playable variants");
        return Err(Error::FatalStream(crate::FatalStreamFault::new(
            "manifestParsingError",
            "no playable variants",
        )));
    }

    Ok(levels)
}
