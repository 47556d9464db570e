//! Stream adapter - owns one streaming engine attached to one media element
//!
//! The engine is a black box that reports through [`EngineEvent`]s. The
//! adapter turns those into [`StreamSignal`]s for the playback controller:
//! level lists, confirmed level switches, recoverable stalls and fatal faults.

#[cfg(feature = "hls")]
mod hls;
mod external;

#[cfg(feature = "hls")]
pub use hls::HlsEngine;
pub use external::{ExternalEngine, ExternalEngineHandle};

use crate::{
    error::{Error, FatalStreamFault, Result},
    types::{quality_label, LevelDescriptor, LevelList, LevelSelection},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

/// Engine detail code for a buffer underrun
pub const BUFFER_STALLED: &str = "bufferStalledError";

/// Handle to the playable media surface.
///
/// Not `Clone`: while attached it belongs to exactly one adapter and is
/// handed back by [`StreamAdapter::detach`].
#[derive(Debug, PartialEq, Eq)]
pub struct MediaElement {
    id: String,
}

impl MediaElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Rendition as reported by the engine, in engine order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLevel {
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
}

/// Raw engine callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Manifest loaded and parsed
    ManifestParsed { levels: Vec<EngineLevel> },
    /// Engine started rendering a different level
    LevelSwitched { engine_index: usize },
    /// Engine error; `fatal` faults cannot be recovered
    Error {
        details: String,
        message: String,
        fatal: bool,
    },
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Adaptive-streaming engine driven by the adapter
pub trait StreamEngine: Send {
    /// Begin loading `manifest_url` into `media`, reporting on `events`
    fn load(&mut self, media: &MediaElement, manifest_url: &Url, events: EngineEventSender) -> Result<()>;

    /// Pin a level (engine index) or release to automatic selection
    fn request_level(&mut self, engine_index: Option<usize>);

    /// Release every engine resource. Must be safe to call repeatedly.
    fn destroy(&mut self);

    /// Engine name for logs
    fn name(&self) -> &'static str;
}

/// What the controller hears from the stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// New level list, ascending by resolution
    LevelsReady(LevelList),
    /// Engine confirmed rendering this descriptor index
    LevelSwitched(usize),
    /// Buffer underrun
    Stalled,
    /// Unrecoverable fault
    Fatal(FatalStreamFault),
}

struct Attachment {
    media: MediaElement,
    manifest_url: Url,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    faulted: bool,
}

/// Wraps a [`StreamEngine`] for one media element and one manifest.
///
/// Dropping the adapter detaches it.
pub struct StreamAdapter {
    engine: Box<dyn StreamEngine>,
    attachment: Option<Attachment>,
    levels: LevelList,
}

impl StreamAdapter {
    pub fn new(engine: Box<dyn StreamEngine>) -> Self {
        Self {
            engine,
            attachment: None,
            levels: Vec::new().into(),
        }
    }

    /// Attach to `media` and start loading the manifest.
    ///
    /// A second attach without an intervening [`detach`](Self::detach) is
    /// rejected with [`Error::AlreadyAttached`] and changes nothing.
    pub fn attach(&mut self, media: MediaElement, manifest_url: Url) -> Result<()> {
        if let Some(current) = &self.attachment {
            warn!(
                media = current.media.id(),
                rejected = media.id(),
                "Attach rejected, adapter already attached"
            );
            return Err(Error::AlreadyAttached);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.engine.load(&media, &manifest_url, tx) {
            self.engine.destroy();
            return Err(e);
        }

        info!(
            engine = self.engine.name(),
            media = media.id(),
            url = %manifest_url,
            "Stream attached"
        );

        self.attachment = Some(Attachment {
            media,
            manifest_url,
            events: rx,
            faulted: false,
        });
        Ok(())
    }

    /// Release engine resources and hand the media element back.
    ///
    /// Events still queued from the old attachment are discarded with it.
    pub fn detach(&mut self) -> Option<MediaElement> {
        let attachment = self.attachment.take()?;
        self.engine.destroy();
        self.levels = Vec::new().into();
        info!(media = attachment.media.id(), "Stream detached");
        Some(attachment.media)
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn manifest_url(&self) -> Option<&Url> {
        self.attachment.as_ref().map(|a| &a.manifest_url)
    }

    /// Latest level list (empty until the manifest is parsed)
    pub fn levels(&self) -> LevelList {
        self.levels.clone()
    }

    /// Request a level. Takes effect asynchronously; confirmation arrives
    /// as [`StreamSignal::LevelSwitched`].
    pub fn set_level(&mut self, selection: LevelSelection) -> Result<()> {
        let attachment = self.attachment.as_ref().ok_or(Error::NotAttached)?;
        if attachment.faulted {
            debug!(%selection, "Level request dropped, stream faulted");
            return Ok(());
        }

        let engine_index = match selection {
            LevelSelection::Auto => None,
            LevelSelection::Manual(index) => {
                let level = self
                    .levels
                    .get(index)
                    .ok_or(Error::UnknownLevel { index })?;
                Some(level.engine_index)
            }
        };

        debug!(%selection, ?engine_index, "Level requested");
        self.engine.request_level(engine_index);
        Ok(())
    }

    /// Wait for the next signal. `None` when detached or the engine is gone.
    pub async fn next_signal(&mut self) -> Option<StreamSignal> {
        loop {
            let event = self.attachment.as_mut()?.events.recv().await?;
            if let Some(signal) = self.translate(event) {
                return Some(signal);
            }
        }
    }

    /// Next signal if one is already queued
    pub fn try_next_signal(&mut self) -> Option<StreamSignal> {
        loop {
            let event = self.attachment.as_mut()?.events.try_recv().ok()?;
            if let Some(signal) = self.translate(event) {
                return Some(signal);
            }
        }
    }

    fn translate(&mut self, event: EngineEvent) -> Option<StreamSignal> {
        let attachment = self.attachment.as_mut()?;
        if attachment.faulted {
            debug!(?event, "Ignoring engine event after fatal fault");
            return None;
        }

        match event {
            EngineEvent::ManifestParsed { levels } => {
                self.levels = describe_levels(&levels);
                info!(levels = self.levels.len(), "Manifest parsed");
                Some(StreamSignal::LevelsReady(self.levels.clone()))
            }
            EngineEvent::LevelSwitched { engine_index } => {
                let index = self.levels.iter().position(|l| l.engine_index == engine_index);
                if index.is_none() {
                    warn!(engine_index, "Switch to a level missing from the manifest");
                }
                index.map(StreamSignal::LevelSwitched)
            }
            EngineEvent::Error { details, message, fatal: true } => {
                attachment.faulted = true;
                warn!(%details, %message, "Fatal stream fault");
                Some(StreamSignal::Fatal(FatalStreamFault::new(details, message)))
            }
            EngineEvent::Error { details, .. } if details == BUFFER_STALLED => {
                debug!("Buffer stalled");
                Some(StreamSignal::Stalled)
            }
            EngineEvent::Error { details, message, .. } => {
                debug!(%details, %message, "Recoverable engine error");
                None
            }
        }
    }
}

impl Drop for StreamAdapter {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Build the ascending descriptor list from engine levels.
fn describe_levels(levels: &[EngineLevel]) -> LevelList {
    let mut ordered: Vec<(usize, &EngineLevel)> = levels.iter().enumerate().collect();
    ordered.sort_by_key(|(_, l)| (l.height, l.bitrate));

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, (engine_index, level))| LevelDescriptor {
            index,
            label: quality_label(level.height).to_string(),
            bitrate: level.bitrate,
            height: level.height,
            engine_index,
        })
        .collect::<Vec<_>>()
        .into()
}
