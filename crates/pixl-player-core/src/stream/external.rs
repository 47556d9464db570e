//! Engine driven from outside the crate.
//!
//! Used when the real engine lives in the host (a browser bridge forwarding
//! hls.js callbacks, a native player) and in tests. The host keeps the
//! [`ExternalEngineHandle`], pushes engine callbacks through it and reads
//! back the level the adapter requested.

use super::{EngineEvent, EngineEventSender, MediaElement, StreamEngine};
use crate::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use url::Url;

#[derive(Default)]
struct Shared {
    events: Option<EngineEventSender>,
    manifest_url: Option<Url>,
    /// Outer `None`: nothing requested yet. Inner `None`: auto.
    requested_level: Option<Option<usize>>,
    loads: usize,
    destroyed: bool,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`StreamEngine`] whose callbacks come from an [`ExternalEngineHandle`]
pub struct ExternalEngine {
    shared: Arc<Mutex<Shared>>,
}

/// Host side of an [`ExternalEngine`]
#[derive(Clone)]
pub struct ExternalEngineHandle {
    shared: Arc<Mutex<Shared>>,
}

impl ExternalEngine {
    pub fn new() -> (Self, ExternalEngineHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self { shared: shared.clone() },
            ExternalEngineHandle { shared },
        )
    }
}

impl StreamEngine for ExternalEngine {
    fn load(&mut self, media: &MediaElement, manifest_url: &Url, events: EngineEventSender) -> Result<()> {
        let mut shared = lock(&self.shared);
        debug!(media = media.id(), url = %manifest_url, "External engine load");
        shared.events = Some(events);
        shared.manifest_url = Some(manifest_url.clone());
        shared.requested_level = None;
        shared.loads += 1;
        shared.destroyed = false;
        Ok(())
    }

    fn request_level(&mut self, engine_index: Option<usize>) {
        lock(&self.shared).requested_level = Some(engine_index);
    }

    fn destroy(&mut self) {
        let mut shared = lock(&self.shared);
        shared.events = None;
        shared.destroyed = true;
    }

    fn name(&self) -> &'static str {
        "external"
    }
}

impl ExternalEngineHandle {
    /// Forward an engine callback. Returns false when nothing is listening.
    pub fn emit(&self, event: EngineEvent) -> bool {
        match &lock(&self.shared).events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Manifest the engine was asked to load
    pub fn manifest_url(&self) -> Option<Url> {
        lock(&self.shared).manifest_url.clone()
    }

    /// Last level request: `Some(None)` means auto
    pub fn requested_level(&self) -> Option<Option<usize>> {
        lock(&self.shared).requested_level
    }

    pub fn load_count(&self) -> usize {
        lock(&self.shared).loads
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.shared).destroyed
    }
}
