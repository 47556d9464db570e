//! Pixl Player Core - playback and engagement telemetry for the Pixl client
//!
//! This crate provides the client-side playback controller:
//! - Cue-indexed sprite thumbnails for scrub previews
//! - Adaptive-streaming engine adapter (bundled HLS engine optional)
//! - Transport state machine (play, pause, seek, buffering, errors)
//! - Keyboard and pointer gesture table
//! - Rate-limited, session-correlated engagement telemetry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Pixl Player Core                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Input     │  │   CueIndex   │  │    Stream    │           │
//! │  │   Surface    │  │ (scrub thumb)│  │   Adapter    │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │ commands        │ lookup          │ signals           │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │ Controller  │                              │
//! │                    └──────┬──────┘                              │
//! │                           │ intents                             │
//! │                    ┌──────┴──────┐        ┌──────────────┐      │
//! │                    │  Telemetry  │───────▶│    Sink      │      │
//! │                    │ Dispatcher  │        │ (HTTP POST)  │      │
//! │                    └─────────────┘        └──────────────┘      │
//! │                                                                 │
//! │              PlayerSession wires one of each per mount          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod controller;
pub mod cue_index;
pub mod error;
pub mod input;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod types;

pub use config::{PlayerConfig, ViewPolicy};
pub use controller::{MediaEvent, PlaybackController, StallStats};
pub use cue_index::{Cue, CueIndex, SpriteRegion};
pub use error::{Error, FatalStreamFault, Result};
pub use input::{Command, InputSurface, Key, KeyEvent, ScrubPreview, KEY_BINDINGS};
pub use session::PlayerSession;
pub use stream::{
    EngineEvent, EngineLevel, ExternalEngine, ExternalEngineHandle, MediaElement, StreamAdapter,
    StreamEngine, StreamSignal,
};
#[cfg(feature = "hls")]
pub use stream::HlsEngine;
pub use telemetry::{
    ChannelSink, HttpTelemetrySink, TelemetryDispatcher, TelemetryEvent, TelemetryEventType,
    TelemetryIntent, TelemetrySink,
};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the player library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Pixl Player Core initialized");
}
