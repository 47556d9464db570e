//! CLI command implementations

use crate::output::{timestamp, to_json, OutputFormat};
use anyhow::{bail, Context};
use pixl_player_core::{
    input::{Command, KEY_BINDINGS},
    CueIndex, HlsEngine, LevelDescriptor, MediaElement, PlayerConfig, StreamAdapter, StreamSignal,
};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Parse a cue document and print its cues, or the one covering `at`
pub async fn cues(path: &Path, at: Option<f64>, format: &str) -> anyhow::Result<()> {
    let document = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let (index, errors) = CueIndex::parse_with_errors(&document);
    for error in &errors {
        warn!("{}", error);
    }
    info!(cues = index.len(), skipped = index.skipped(), "Cue document parsed");

    let format = OutputFormat::from(format);
    match at {
        Some(time) => {
            let cue = index.lookup(time);
            match format {
                OutputFormat::Json => println!("{}", to_json(&cue)?),
                OutputFormat::Text => match cue {
                    Some(cue) => println!(
                        "{} -> {}  {}  {}x{} at {}",
                        timestamp(cue.start),
                        timestamp(cue.end),
                        cue.sheet_url,
                        cue.region.w,
                        cue.region.h,
                        cue.region.background_position()
                    ),
                    None => println!("No cue at {}", timestamp(time)),
                },
            }
        }
        None => match format {
            OutputFormat::Json => println!("{}", to_json(&index.cues())?),
            OutputFormat::Text => {
                println!("Cues: {} ({} skipped)", index.len(), index.skipped());
                for (i, cue) in index.cues().iter().enumerate() {
                    println!(
                        "  {:>4}. {} -> {}  {}#{},{},{},{}",
                        i + 1,
                        timestamp(cue.start),
                        timestamp(cue.end),
                        cue.sheet_url,
                        cue.region.x,
                        cue.region.y,
                        cue.region.w,
                        cue.region.h
                    );
                }
            }
        },
    }

    Ok(())
}

/// Load a master playlist through the bundled engine and print its levels
pub async fn levels(manifest_url: &str, timeout_secs: u64, format: &str) -> anyhow::Result<()> {
    let url = Url::parse(manifest_url)?;
    let config = PlayerConfig::default();
    let engine = HlsEngine::new(config.request_timeout())?;
    let mut adapter = StreamAdapter::new(Box::new(engine));
    adapter.attach(MediaElement::new("pixl-cli"), url)?;

    let levels = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        loop {
            match adapter.next_signal().await {
                Some(StreamSignal::LevelsReady(levels)) => return Ok(levels),
                Some(StreamSignal::Fatal(fault)) => bail!("stream failed: {}", fault),
                Some(_) => continue,
                None => bail!("engine closed before the manifest was parsed"),
            }
        }
    })
    .await
    .context("timed out waiting for the manifest")??;

    adapter.detach();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&*levels)?),
        OutputFormat::Text => print_levels(&levels),
    }
    Ok(())
}

fn print_levels(levels: &[LevelDescriptor]) {
    println!("Levels: {}", levels.len());
    for level in levels {
        println!(
            "  {}. {:<6} {:>5}p {:>8.0} kbps (variant {})",
            level.index,
            level.label,
            level.height,
            level.bitrate as f64 / 1000.0,
            level.engine_index
        );
    }
}

#[derive(Serialize)]
struct Binding {
    key: String,
    command: String,
}

/// Print the gesture table, digits collapsed in text mode
pub fn keys(format: &str) -> anyhow::Result<()> {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            let bindings: Vec<Binding> = KEY_BINDINGS
                .iter()
                .map(|(key, command)| Binding {
                    key: key.to_string(),
                    command: command.description(),
                })
                .collect();
            println!("{}", to_json(&bindings)?);
        }
        OutputFormat::Text => {
            println!("Keyboard shortcuts:");
            for (key, command) in KEY_BINDINGS {
                if matches!(command, Command::SeekToTenth(_)) {
                    continue;
                }
                println!("  {:<8} {}", key.to_string(), command.description());
            }
            println!("  {:<8} Seek to 0%-90%", "0-9");
        }
    }
    Ok(())
}
