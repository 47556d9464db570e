//! Sprite cue index - scrub-preview thumbnails from a WebVTT-style sheet
//!
//! The cue document pairs time ranges with regions of one shared sprite image:
//!
//! ```text
//! WEBVTT
//!
//! 00:00:00.000 --> 00:00:05.000
//! sprite.jpg#xywh=10,10,160,90
//!
//! 00:05.000 --> 00:10.000
//! sprite.jpg#170,10,160,90
//! ```
//!
//! # Example
//!
//! ```rust
//! use pixl_player_core::cue_index::CueIndex;
//!
//! let index = CueIndex::parse("WEBVTT\n\n00:00.000 --> 00:05.000\nsheet.jpg#xywh=0,0,160,90\n");
//! let cue = index.lookup(2.5).unwrap();
//! assert_eq!(cue.region.w, 160);
//! assert!(index.lookup(6.0).is_none());
//! ```

use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

/// Pixel rectangle inside the sprite sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpriteRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl SpriteRegion {
    /// CSS `background-position` that brings this region into a w×h viewport
    pub fn background_position(&self) -> String {
        format!("-{}px -{}px", self.x, self.y)
    }
}

/// Half-open `[start, end)` interval mapped to a sprite region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    /// Seconds
    pub start: f64,
    /// Seconds, exclusive
    pub end: f64,
    pub sheet_url: String,
    pub region: SpriteRegion,
}

impl Cue {
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Immutable, time-searchable cue list. Cloning shares the list.
#[derive(Debug, Clone, Default)]
pub struct CueIndex {
    cues: Arc<[Cue]>,
    /// `reach[i]` is the latest end among `cues[..=i]`
    reach: Arc<[f64]>,
    skipped: usize,
}

impl CueIndex {
    /// Parse a cue document. Malformed cues are skipped and logged.
    pub fn parse(document: &str) -> Self {
        Self::parse_with_errors(document).0
    }

    /// Parse a cue document, also returning the error for every skipped cue.
    pub fn parse_with_errors(document: &str) -> (Self, Vec<Error>) {
        let mut cues = Vec::new();
        let mut errors = Vec::new();
        let mut lines = document.lines().enumerate().peekable();

        // Header block is optional; skip it up to the first blank line
        if let Some((_, first)) = lines.peek() {
            if first.trim_start_matches('\u{feff}').starts_with("WEBVTT") {
                while let Some((_, line)) = lines.next() {
                    if line.trim().is_empty() {
                        break;
                    }
                }
            }
        }

        while let Some((idx, raw)) = lines.next() {
            let line = raw.trim();
            let line_no = idx + 1;

            if line.is_empty() {
                continue;
            }

            if line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION") {
                skip_block(&mut lines);
                continue;
            }

            // Cue identifiers and stray payload lines
            if !line.contains("-->") {
                continue;
            }

            let cue = parse_timing_line(line, line_no).and_then(|(start, end)| {
                match lines.next_if(|(_, l)| !l.trim().is_empty()) {
                    Some((payload_idx, payload)) => {
                        let (sheet_url, region) = parse_payload(payload.trim(), payload_idx + 1)?;
                        Ok(Cue { start, end, sheet_url, region })
                    }
                    None => Err(Error::cue(line_no, "missing sprite payload")),
                }
            });

            match cue {
                Ok(cue) => cues.push(cue),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed cue");
                    skip_block(&mut lines);
                    errors.push(e);
                }
            }
        }

        // Binary search relies on start order; keep source order for ties
        cues.sort_by(|a, b| a.start.total_cmp(&b.start));

        debug!(cues = cues.len(), skipped = errors.len(), "Cue document parsed");

        let reach: Vec<f64> = cues
            .iter()
            .scan(f64::NEG_INFINITY, |latest, cue| {
                *latest = latest.max(cue.end);
                Some(*latest)
            })
            .collect();

        let index = Self {
            cues: cues.into(),
            reach: reach.into(),
            skipped: errors.len(),
        };
        (index, errors)
    }

    /// Fetch and parse the cue document for a video
    #[instrument(skip(client))]
    pub async fn fetch(client: &Client, url: &Url) -> Result<Self> {
        let document = client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(Self::parse(&document))
    }

    /// Cue whose interval contains `time`.
    ///
    /// Returns `None` before the first cue, inside gaps and past the last
    /// cue. Where cues overlap, the latest-starting one wins.
    pub fn lookup(&self, time: f64) -> Option<&Cue> {
        if !time.is_finite() {
            return None;
        }
        let after = self.cues.partition_point(|c| c.start <= time);
        // Earlier cues can only contain `time` while their running end is past it
        (0..after)
            .rev()
            .take_while(|&i| self.reach[i] > time)
            .map(|i| &self.cues[i])
            .find(|cue| cue.contains(time))
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Number of cues dropped while parsing
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

fn skip_block<'a, I>(lines: &mut std::iter::Peekable<I>)
where
    I: Iterator<Item = (usize, &'a str)>,
{
    while lines.next_if(|(_, l)| !l.trim().is_empty()).is_some() {}
}

/// Parse "00:00:00.000 --> 00:00:05.000 [settings]"
fn parse_timing_line(line: &str, line_no: usize) -> Result<(f64, f64)> {
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| Error::cue(line_no, "missing -->"))?;

    let start = parse_timestamp(start.trim(), line_no)?;
    let end_token = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::cue(line_no, "missing end time"))?;
    let end = parse_timestamp(end_token, line_no)?;

    if end <= start {
        return Err(Error::cue(
            line_no,
            format!("end {} is not after start {}", end, start),
        ));
    }

    Ok((start, end))
}

/// Parse "H:MM:SS.mmm" or "MM:SS.mmm" into seconds
fn parse_timestamp(ts: &str, line_no: usize) -> Result<f64> {
    let parts: Vec<&str> = ts.split(':').collect();

    let field = |s: &str, name: &str| -> Result<f64> {
        let value: f64 = s
            .parse()
            .map_err(|_| Error::cue(line_no, format!("invalid {}: {:?}", name, s)))?;
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(Error::cue(line_no, format!("invalid {}: {:?}", name, s)))
        }
    };

    match parts[..] {
        [m, s] => Ok(field(m, "minutes")? * 60.0 + field(s, "seconds")?),
        [h, m, s] => Ok(field(h, "hours")? * 3600.0 + field(m, "minutes")? * 60.0 + field(s, "seconds")?),
        _ => Err(Error::cue(line_no, format!("invalid timestamp: {:?}", ts))),
    }
}

/// Parse "sheet.jpg#xywh=10,10,160,90" or "sheet.jpg#10,10,160,90"
fn parse_payload(payload: &str, line_no: usize) -> Result<(String, SpriteRegion)> {
    let (url, fragment) = payload
        .rsplit_once('#')
        .ok_or_else(|| Error::cue(line_no, "payload has no #x,y,w,h fragment"))?;

    let coords = fragment.strip_prefix("xywh=").unwrap_or(fragment);
    let values = coords
        .split(',')
        .map(|v| v.trim().parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::cue(line_no, format!("invalid region: {:?}", coords)))?;

    match values.as_slice() {
        &[x, y, w, h] if !url.is_empty() => Ok((url.to_string(), SpriteRegion { x, y, w, h })),
        _ => Err(Error::cue(line_no, format!("expected url#x,y,w,h, got {:?}", payload))),
    }
}
