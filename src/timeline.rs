//! Subtitle timeline assembly and SRT reading/writing
//!
//! The assembled timeline is gapless: every entry starts where the previous
//! one ended and the first starts at zero. Only the end times carry
//! information, each being the end of its interval plus a fixed delay.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{instrument, debug, info};

use crate::common::{Interval, Result, SlidesubError};

/// One numbered subtitle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleEntry {
    pub sequence: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub payload: String,
}

impl SubtitleEntry {
    pub fn new(sequence: u32, start_time: f64, end_time: f64, payload: impl Into<String>) -> Self {
        Self {
            sequence,
            start_time,
            end_time,
            payload: payload.into(),
        }
    }
}

/// Build the gapless timeline for `intervals`
///
/// Payloads are the zero-padded sequence numbers, matching the slide file
/// names.
#[instrument(skip(intervals), fields(intervals = intervals.len()))]
pub fn assemble(intervals: &[Interval], end_delay: f64) -> Vec<SubtitleEntry> {
    let mut previous_end = 0.0;

    let entries: Vec<SubtitleEntry> = intervals
        .iter()
        .zip(1u32..)
        .map(|(interval, sequence)| {
            let end_time = interval.end_time + end_delay;
            let entry = SubtitleEntry::new(sequence, previous_end, end_time, format!("{:04}", sequence));
            previous_end = end_time;
            entry
        })
        .collect();

    debug!("Assembled {} subtitle entries", entries.len());
    entries
}

/// Render seconds as `HH:MM:SS,mmm`, rounded to the nearest millisecond
///
/// Negative input renders as zero. Hours are not wrapped.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Parse `HH:MM:SS,mmm`; a `.` separator is tolerated
pub fn parse_timestamp(text: &str) -> Option<f64> {
    let (hms, millis) = text.trim().split_once([',', '.'])?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || secs >= 60 {
        return None;
    }
    if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;

    let total_ms = ((hours * 60 + minutes) * 60 + secs) * 1000 + millis;
    Some(total_ms as f64 / 1000.0)
}

/// Render entries in SubRip format; no entries yields an empty string
pub fn render_srt(entries: &[SubtitleEntry]) -> String {
    let mut output = String::new();

    for entry in entries {
        output.push_str(&format!("{}\n", entry.sequence));
        output.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(entry.start_time),
            format_timestamp(entry.end_time)
        ));
        output.push_str(&entry.payload);
        output.push_str("\n\n");
    }

    output
}

#[instrument(skip(entries), fields(entries = entries.len()))]
pub fn write_srt(path: &Path, entries: &[SubtitleEntry]) -> Result<()> {
    fs::write(path, render_srt(entries))?;
    info!("Wrote {} subtitles to {}", entries.len(), path.display());
    Ok(())
}

/// Parse SubRip text
///
/// Blocks are an index line, a timing line and any number of payload lines,
/// separated by blank lines. A leading byte order mark is ignored.
///
/// # Errors
/// * `SrtParse` - non-numeric index, missing or malformed timing line
pub fn parse_srt(content: &str) -> Result<Vec<SubtitleEntry>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut entries = Vec::new();
    let mut lines = content.lines().enumerate().peekable();

    loop {
        while lines.peek().is_some_and(|(_, l)| l.trim().is_empty()) {
            lines.next();
        }

        let Some((index_no, index_line)) = lines.next() else {
            break;
        };
        let sequence: u32 = index_line
            .trim()
            .parse()
            .map_err(|_| SlidesubError::srt_error(index_no + 1, format!("expected index, got {:?}", index_line)))?;

        let (timing_no, timing_line) = lines
            .next()
            .ok_or_else(|| SlidesubError::srt_error(index_no + 2, "missing timing line"))?;
        let (start_time, end_time) = parse_timing_line(timing_line)
            .ok_or_else(|| SlidesubError::srt_error(timing_no + 1, format!("bad timing line {:?}", timing_line)))?;

        let mut payload_lines = Vec::new();
        while let Some((_, line)) = lines.next_if(|(_, l)| !l.trim().is_empty()) {
            payload_lines.push(line);
        }

        entries.push(SubtitleEntry::new(sequence, start_time, end_time, payload_lines.join("\n")));
    }

    debug!("Parsed {} subtitle entries", entries.len());
    Ok(entries)
}

fn parse_timing_line(line: &str) -> Option<(f64, f64)> {
    let (start, end) = line.split_once("-->")?;
    // Anything after the end timestamp is positioning we do not keep
    let end = end.split_whitespace().next()?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

/// Read and parse an SRT file
pub fn read_srt(path: &Path) -> Result<Vec<SubtitleEntry>> {
    let content = fs::read_to_string(path)?;
    parse_srt(&content)
}

/// Move every entry by `offset` seconds
pub fn shift(entries: &[SubtitleEntry], offset: f64) -> Vec<SubtitleEntry> {
    entries
        .iter()
        .map(|e| SubtitleEntry {
            start_time: e.start_time + offset,
            end_time: e.end_time + offset,
            ..e.clone()
        })
        .collect()
}

/// Join consecutive parts into one timeline
///
/// Part `i` is shifted by the summed durations of parts `0..i` and the
/// result is renumbered from 1. Payloads are kept.
///
/// # Errors
/// * `InvalidConfiguration` - one duration per part is required, each
///   finite and non-negative
#[instrument(skip_all, fields(parts = parts.len()))]
pub fn concat(parts: &[Vec<SubtitleEntry>], durations: &[f64]) -> Result<Vec<SubtitleEntry>> {
    if parts.len() != durations.len() {
        return Err(SlidesubError::config_error(format!(
            "{} subtitle parts but {} durations", parts.len(), durations.len()
        )));
    }
    if let Some(bad) = durations.iter().find(|d| !d.is_finite() || **d < 0.0) {
        return Err(SlidesubError::config_error(format!(
            "part durations must be non-negative, got {}", bad
        )));
    }

    let mut offset = 0.0;
    let mut joined = Vec::new();
    for (part, duration) in parts.iter().zip(durations) {
        joined.extend(shift(part, offset));
        offset += duration;
    }

    for (entry, sequence) in joined.iter_mut().zip(1u32..) {
        entry.sequence = sequence;
    }

    info!("Concatenated {} entries, total offset {:.3}s", joined.len(), offset);
    Ok(joined)
}
