//! Extraction of [`VideoInfo`] from ffprobe's `-print_format flat` output.
//!
//! The report is one `dotted.key=value` assignment per line. Only five
//! fields are read; everything else is ignored. A line is matched by
//! substring, so `.width=` hits `streams.stream.0.width` as well as the
//! same key of any later stream, and the last parseable value wins.
//!
//! Parsing never fails. Lines that match but cannot be read produce a
//! [`FieldParseFailed`] diagnostic and leave the field untouched.

use crate::models::video::VideoInfo;
use std::{fmt, str::FromStr};
use thiserror::Error;
use tracing::{debug, warn};

/// A field of [`VideoInfo`] and the report marker that feeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeField {
    Width,
    Height,
    Duration,
    BitRate,
    Size,
}

impl ProbeField {
    pub const ALL: [ProbeField; 5] = [
        ProbeField::Width,
        ProbeField::Height,
        ProbeField::Duration,
        ProbeField::BitRate,
        ProbeField::Size,
    ];

    /// Substring a report line must contain to feed this field.
    pub fn marker(self) -> &'static str {
        match self {
            ProbeField::Width => ".width=",
            ProbeField::Height => ".height=",
            ProbeField::Duration => ".duration=",
            ProbeField::BitRate => "format.bit_rate=",
            ProbeField::Size => "format.size=",
        }
    }
}

impl fmt::Display for ProbeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeField::Width => "video width",
            ProbeField::Height => "video height",
            ProbeField::Duration => "video duration",
            ProbeField::BitRate => "video bit rate",
            ProbeField::Size => "video size",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("read {field} failed: {reason} (line `{line}`)")]
pub struct FieldParseFailed {
    pub field: ProbeField,
    pub line: String,
    pub reason: String,
}

impl FieldParseFailed {
    fn new(field: ProbeField, line: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a probe report, logging every diagnostic.
pub fn parse(report: &str) -> VideoInfo {
    let (info, diagnostics) = parse_with_diagnostics(report);
    for diagnostic in &diagnostics {
        warn!("{}", diagnostic);
    }
    debug!("analyzed video info {:?}", info);
    info
}

/// Parse a probe report and hand back the diagnostics instead of logging.
pub fn parse_with_diagnostics(report: &str) -> (VideoInfo, Vec<FieldParseFailed>) {
    let mut info = VideoInfo::default();
    let mut diagnostics = Vec::new();

    for line in report.lines() {
        for field in ProbeField::ALL {
            if !line.contains(field.marker()) {
                continue;
            }
            if let Err(err) = apply(&mut info, field, line) {
                diagnostics.push(err);
            }
        }
    }

    (info, diagnostics)
}

fn apply(info: &mut VideoInfo, field: ProbeField, line: &str) -> Result<(), FieldParseFailed> {
    let value = assignment_value(line)
        .ok_or_else(|| FieldParseFailed::new(field, line, "expected a single `=`"))?;

    match field {
        ProbeField::Width => info.video_width = number(field, line, value)?,
        ProbeField::Height => info.video_height = number(field, line, value)?,
        ProbeField::BitRate => info.bit_rate = number(field, line, value)?,
        ProbeField::Size => info.size_bytes = number(field, line, value)?,
        ProbeField::Duration => {
            let seconds: f64 = number(field, line, value)?;
            if !seconds.is_finite() {
                return Err(FieldParseFailed::new(field, line, "duration is not finite"));
            }
            info.duration_seconds = seconds;
        }
    }
    Ok(())
}

/// Value half of `key=value`, stripped of whitespace and quotes. `None`
/// unless the line holds exactly one `=`.
fn assignment_value(line: &str) -> Option<&str> {
    let mut pieces = line.split('=');
    match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(_), Some(value), None) => Some(value.trim().trim_matches('"').trim()),
        _ => None,
    }
}

fn number<T>(field: ProbeField, line: &str, value: &str) -> Result<T, FieldParseFailed>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|err| FieldParseFailed::new(field, line, err.to_string()))
}
