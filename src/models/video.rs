//! Represents probed video metadata and the catalog entry of a finished upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Technical metadata extracted from an ffprobe report.
///
/// Every field stays at zero unless the report carried a parseable value
/// for it, so an all-zero record is a valid answer.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    /// Width of the video in pixels.
    pub video_width: u32,

    /// Height of the video in pixels.
    pub video_height: u32,

    /// Overall bit rate in bits per second.
    pub bit_rate: u64,

    /// Duration in seconds.
    pub duration_seconds: f64,

    /// Container size in bytes as reported by the prober.
    pub size_bytes: u64,
}

/// A completed upload as stored in the `videos` table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    /// Upload session id.
    pub id: String,

    /// Uploading user, if the client sent one.
    pub user_id: Option<String>,

    /// Name of the stored file.
    pub file_name: String,

    /// Location of the stored file on disk.
    pub file_path: String,

    /// Verified byte length of the stored file.
    pub size_bytes: i64,

    /// MD5 of the stored bytes.
    pub etag: String,

    /// Whether ffprobe produced a report for this file.
    pub probed: bool,

    pub video_width: i64,
    pub video_height: i64,
    pub bit_rate: i64,
    pub duration_seconds: f64,
    pub probe_size_bytes: i64,

    /// When the upload was completed.
    pub created_at: DateTime<Utc>,
}

impl Video {
    /// Probed metadata, or `None` if probing failed for this upload.
    pub fn video_info(&self) -> Option<VideoInfo> {
        self.probed.then(|| VideoInfo {
            video_width: u32::try_from(self.video_width).unwrap_or_default(),
            video_height: u32::try_from(self.video_height).unwrap_or_default(),
            bit_rate: u64::try_from(self.bit_rate).unwrap_or_default(),
            duration_seconds: self.duration_seconds,
            size_bytes: u64::try_from(self.probe_size_bytes).unwrap_or_default(),
        })
    }
}
