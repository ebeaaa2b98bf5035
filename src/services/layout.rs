//! On-disk layout of upload sessions.
//!
//! Every session owns one directory beneath the upload root:
//!
//! ```text
//! <base_path>/<session_id>/<session_id>_00000   chunk part 0
//! <base_path>/<session_id>/<session_id>_00001   chunk part 1
//! <base_path>/<session_id>/<final_name>         reassembled file
//! ```
//!
//! Ids and names are validated before any path is built so that a request
//! can never address a file outside its own session directory.

use crate::models::session::ChunkPart;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_SESSION_ID_LEN: usize = 128;
const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("invalid session id `{0}`")]
    InvalidSessionId(String),
    #[error("invalid file name `{0}`")]
    InvalidFileName(String),
}

#[derive(Debug, Clone)]
pub struct UploadLayout {
    base_path: PathBuf,
}

impl UploadLayout {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding the parts and the final file of a session.
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf, LayoutError> {
        ensure_session_id_safe(session_id)?;
        Ok(self.base_path.join(session_id))
    }

    pub fn part_path(&self, part: &ChunkPart) -> Result<PathBuf, LayoutError> {
        Ok(self.session_dir(&part.session_id)?.join(part.file_name()))
    }

    /// Path of the reassembled file. Names that would collide with one of
    /// the session's own part files are refused.
    pub fn final_path(&self, session_id: &str, file_name: &str) -> Result<PathBuf, LayoutError> {
        let dir = self.session_dir(session_id)?;
        ensure_file_name_safe(file_name)?;
        if is_part_name(session_id, file_name) {
            return Err(LayoutError::InvalidFileName(file_name.to_string()));
        }
        Ok(dir.join(file_name))
    }
}

/// Session ids are used verbatim as directory names: ASCII alphanumerics,
/// `-` and `_` only.
pub fn ensure_session_id_safe(session_id: &str) -> Result<(), LayoutError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(LayoutError::InvalidSessionId(session_id.to_string()))
    }
}

/// Rejects empty or overlong names, hidden names (including `.` and `..`),
/// separators and control characters.
pub fn ensure_file_name_safe(file_name: &str) -> Result<(), LayoutError> {
    let invalid = file_name.is_empty()
        || file_name.len() > MAX_FILE_NAME_LEN
        || file_name.starts_with('.')
        || file_name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
    if invalid {
        Err(LayoutError::InvalidFileName(file_name.to_string()))
    } else {
        Ok(())
    }
}

fn is_part_name(session_id: &str, file_name: &str) -> bool {
    file_name
        .strip_prefix(session_id)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
}
