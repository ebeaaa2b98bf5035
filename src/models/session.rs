//! Represents chunked upload sessions and their parts.

use serde::Deserialize;

/// One logical file upload, as declared by the client when it signals that
/// every chunk has been sent.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Client-supplied opaque token (Fine Uploader sends a UUID).
    pub id: String,

    /// Destination file name inside the session directory.
    pub final_name: String,

    /// Number of parts the client sent, indexed `0..declared_part_count`.
    pub declared_part_count: u32,

    /// Byte length the reassembled file must have.
    pub declared_total_size: u64,

    /// Uploading user, when the client provides one.
    pub user_id: Option<String>,
}

/// A single chunk of an upload session stored as its own file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPart {
    /// Parent session id.
    pub session_id: String,

    /// Zero-based position of the chunk within the upload.
    pub index: u32,
}

impl ChunkPart {
    pub fn new(session_id: impl Into<String>, index: u32) -> Self {
        Self {
            session_id: session_id.into(),
            index,
        }
    }

    /// File name of the part, e.g. `abc_00007`. The fixed width keeps a
    /// directory listing in index order.
    pub fn file_name(&self) -> String {
        format!("{}_{:05}", self.session_id, self.index)
    }
}
