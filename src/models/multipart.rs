//! Represents chunked upload sessions and their parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local view of a session's lifecycle.
///
/// `Created → PartsUploading → Committed`, or `Created | PartsUploading →
/// Aborted`. Committed and aborted sessions are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    PartsUploading,
    Committed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }
}

/// A chunked upload session, created before uploading a large file in parts.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadSession {
    /// Session id returned by the service.
    pub id: String,

    /// Size in bytes of every part except the last.
    pub part_size: u64,

    /// Number of parts the service expects.
    pub total_parts: u64,

    /// Declared size of the whole object.
    pub total_size: u64,

    /// When the service discards the session.
    pub expires_at: Option<DateTime<Utc>>,

    /// Where the session is in its lifecycle.
    pub state: SessionState,
}

/// A single uploaded byte range within a session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    /// Server-assigned part id, when the service returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,

    /// Byte offset of the part within the object.
    pub offset: u64,

    /// Size in bytes.
    pub size: u64,

    /// SHA-1 of the part, hex encoded.
    pub sha1: String,
}

impl PartRecord {
    /// First byte past the end of this part.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}
