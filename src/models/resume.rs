//! Represents the per-item state persisted between runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the previous runs know about one logical item.
///
/// The record is a hint for skipping work, never ground truth: a completed
/// record is re-verified against the remote service before it is trusted.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeRecord {
    /// Caller-chosen identifier of the item (e.g. a recording file id).
    pub logical_id: String,

    /// Whether an attempt finished with a committed remote file.
    pub completed: bool,

    /// Remote file id produced by the last successful attempt.
    pub file_id: Option<String>,

    /// Remote folder the item was (or is being) uploaded into.
    pub folder_id: Option<String>,

    /// Size of the uploaded file, used to re-verify the remote copy.
    pub file_size: Option<u64>,

    /// When the last attempt started or finished.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Number of finished attempts (successful or failed).
    pub attempts: u32,

    /// Error text of the last failed attempt.
    pub last_error: Option<String>,
}
