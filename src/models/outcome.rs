//! Represents the result of one upload attempt.

use serde::Serialize;
use std::{fmt, time::Duration};

use crate::models::object::RemoteFileHandle;

/// Stage of an upload, as reported to progress callbacks and reporters.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    CreatingFolders,
    Uploading,
    SettingPermissions,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::CreatingFolders => "creating-folders",
            Phase::Uploading => "uploading",
            Phase::SettingPermissions => "setting-permissions",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a failed attempt.
///
/// Lets callers tell an authorization problem (prompt the user to
/// re-authorize) apart from a data or service problem.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Authentication,
    RateLimited,
    Server,
    Client,
    Network,
    Integrity,
    LocalIo,
    ResumeStore,
    Cancelled,
    /// The retry gate refused the attempt; nothing was sent.
    Deferred,
    Other,
}

/// Result of a single `upload` call.
#[derive(Serialize, Clone, Debug)]
pub struct TransferOutcome {
    pub logical_id: String,

    /// True only when a complete remote file exists for the item.
    pub success: bool,

    /// True when a verified earlier upload was reused without transferring.
    pub skipped: bool,

    pub file: Option<RemoteFileHandle>,

    /// Wall time of the attempt; zero for skipped items.
    pub elapsed: Duration,

    /// Attempts recorded for the item before this one.
    pub retries: u32,

    /// Human-readable error of a failed attempt.
    pub error: Option<String>,

    pub failure: Option<FailureKind>,
}

impl TransferOutcome {
    pub fn succeeded(
        logical_id: impl Into<String>,
        file: RemoteFileHandle,
        elapsed: Duration,
        retries: u32,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            success: true,
            skipped: false,
            file: Some(file),
            elapsed,
            retries,
            error: None,
            failure: None,
        }
    }

    pub fn skipped(logical_id: impl Into<String>, file: RemoteFileHandle, retries: u32) -> Self {
        Self {
            skipped: true,
            ..Self::succeeded(logical_id, file, Duration::ZERO, retries)
        }
    }

    pub fn failed(
        logical_id: impl Into<String>,
        kind: FailureKind,
        error: impl Into<String>,
        elapsed: Duration,
        retries: u32,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            success: false,
            skipped: false,
            file: None,
            elapsed,
            retries,
            error: Some(error.into()),
            failure: Some(kind),
        }
    }
}
