//! Represents files and folders as the remote storage API describes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to another item, as embedded in API payloads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ItemRef {
    /// Item kind: `file` or `folder`.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Remote identifier.
    pub id: String,

    /// Display name, when the API included it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// An entry of a folder listing or a conflict payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ItemEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

impl ItemEntry {
    pub fn is_folder(&self) -> bool {
        self.kind == "folder"
    }

    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }
}

/// One page of a folder listing.
#[derive(Deserialize, Clone, Debug)]
pub struct ItemPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub entries: Vec<ItemEntry>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: u64,
}

/// A folder as returned by `GET /folders/{id}` and `POST /folders`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Folder {
    pub id: String,
    #[serde(default)]
    pub name: String,

    /// Missing for the root folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ItemRef>,
}

/// A file as returned by uploads, commits and `GET /files/{id}`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub parent: Option<ItemRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Wrapper the upload endpoints use around the created file.
#[derive(Deserialize, Clone, Debug)]
pub struct FileCollection {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub entries: Vec<FileObject>,
}

/// The remote file a transfer produced.
///
/// This is the unit written into resume state and reported to telemetry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileHandle {
    /// Remote file id.
    pub id: String,

    /// Remote id of the containing folder.
    pub folder_id: String,

    /// File name as stored remotely.
    pub name: String,

    /// Size in bytes.
    pub size: u64,

    /// SHA-1 of the content, hex encoded, when the service reported it.
    pub sha1: Option<String>,

    /// Creation timestamp reported by the service.
    pub created_at: Option<DateTime<Utc>>,
}

impl From<FileObject> for RemoteFileHandle {
    fn from(file: FileObject) -> Self {
        Self {
            id: file.id,
            folder_id: file.parent.map(|p| p.id).unwrap_or_default(),
            name: file.name,
            size: file.size,
            sha1: file.sha1,
            created_at: file.created_at,
        }
    }
}

/// Attributes sent alongside new content (simple upload and commit).
#[derive(Serialize, Clone, Debug)]
pub struct FileAttributes {
    pub name: String,
    pub parent: ParentRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_modified_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ParentRef {
    pub id: String,
}

impl FileAttributes {
    pub fn new(name: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: ParentRef {
                id: folder_id.into(),
            },
            content_modified_at: None,
        }
    }
}
