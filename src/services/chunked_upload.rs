//! Chunked upload protocol client.
//!
//! Four phases against the upload host:
//! - `POST /files/upload_sessions`: create a session
//! - `PUT /files/upload_sessions/{id}`: upload one byte range
//! - `POST /files/upload_sessions/{id}/commit`: finalize with the part manifest
//! - `DELETE /files/upload_sessions/{id}`: abort
//!
//! The manifest is validated locally before commit; an invalid manifest is
//! never sent.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{
    StatusCode,
    header::{CONTENT_RANGE, CONTENT_TYPE, HeaderValue, RETRY_AFTER},
};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    errors::{ApiError, ApiResult},
    models::{
        multipart::{PartRecord, SessionState, UploadSession},
        object::{FileAttributes, FileCollection, RemoteFileHandle},
    },
    services::{
        digest::ContentDigest,
        retry::RetryPolicy,
        transport::{AuthenticatedTransport, check, read_json},
    },
};

/// Part size used when the service does not negotiate one.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Files at or above this size go through a session.
pub const DEFAULT_CHUNKED_THRESHOLD: u64 = 20 * 1024 * 1024;

const DIGEST_HEADER: &str = "digest";

/// A part manifest that must not be committed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("no parts were uploaded")]
    Empty,
    #[error("part {index} at offset {offset} is empty")]
    EmptyPart { index: usize, offset: u64 },
    #[error("part {index} at offset {offset} has no digest")]
    MissingDigest { index: usize, offset: u64 },
    #[error("gap before part {index}: expected offset {expected}, found {found}")]
    Gap {
        index: usize,
        expected: u64,
        found: u64,
    },
    #[error("part {index} overlaps its predecessor: expected offset {expected}, found {found}")]
    Overlap {
        index: usize,
        expected: u64,
        found: u64,
    },
    #[error("parts cover {covered} bytes but the object is {expected} bytes")]
    SizeMismatch { covered: u64, expected: u64 },
}

#[derive(Debug, Error)]
pub enum ChunkedError {
    #[error("{size} bytes is below the chunked upload threshold of {threshold} bytes")]
    BelowThreshold { size: u64, threshold: u64 },
    #[error("session {id} is {state:?}; cannot {action}")]
    InvalidState {
        id: String,
        state: SessionState,
        action: &'static str,
    },
    #[error("part range {offset}+{len} does not fit an object of {total} bytes")]
    InvalidRange { offset: u64, len: u64, total: u64 },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

pub type ChunkedResult<T> = Result<T, ChunkedError>;

/// Result of a commit call.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// 201 with the created file.
    Committed(RemoteFileHandle),
    /// 202: the service is still assembling parts; commit again later.
    Processing { retry_after: Option<Duration> },
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    folder_id: &'a str,
    file_size: u64,
    file_name: &'a str,
}

#[derive(Deserialize, Debug)]
struct SessionResponse {
    id: String,
    #[serde(default)]
    part_size: Option<u64>,
    #[serde(default)]
    total_parts: Option<u64>,
    #[serde(default)]
    session_expires_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
struct PartResponse {
    #[serde(default)]
    part: Option<PartRecord>,
}

#[derive(Serialize)]
struct CommitRequest<'a> {
    parts: &'a [PartRecord],
    attributes: &'a FileAttributes,
}

/// Check a part manifest before commit.
///
/// Parts must start at offset 0, follow each other without gap or overlap,
/// be non-empty, carry a digest, and cover exactly `total_size` bytes.
pub fn validate_parts(records: &[PartRecord], total_size: u64) -> Result<(), IntegrityError> {
    if records.is_empty() {
        return Err(IntegrityError::Empty);
    }

    let mut expected = 0u64;
    for (index, part) in records.iter().enumerate() {
        if part.size == 0 {
            return Err(IntegrityError::EmptyPart {
                index,
                offset: part.offset,
            });
        }
        if part.sha1.is_empty() {
            return Err(IntegrityError::MissingDigest {
                index,
                offset: part.offset,
            });
        }
        if part.offset > expected {
            return Err(IntegrityError::Gap {
                index,
                expected,
                found: part.offset,
            });
        }
        if part.offset < expected {
            return Err(IntegrityError::Overlap {
                index,
                expected,
                found: part.offset,
            });
        }
        expected = part.end();
    }

    if expected != total_size {
        return Err(IntegrityError::SizeMismatch {
            covered: expected,
            expected: total_size,
        });
    }
    Ok(())
}

/// `bytes {first}-{last}/{total}`
pub fn content_range(offset: u64, len: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", offset, offset + len - 1, total)
}

#[derive(Debug, Clone)]
pub struct ChunkedUploadClient {
    transport: AuthenticatedTransport,
    upload_base_url: String,
    retry: RetryPolicy,
    threshold: u64,
}

impl ChunkedUploadClient {
    pub fn new(
        transport: AuthenticatedTransport,
        upload_base_url: impl Into<String>,
        retry: RetryPolicy,
        threshold: u64,
    ) -> Self {
        Self {
            transport,
            upload_base_url: upload_base_url.into().trim_end_matches('/').to_string(),
            retry,
            threshold,
        }
    }

    /// Smallest size accepted by [`Self::create_session`].
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    fn sessions_url(&self) -> String {
        format!("{}/files/upload_sessions", self.upload_base_url)
    }

    fn session_url(&self, id: &str) -> String {
        format!("{}/files/upload_sessions/{}", self.upload_base_url, id)
    }

    /// Open a session for a file of `total_size` bytes in `folder_id`.
    pub async fn create_session(
        &self,
        name: &str,
        folder_id: &str,
        total_size: u64,
        cancel: &CancellationToken,
    ) -> ChunkedResult<UploadSession> {
        if total_size < self.threshold {
            return Err(ChunkedError::BelowThreshold {
                size: total_size,
                threshold: self.threshold,
            });
        }

        let operation = "create upload session";
        let url = self.sessions_url();
        let body = CreateSessionRequest {
            folder_id,
            file_size: total_size,
            file_name: name,
        };
        let response = self
            .transport
            .send(operation, cancel, |http| http.post(&url).json(&body))
            .await?;
        let created: SessionResponse = read_json(operation, response).await?;

        let part_size = created
            .part_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PART_SIZE);
        // The part count is always derived locally; a reported count that
        // disagrees is logged and ignored.
        let total_parts = total_size.div_ceil(part_size);
        if let Some(reported) = created.total_parts.filter(|parts| *parts != total_parts) {
            warn!(
                session_id = %created.id,
                reported,
                expected = total_parts,
                "ignoring inconsistent part count"
            );
        }

        info!(
            session_id = %created.id,
            part_size,
            total_parts,
            "upload session created"
        );
        Ok(UploadSession {
            id: created.id,
            part_size,
            total_parts,
            total_size,
            expires_at: created.session_expires_at,
            state: SessionState::Created,
        })
    }

    /// Upload one byte range, retrying transient failures.
    pub async fn upload_part(
        &self,
        session: &mut UploadSession,
        bytes: Bytes,
        offset: u64,
        cancel: &CancellationToken,
    ) -> ChunkedResult<PartRecord> {
        if !matches!(
            session.state,
            SessionState::Created | SessionState::PartsUploading
        ) {
            return Err(ChunkedError::InvalidState {
                id: session.id.clone(),
                state: session.state,
                action: "upload a part",
            });
        }
        let len = bytes.len() as u64;
        let total = session.total_size;
        if len == 0 || offset.checked_add(len).is_none_or(|end| end > total) {
            return Err(ChunkedError::InvalidRange { offset, len, total });
        }
        session.state = SessionState::PartsUploading;

        let digest = ContentDigest::of(&bytes);
        let session_id = session.id.as_str();
        let digest_ref = &digest;
        let part = self
            .with_retry("upload part", cancel, move || {
                self.send_part(session_id, bytes.clone(), offset, total, digest_ref, cancel)
            })
            .await?;

        debug!(session_id = %session.id, offset, len, "part uploaded");
        Ok(part.unwrap_or_else(|| PartRecord {
            part_id: None,
            offset,
            size: len,
            sha1: digest.to_hex(),
        }))
    }

    async fn send_part(
        &self,
        session_id: &str,
        bytes: Bytes,
        offset: u64,
        total: u64,
        digest: &ContentDigest,
        cancel: &CancellationToken,
    ) -> ApiResult<Option<PartRecord>> {
        let operation = format!("upload part at offset {offset}");
        let url = self.session_url(session_id);
        let range = content_range(offset, bytes.len() as u64, total);
        let digest_header = digest.header_value();

        let response = self
            .transport
            .send(&operation, cancel, |http| {
                http.put(&url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .header(CONTENT_RANGE, range.as_str())
                    .header(DIGEST_HEADER, digest_header.as_str())
                    .body(bytes.clone())
            })
            .await?;
        let uploaded: PartResponse = read_json(&operation, response).await?;
        Ok(uploaded.part)
    }

    /// Finalize the session with the part manifest and whole-file digest.
    ///
    /// The manifest is validated first; on failure nothing is sent and the
    /// caller is expected to abort the session.
    pub async fn commit_session(
        &self,
        session: &mut UploadSession,
        records: &[PartRecord],
        attributes: &FileAttributes,
        whole_digest: &ContentDigest,
        cancel: &CancellationToken,
    ) -> ChunkedResult<CommitOutcome> {
        if session.state != SessionState::PartsUploading {
            return Err(ChunkedError::InvalidState {
                id: session.id.clone(),
                state: session.state,
                action: "commit",
            });
        }
        validate_parts(records, session.total_size)?;

        let operation = "commit upload session";
        let url = format!("{}/commit", self.session_url(&session.id));
        let digest_header = whole_digest.header_value();
        let body = CommitRequest {
            parts: records,
            attributes,
        };
        let (url, digest_header, body) = (url.as_str(), digest_header.as_str(), &body);

        let outcome = self
            .with_retry(operation, cancel, move || async move {
                let response = self
                    .transport
                    .send(operation, cancel, |http| {
                        http.post(url).header(DIGEST_HEADER, digest_header).json(body)
                    })
                    .await?;
                commit_outcome(operation, response).await
            })
            .await?;

        if let CommitOutcome::Committed(file) = &outcome {
            session.state = SessionState::Committed;
            info!(session_id = %session.id, file_id = %file.id, "upload session committed");
        }
        Ok(outcome)
    }

    /// Discard the session and its uploaded parts. Best effort.
    pub async fn abort_session(
        &self,
        session: &mut UploadSession,
        cancel: &CancellationToken,
    ) -> ChunkedResult<()> {
        if session.state.is_terminal() {
            return Err(ChunkedError::InvalidState {
                id: session.id.clone(),
                state: session.state,
                action: "abort",
            });
        }
        session.state = SessionState::Aborted;

        let operation = "abort upload session";
        let url = self.session_url(&session.id);
        let response = self
            .transport
            .send(operation, cancel, |http| http.delete(&url))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(session_id = %session.id, "session already gone");
            return Ok(());
        }
        check(operation, response).await?;
        info!(session_id = %session.id, "upload session aborted");
        Ok(())
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let Some(delay) = self.retry.next_delay(attempt, &err) else {
                return Err(err);
            };
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after failure"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ApiError::Cancelled(operation.to_string())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn commit_outcome(operation: &str, response: reqwest::Response) -> ApiResult<CommitOutcome> {
    match response.status() {
        StatusCode::ACCEPTED => {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(parse_retry_after);
            Ok(CommitOutcome::Processing { retry_after })
        }
        StatusCode::CREATED => {
            let files: FileCollection = read_json(operation, response).await?;
            files
                .entries
                .into_iter()
                .next()
                .map(|file| CommitOutcome::Committed(file.into()))
                .ok_or_else(|| ApiError::invalid_response(operation, "commit returned no file"))
        }
        status if status.is_success() => Err(ApiError::invalid_response(
            operation,
            format!("unexpected commit status {status}"),
        )),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(operation, status, &body))
        }
    }
}

fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
