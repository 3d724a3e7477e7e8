//! UploadOrchestrator: one call per media item.
//!
//! Checks resume state, resolves the dated folder path, picks simple or
//! chunked transfer by size, shares the folder with the owner when asked,
//! and records the result. Failures never escape as `Err`: they come back
//! inside the [`TransferOutcome`] and are written to the resume store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{fs::File, io::AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    errors::ApiError,
    models::{
        multipart::{PartRecord, UploadSession},
        object::{FileAttributes, RemoteFileHandle},
        outcome::{FailureKind, Phase, TransferOutcome},
        resume::ResumeRecord,
    },
    services::{
        api_client::ApiClient,
        chunked_upload::{
            ChunkedError, ChunkedUploadClient, CommitOutcome, IntegrityError, validate_parts,
        },
        digest::{ContentDigest, DigestWriter, digest_file},
        resume_store::{ResumeStore, ResumeStoreError},
        telemetry::{ProgressFn, ProgressTracker, TransferReporter},
    },
};

/// Number of trailing directory segments mirrored remotely (year/month/day).
pub const FOLDER_DEPTH: usize = 3;

/// Upper bound on the best-effort abort after a failed or cancelled transfer.
const ABORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether an item with earlier failed attempts may be tried again.
#[derive(Debug, Clone)]
pub struct RetryGate {
    pub max_attempts: u32,
    pub cooldown: Duration,
}

impl Default for RetryGate {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryGate {
    /// `attempts < max_attempts` and at least `cooldown` since the last
    /// attempt. A record without a timestamp is never held back by the
    /// cooldown.
    pub fn is_eligible(&self, record: &ResumeRecord, now: DateTime<Utc>) -> bool {
        if record.attempts >= self.max_attempts {
            return false;
        }
        match record.last_attempt_at {
            Some(last) => {
                let since = now.signed_duration_since(last);
                since.to_std().is_ok_and(|since| since >= self.cooldown)
            }
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Remote folder the dated path is created under.
    pub base_folder_id: String,

    pub retry_gate: RetryGate,

    /// How many more times a commit answered with 202 is re-sent.
    pub commit_poll_attempts: u32,

    /// Wait between commit polls when the service gives no `Retry-After`.
    pub commit_poll_delay: Duration,

    /// Collaboration role granted to the owner on the day folder; `None`
    /// skips the permissions phase.
    pub share_role: Option<String>,
}

impl UploadOptions {
    pub fn new(base_folder_id: impl Into<String>) -> Self {
        Self {
            base_folder_id: base_folder_id.into(),
            retry_gate: RetryGate::default(),
            commit_poll_attempts: 5,
            commit_poll_delay: Duration::from_secs(2),
            share_role: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("reading {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),
    #[error("cannot derive a year/month/day folder path from {}", .0.display())]
    FolderPath(PathBuf),
    #[error("{} changed size during upload: expected {expected} bytes, read {actual}", .path.display())]
    SizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
    #[error("resolving folder {path}: {source}")]
    Folder { path: String, source: ApiError },
    #[error("upload failed: {0}")]
    Transfer(ApiError),
    #[error("creating upload session: {0}")]
    Session(ChunkedError),
    #[error("uploading part at offset {offset}: {source}")]
    Part { offset: u64, source: ChunkedError },
    #[error("part manifest rejected: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("committing upload session: {0}")]
    Commit(ChunkedError),
    #[error("session {0} was still processing after the last commit poll")]
    CommitPending(String),
    #[error("resume state: {0}")]
    ResumeStore(#[from] ResumeStoreError),
    #[error("cancelled")]
    Cancelled,
    #[error("retry deferred: {0}")]
    Deferred(String),
}

impl UploadError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            UploadError::Io { .. }
            | UploadError::NotAFile(_)
            | UploadError::FolderPath(_)
            | UploadError::SizeChanged { .. } => FailureKind::LocalIo,
            UploadError::Folder { source, .. } => source.class().failure_kind(),
            UploadError::Transfer(err) => err.class().failure_kind(),
            UploadError::Session(err)
            | UploadError::Part { source: err, .. }
            | UploadError::Commit(err) => chunked_failure_kind(err),
            UploadError::Integrity(_) => FailureKind::Integrity,
            UploadError::CommitPending(_) => FailureKind::Server,
            UploadError::ResumeStore(_) => FailureKind::ResumeStore,
            UploadError::Cancelled => FailureKind::Cancelled,
            UploadError::Deferred(_) => FailureKind::Deferred,
        }
    }
}

fn chunked_failure_kind(err: &ChunkedError) -> FailureKind {
    match err {
        ChunkedError::Api(api) => api.class().failure_kind(),
        ChunkedError::Integrity(_) => FailureKind::Integrity,
        ChunkedError::BelowThreshold { .. }
        | ChunkedError::InvalidState { .. }
        | ChunkedError::InvalidRange { .. } => FailureKind::Other,
    }
}

/// The last [`FOLDER_DEPTH`] directory names above the file, outermost
/// first. `None` when the path is not that deep.
pub fn derive_folder_path(path: &Path) -> Option<Vec<String>> {
    let parent = path.parent()?;
    let segments = parent
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>();

    if segments.len() < FOLDER_DEPTH {
        return None;
    }
    Some(segments[segments.len() - FOLDER_DEPTH..].to_vec())
}

/// A 409 payload entry that is byte-for-byte the file we meant to upload.
fn matching_conflict(
    err: &ApiError,
    size: u64,
    digest: &ContentDigest,
    folder_id: &str,
) -> Option<RemoteFileHandle> {
    let hex = digest.to_hex();
    err.conflicts()
        .into_iter()
        .filter(|entry| entry.is_file())
        .find(|entry| {
            entry.size == Some(size)
                && entry
                    .sha1
                    .as_deref()
                    .is_some_and(|sha1| sha1.eq_ignore_ascii_case(&hex))
        })
        .map(|entry| RemoteFileHandle {
            id: entry.id,
            folder_id: folder_id.to_string(),
            name: entry.name,
            size,
            sha1: Some(hex),
            created_at: None,
        })
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    api: ApiClient,
    chunked: ChunkedUploadClient,
    store: Arc<dyn ResumeStore>,
    reporter: Arc<dyn TransferReporter>,
    options: UploadOptions,
}

impl UploadOrchestrator {
    pub fn new(
        api: ApiClient,
        chunked: ChunkedUploadClient,
        store: Arc<dyn ResumeStore>,
        reporter: Arc<dyn TransferReporter>,
        options: UploadOptions,
    ) -> Self {
        Self {
            api,
            chunked,
            store,
            reporter,
            options,
        }
    }

    /// Upload `local_path` for `owner`, tracked under `logical_id`.
    pub async fn upload(
        &self,
        local_path: &Path,
        owner: &str,
        logical_id: &str,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let span = info_span!("upload", logical_id, owner);
        let outcome = self
            .run(local_path, owner, logical_id, progress, cancel)
            .instrument(span)
            .await;
        self.reporter.outcome(&outcome);
        outcome
    }

    async fn run(
        &self,
        local_path: &Path,
        owner: &str,
        logical_id: &str,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let started = Instant::now();

        let record = match self.store.get(logical_id).await {
            Ok(record) => record,
            Err(err) => {
                let err = UploadError::from(err);
                return TransferOutcome::failed(
                    logical_id,
                    err.failure_kind(),
                    err.to_string(),
                    started.elapsed(),
                    0,
                );
            }
        };
        let retries = record.as_ref().map_or(0, |r| r.attempts);

        if let Some(record) = &record {
            if record.completed {
                if let Some(file) = self.verify_previous(record, cancel).await {
                    info!(file_id = %file.id, "verified earlier upload; skipping");
                    let mut tracker = ProgressTracker::new(logical_id, progress, &*self.reporter);
                    tracker.set_total(file.size);
                    tracker.phase(Phase::Completed);
                    return TransferOutcome::skipped(logical_id, file, retries);
                }
            } else if record.attempts > 0
                && !self.options.retry_gate.is_eligible(record, Utc::now())
            {
                let err = UploadError::Deferred(format!(
                    "{} of {} attempts used, last at {}",
                    record.attempts,
                    self.options.retry_gate.max_attempts,
                    record
                        .last_attempt_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "unknown".into()),
                ));
                debug!(error = %err, "not eligible for retry");
                return TransferOutcome::failed(
                    logical_id,
                    err.failure_kind(),
                    err.to_string(),
                    Duration::ZERO,
                    retries,
                );
            }
        }

        let mut tracker = ProgressTracker::new(logical_id, progress, &*self.reporter);
        let result = self
            .transfer(local_path, owner, logical_id, &mut tracker, cancel)
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(file) => match self.store.mark_completed(logical_id, &file).await {
                Ok(()) => TransferOutcome::succeeded(logical_id, file, elapsed, retries),
                Err(err) => {
                    // The remote file is complete; only the bookkeeping is
                    // missing. A later run finds it again through the 409.
                    warn!(error = %err, file_id = %file.id, "could not record completed upload");
                    let err = UploadError::from(err);
                    TransferOutcome {
                        error: Some(err.to_string()),
                        failure: Some(err.failure_kind()),
                        ..TransferOutcome::succeeded(logical_id, file, elapsed, retries)
                    }
                }
            },
            Err(err) => {
                tracker.phase(Phase::Failed);
                let message = err.to_string();
                if let Err(store_err) = self.store.mark_failed(logical_id, &message).await {
                    warn!(error = %store_err, "could not record failed upload");
                }
                TransferOutcome::failed(logical_id, err.failure_kind(), message, elapsed, retries)
            }
        }
    }

    /// The earlier upload, if it still exists with the recorded size.
    async fn verify_previous(
        &self,
        record: &ResumeRecord,
        cancel: &CancellationToken,
    ) -> Option<RemoteFileHandle> {
        let Some(file_id) = record.file_id.as_deref() else {
            debug!("completed record has no file id; uploading again");
            return None;
        };

        match self.api.get_file(file_id, cancel).await {
            Ok(file) => {
                if let Some(expected) = record.file_size {
                    if file.size != expected {
                        info!(
                            file_id,
                            expected,
                            actual = file.size,
                            "remote size differs from recorded size; uploading again"
                        );
                        return None;
                    }
                }
                let mut handle = RemoteFileHandle::from(file);
                if handle.folder_id.is_empty() {
                    handle.folder_id = record.folder_id.clone().unwrap_or_default();
                }
                Some(handle)
            }
            Err(err) if err.is_not_found() => {
                info!(file_id, "earlier upload no longer exists; uploading again");
                None
            }
            Err(err) => {
                warn!(file_id, error = %err, "could not verify earlier upload; uploading again");
                None
            }
        }
    }

    async fn transfer(
        &self,
        local_path: &Path,
        owner: &str,
        logical_id: &str,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<RemoteFileHandle, UploadError> {
        let io_err = |source| UploadError::Io {
            path: local_path.to_path_buf(),
            source,
        };
        let metadata = tokio::fs::metadata(local_path).await.map_err(io_err)?;
        if !metadata.is_file() {
            return Err(UploadError::NotAFile(local_path.to_path_buf()));
        }
        let size = metadata.len();
        tracker.set_total(size);

        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::NotAFile(local_path.to_path_buf()))?;
        let segments = derive_folder_path(local_path)
            .ok_or_else(|| UploadError::FolderPath(local_path.to_path_buf()))?;

        tracker.phase(Phase::CreatingFolders);
        let folder_id = self
            .api
            .resolve_folder_path(&self.options.base_folder_id, &segments, cancel)
            .await
            .map_err(|source| UploadError::Folder {
                path: segments.join("/"),
                source,
            })?;
        self.store.mark_started(logical_id, &folder_id).await?;

        tracker.phase(Phase::Uploading);
        // Sessions reject anything below the client's threshold, so the
        // strategy follows the same value.
        let file = if size >= self.chunked.threshold() {
            info!(size, folder_id = %folder_id, "chunked upload");
            self.chunked_transfer(local_path, &name, &folder_id, size, tracker, cancel)
                .await?
        } else {
            info!(size, folder_id = %folder_id, "simple upload");
            self.simple_transfer(local_path, &name, &folder_id, size, tracker, cancel)
                .await?
        };

        if let Some(role) = &self.options.share_role {
            tracker.phase(Phase::SettingPermissions);
            if let Err(err) = self
                .api
                .add_collaborator(&folder_id, owner, role, cancel)
                .await
            {
                warn!(folder_id = %folder_id, owner, error = %err, "could not share folder with owner");
            }
        }

        tracker.phase(Phase::Completed);
        Ok(file)
    }

    async fn simple_transfer(
        &self,
        local_path: &Path,
        name: &str,
        folder_id: &str,
        size: u64,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<RemoteFileHandle, UploadError> {
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|source| UploadError::Io {
                path: local_path.to_path_buf(),
                source,
            })?;
        if content.len() as u64 != size {
            return Err(UploadError::SizeChanged {
                path: local_path.to_path_buf(),
                expected: size,
                actual: content.len() as u64,
            });
        }

        let content = Bytes::from(content);
        let digest = ContentDigest::of(&content);
        let attributes = FileAttributes::new(name, folder_id);

        match self
            .api
            .upload_file(&attributes, content, &digest, cancel)
            .await
        {
            Ok(file) => {
                tracker.advance(size);
                let mut handle = RemoteFileHandle::from(file);
                if handle.folder_id.is_empty() {
                    handle.folder_id = folder_id.to_string();
                }
                Ok(handle)
            }
            Err(err) if err.is_conflict() => {
                match matching_conflict(&err, size, &digest, folder_id) {
                    Some(existing) => {
                        info!(file_id = %existing.id, "identical file already present; reusing");
                        tracker.advance(size);
                        Ok(existing)
                    }
                    None => Err(UploadError::Transfer(err)),
                }
            }
            Err(err) if err.is_cancelled() => Err(UploadError::Cancelled),
            Err(err) => Err(UploadError::Transfer(err)),
        }
    }

    async fn chunked_transfer(
        &self,
        local_path: &Path,
        name: &str,
        folder_id: &str,
        size: u64,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<RemoteFileHandle, UploadError> {
        let mut session = match self
            .chunked
            .create_session(name, folder_id, size, cancel)
            .await
        {
            Ok(session) => session,
            Err(ChunkedError::Api(err)) if err.is_conflict() => {
                let digest = digest_file(local_path)
                    .await
                    .map_err(|source| UploadError::Io {
                        path: local_path.to_path_buf(),
                        source,
                    })?;
                return match matching_conflict(&err, size, &digest, folder_id) {
                    Some(existing) => {
                        info!(file_id = %existing.id, "identical file already present; reusing");
                        tracker.advance(size);
                        Ok(existing)
                    }
                    None => Err(UploadError::Session(ChunkedError::Api(err))),
                };
            }
            Err(err) => return Err(UploadError::Session(err)),
        };

        let (records, digest) = match self
            .upload_parts(&mut session, local_path, tracker, cancel)
            .await
        {
            Ok(uploaded) => uploaded,
            Err(err) => {
                self.abort_quietly(&mut session).await;
                return Err(err);
            }
        };

        let attributes = FileAttributes::new(name, folder_id);
        self.commit(&mut session, &records, &attributes, &digest, cancel)
            .await
            .map(|mut file| {
                if file.folder_id.is_empty() {
                    file.folder_id = folder_id.to_string();
                }
                file
            })
    }

    /// Stream the file through the session one part-size window at a time.
    /// Returns the validated manifest and the whole-file digest.
    async fn upload_parts(
        &self,
        session: &mut UploadSession,
        local_path: &Path,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<PartRecord>, ContentDigest), UploadError> {
        let io_err = |source| UploadError::Io {
            path: local_path.to_path_buf(),
            source,
        };
        let mut file = File::open(local_path).await.map_err(io_err)?;
        let total = session.total_size;
        let mut whole = DigestWriter::new();
        let mut records = Vec::new();
        let mut offset = 0u64;

        while offset < total {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            let len = session.part_size.min(total - offset);
            let mut window = vec![0u8; len as usize];
            file.read_exact(&mut window).await.map_err(|source| {
                if source.kind() == io::ErrorKind::UnexpectedEof {
                    UploadError::SizeChanged {
                        path: local_path.to_path_buf(),
                        expected: total,
                        actual: offset,
                    }
                } else {
                    io_err(source)
                }
            })?;
            whole.update(&window);

            let record = self
                .chunked
                .upload_part(session, Bytes::from(window), offset, cancel)
                .await
                .map_err(|source| {
                    if matches!(&source, ChunkedError::Api(err) if err.is_cancelled()) {
                        UploadError::Cancelled
                    } else {
                        UploadError::Part { offset, source }
                    }
                })?;
            debug!(session_id = %session.id, offset, len, "part done");
            records.push(record);
            tracker.advance(len);
            offset += len;
        }

        validate_parts(&records, total)?;
        Ok((records, whole.finish()))
    }

    async fn commit(
        &self,
        session: &mut UploadSession,
        records: &[PartRecord],
        attributes: &FileAttributes,
        digest: &ContentDigest,
        cancel: &CancellationToken,
    ) -> Result<RemoteFileHandle, UploadError> {
        for poll in 0..=self.options.commit_poll_attempts {
            match self
                .chunked
                .commit_session(session, records, attributes, digest, cancel)
                .await
            {
                Ok(CommitOutcome::Committed(file)) => return Ok(file),
                Ok(CommitOutcome::Processing { retry_after }) => {
                    let delay = retry_after.unwrap_or(self.options.commit_poll_delay);
                    debug!(
                        session_id = %session.id,
                        poll,
                        delay_ms = delay.as_millis() as u64,
                        "commit still processing"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(ChunkedError::Integrity(err)) => {
                    self.abort_quietly(session).await;
                    return Err(UploadError::Integrity(err));
                }
                Err(err) => return Err(UploadError::Commit(err)),
            }
        }
        Err(UploadError::CommitPending(session.id.clone()))
    }

    /// Abort with a fresh token so a cancelled transfer still cleans up.
    async fn abort_quietly(&self, session: &mut UploadSession) {
        let token = CancellationToken::new();
        match tokio::time::timeout(ABORT_TIMEOUT, self.chunked.abort_session(session, &token)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(session_id = %session.id, error = %err, "abort failed"),
            Err(_) => warn!(session_id = %session.id, "abort timed out"),
        }
    }
}
