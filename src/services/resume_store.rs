//! Resume state, i.e. what earlier runs know about each logical item.
//!
//! The orchestrator only needs a narrow interface ([`ResumeStore`]);
//! [`SqliteResumeStore`] implements it on an SQLite pool. SQLite serializes
//! writers, which gives the per-item read-your-writes behaviour the
//! orchestrator relies on within one process.

use chrono::{DateTime, Utc};
use futures::{FutureExt, future::BoxFuture};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::{object::RemoteFileHandle, resume::ResumeRecord};

const MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum ResumeStoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type ResumeResult<T> = Result<T, ResumeStoreError>;

/// Persisted per-item state, as the orchestrator sees it.
///
/// Attempts are counted when they finish: `mark_completed` and
/// `mark_failed` each add one, `mark_started` only records the folder and
/// the start time.
pub trait ResumeStore: Send + Sync {
    fn get<'a>(&'a self, logical_id: &'a str) -> BoxFuture<'a, ResumeResult<Option<ResumeRecord>>>;

    /// Overwrite the whole record.
    fn put<'a>(&'a self, record: &'a ResumeRecord) -> BoxFuture<'a, ResumeResult<()>>;

    fn mark_started<'a>(
        &'a self,
        logical_id: &'a str,
        folder_id: &'a str,
    ) -> BoxFuture<'a, ResumeResult<()>>;

    fn mark_completed<'a>(
        &'a self,
        logical_id: &'a str,
        file: &'a RemoteFileHandle,
    ) -> BoxFuture<'a, ResumeResult<()>>;

    fn mark_failed<'a>(
        &'a self,
        logical_id: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, ResumeResult<()>>;
}

#[derive(FromRow, Debug)]
struct ResumeRow {
    logical_id: String,
    completed: bool,
    file_id: Option<String>,
    folder_id: Option<String>,
    file_size: Option<i64>,
    last_attempt_at: Option<DateTime<Utc>>,
    attempts: i64,
    last_error: Option<String>,
}

impl From<ResumeRow> for ResumeRecord {
    fn from(row: ResumeRow) -> Self {
        Self {
            logical_id: row.logical_id,
            completed: row.completed,
            file_id: row.file_id,
            folder_id: row.folder_id,
            file_size: row.file_size.and_then(|s| u64::try_from(s).ok()),
            last_attempt_at: row.last_attempt_at,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            last_error: row.last_error,
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Clone, Debug)]
pub struct SqliteResumeStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqliteResumeStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema statement by statement.
    pub async fn migrate(&self) -> ResumeResult<()> {
        let statements = MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    async fn fetch(&self, logical_id: &str) -> ResumeResult<Option<ResumeRecord>> {
        let row = sqlx::query_as::<_, ResumeRow>(
            "SELECT logical_id, completed, file_id, folder_id, file_size,
                    last_attempt_at, attempts, last_error
             FROM resume_records WHERE logical_id = ?",
        )
        .bind(logical_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row.map(ResumeRecord::from))
    }

    async fn upsert(&self, record: &ResumeRecord) -> ResumeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_records (
                logical_id, completed, file_id, folder_id, file_size,
                last_attempt_at, attempts, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(logical_id) DO UPDATE SET
                completed = excluded.completed,
                file_id = excluded.file_id,
                folder_id = excluded.folder_id,
                file_size = excluded.file_size,
                last_attempt_at = excluded.last_attempt_at,
                attempts = excluded.attempts,
                last_error = excluded.last_error
            "#,
        )
        .bind(&record.logical_id)
        .bind(record.completed)
        .bind(&record.file_id)
        .bind(&record.folder_id)
        .bind(record.file_size.map(to_i64))
        .bind(record.last_attempt_at)
        .bind(i64::from(record.attempts))
        .bind(&record.last_error)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn started(&self, logical_id: &str, folder_id: &str) -> ResumeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_records (logical_id, completed, folder_id, last_attempt_at, attempts)
            VALUES (?, 0, ?, ?, 0)
            ON CONFLICT(logical_id) DO UPDATE SET
                completed = 0,
                folder_id = excluded.folder_id,
                last_attempt_at = excluded.last_attempt_at
            "#,
        )
        .bind(logical_id)
        .bind(folder_id)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn completed(&self, logical_id: &str, file: &RemoteFileHandle) -> ResumeResult<()> {
        let folder_id = Some(file.folder_id.as_str()).filter(|id| !id.is_empty());
        sqlx::query(
            r#"
            INSERT INTO resume_records (
                logical_id, completed, file_id, folder_id, file_size,
                last_attempt_at, attempts, last_error
            ) VALUES (?, 1, ?, ?, ?, ?, 1, NULL)
            ON CONFLICT(logical_id) DO UPDATE SET
                completed = 1,
                file_id = excluded.file_id,
                folder_id = COALESCE(excluded.folder_id, resume_records.folder_id),
                file_size = excluded.file_size,
                last_attempt_at = excluded.last_attempt_at,
                attempts = resume_records.attempts + 1,
                last_error = NULL
            "#,
        )
        .bind(logical_id)
        .bind(&file.id)
        .bind(folder_id)
        .bind(to_i64(file.size))
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn failed(&self, logical_id: &str, error: &str) -> ResumeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_records (logical_id, completed, last_attempt_at, attempts, last_error)
            VALUES (?, 0, ?, 1, ?)
            ON CONFLICT(logical_id) DO UPDATE SET
                completed = 0,
                last_attempt_at = excluded.last_attempt_at,
                attempts = resume_records.attempts + 1,
                last_error = excluded.last_error
            "#,
        )
        .bind(logical_id)
        .bind(Utc::now())
        .bind(error)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

impl ResumeStore for SqliteResumeStore {
    fn get<'a>(&'a self, logical_id: &'a str) -> BoxFuture<'a, ResumeResult<Option<ResumeRecord>>> {
        self.fetch(logical_id).boxed()
    }

    fn put<'a>(&'a self, record: &'a ResumeRecord) -> BoxFuture<'a, ResumeResult<()>> {
        self.upsert(record).boxed()
    }

    fn mark_started<'a>(
        &'a self,
        logical_id: &'a str,
        folder_id: &'a str,
    ) -> BoxFuture<'a, ResumeResult<()>> {
        self.started(logical_id, folder_id).boxed()
    }

    fn mark_completed<'a>(
        &'a self,
        logical_id: &'a str,
        file: &'a RemoteFileHandle,
    ) -> BoxFuture<'a, ResumeResult<()>> {
        self.completed(logical_id, file).boxed()
    }

    fn mark_failed<'a>(
        &'a self,
        logical_id: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, ResumeResult<()>> {
        self.failed(logical_id, error).boxed()
    }
}
