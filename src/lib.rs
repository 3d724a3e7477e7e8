//! Uploads recorded media into a cloud file service.
//!
//! Items land under `<base>/<year>/<month>/<day>` mirrored from the local
//! path. Large files go through chunked upload sessions, small ones through
//! a single multipart request. Resume state in SQLite lets a later run skip
//! items that are already safely stored.

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub use errors::{ApiError, AuthError};
pub use models::outcome::{FailureKind, Phase, TransferOutcome};
pub use services::{
    auth::Authenticator,
    orchestrator::{UploadOptions, UploadOrchestrator},
    resume_store::{ResumeStore, SqliteResumeStore},
};
