//! Core data models for the uploader.
//!
//! Credentials, remote items, chunked sessions, resume state and attempt
//! outcomes. Wire-facing types derive `serde` traits so they decode straight
//! from the remote API's JSON.

pub mod credential;
pub mod multipart;
pub mod object;
pub mod outcome;
pub mod resume;
