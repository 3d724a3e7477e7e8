pub mod api_client;
pub mod assertion;
pub mod auth;
pub mod chunked_upload;
pub mod digest;
pub mod orchestrator;
pub mod resume_store;
pub mod retry;
pub mod telemetry;
pub mod transport;
