//! Progress callbacks and transfer reporters.

use tracing::{info, warn};

use crate::models::outcome::{Phase, TransferOutcome};

/// Called with `(bytes_done, bytes_total, phase)`.
pub type ProgressFn = dyn Fn(u64, u64, Phase) + Send + Sync;

/// Receives phase changes and final outcomes of transfers.
pub trait TransferReporter: Send + Sync {
    fn phase(&self, _logical_id: &str, _phase: Phase) {}

    fn outcome(&self, _outcome: &TransferOutcome) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl TransferReporter for NoopReporter {}

/// Logs every event, then forwards it to `inner`.
#[derive(Debug, Default, Clone)]
pub struct LoggingReporter<R> {
    inner: R,
}

impl<R: TransferReporter> LoggingReporter<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: TransferReporter> TransferReporter for LoggingReporter<R> {
    fn phase(&self, logical_id: &str, phase: Phase) {
        info!(logical_id, phase = %phase, "transfer phase");
        self.inner.phase(logical_id, phase);
    }

    fn outcome(&self, outcome: &TransferOutcome) {
        if outcome.success {
            info!(
                logical_id = %outcome.logical_id,
                skipped = outcome.skipped,
                file_id = outcome.file.as_ref().map(|f| f.id.as_str()),
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                retries = outcome.retries,
                "transfer succeeded"
            );
        } else {
            warn!(
                logical_id = %outcome.logical_id,
                failure = ?outcome.failure,
                error = outcome.error.as_deref(),
                retries = outcome.retries,
                "transfer failed"
            );
        }
        self.inner.outcome(outcome);
    }
}

/// Byte accounting for one transfer; fans phases out to the reporter and
/// the caller's progress callback.
pub(crate) struct ProgressTracker<'a> {
    logical_id: &'a str,
    callback: Option<&'a ProgressFn>,
    reporter: &'a dyn TransferReporter,
    done: u64,
    total: u64,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(
        logical_id: &'a str,
        callback: Option<&'a ProgressFn>,
        reporter: &'a dyn TransferReporter,
    ) -> Self {
        Self {
            logical_id,
            callback,
            reporter,
            done: 0,
            total: 0,
        }
    }

    pub(crate) fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub(crate) fn phase(&mut self, phase: Phase) {
        if phase == Phase::Completed {
            self.done = self.total;
        }
        self.reporter.phase(self.logical_id, phase);
        self.notify(phase);
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        self.done = (self.done + bytes).min(self.total);
        self.notify(Phase::Uploading);
    }

    fn notify(&self, phase: Phase) {
        if let Some(callback) = self.callback {
            callback(self.done, self.total, phase);
        }
    }
}
