//! Structured lifecycle events for program executions.
//!
//! - [`execution_span`] scopes every event of one run under its execution id
//!   and a digest of the submitted code; [`ExecutionSpan`] enters it for
//!   synchronous callers.
//! - `emit_*` functions log the lifecycle: started, stage rejected, timeout,
//!   serialization fallback, finished.
//!
//! Source text is never logged, only its SHA-256 digest.

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::FailureStage;

/// Span tagged with the execution id and code digest. Async callers attach
/// it with `tracing::Instrument`.
pub fn execution_span(execution_id: &str, code: &str) -> tracing::Span {
    tracing::info_span!(
        "codemode.execution",
        execution_id = %execution_id,
        code_digest = %code_digest(code),
    )
}

/// RAII guard entering an execution-scoped span.
///
/// ```ignore
/// let _span = ExecutionSpan::enter(&execution_id, &code);
/// // every event below carries execution_id and code_digest
/// ```
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    pub fn enter(execution_id: &str, code: &str) -> Self {
        Self {
            _span: execution_span(execution_id, code).entered(),
        }
    }
}

/// Hex SHA-256 of the program text.
pub fn code_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

pub fn emit_execution_started(execution_id: &str, description: &str, timeout_ms: u64) {
    info!(
        event = "execution.started",
        execution_id = %execution_id,
        description = %description,
        timeout_ms = timeout_ms,
    );
}

/// A stage refused the program; nothing after it ran.
pub fn emit_stage_rejected(execution_id: &str, stage: FailureStage, error: &dyn std::fmt::Display) {
    info!(
        event = "execution.rejected",
        execution_id = %execution_id,
        stage = %stage,
        error = %error,
    );
}

pub fn emit_timeout(execution_id: &str, timeout_ms: u64) {
    tracing::warn!(event = "execution.timeout", execution_id = %execution_id, timeout_ms = timeout_ms);
}

/// A value could not round-trip through JSON and was rendered as text.
pub fn emit_serialization_fallback(reason: &dyn std::fmt::Display) {
    tracing::warn!(event = "serialization.fallback", reason = %reason);
}

pub fn emit_execution_finished(execution_id: &str, elapsed_ms: u64, success: bool) {
    info!(
        event = "execution.finished",
        execution_id = %execution_id,
        elapsed_ms = elapsed_ms,
        success = success,
    );
}
