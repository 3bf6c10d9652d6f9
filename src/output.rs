//! JSON Output Envelope Types
//!
//! Every CLI command prints exactly one envelope on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! Messages never carry passwords; statements are rendered redacted.

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// Success envelope, generic over the command's payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true
    pub ok: bool,

    /// Command that was executed (plan, apply, read, ...)
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

/// Error envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false
    pub ok: bool,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    pub fn from_error(command: impl Into<String>, err: &ReconcileError) -> Self {
        Self::new(command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

/// Stable error code plus a human-readable message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// e.g. `VALIDATION_ERROR`, `STATEMENT_FAILED`
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in every success envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub execution_ms: u64,

    /// Statements committed, for mutating commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statements_applied: Option<usize>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, statements_applied: None }
    }

    #[must_use]
    pub const fn with_statements(execution_ms: u64, statements_applied: usize) -> Self {
        Self { execution_ms, statements_applied: Some(statements_applied) }
    }
}
