//! Convergence Verifier
//!
//! After a commit the affected identity is re-read and diffed against the
//! desired state once more. Anything that diff would still emit is drift:
//! a bug in the engine, reported and logged but never applied in a second
//! pass.

use serde::Serialize;
use tracing::error;

use crate::error::{ReconcileError, Result};
use crate::statement::Plan;

/// Outcome of a create or update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciled<T> {
    /// Identity after the operation (a rename changes it)
    pub id: String,
    /// State re-read after commit
    pub observed: T,
    /// Statements applied in the transaction
    pub applied: usize,
    /// Redacted statements a fresh diff still emits; empty on convergence
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<String>,
}

impl<T> Reconciled<T> {
    #[must_use]
    pub fn converged(&self) -> bool {
        self.drift.is_empty()
    }
}

/// Check re-read state against the desired state
///
/// `replan` diffs the re-read state against the desired state. A missing
/// object after commit is reported as `NotFound`.
pub fn verify<T>(
    kind: &str,
    id: &str,
    applied: usize,
    observed: Option<T>,
    replan: impl FnOnce(&T) -> Result<Plan>,
) -> Result<Reconciled<T>> {
    let Some(observed) = observed else {
        error!(kind, id, "object missing after commit");
        return Err(ReconcileError::not_found(format!("{kind} '{id}' not found after commit")));
    };

    let drift = replan(&observed)?.redacted();
    if !drift.is_empty() {
        error!(kind, id, drift = ?drift, "catalog did not converge to desired state");
    }

    Ok(Reconciled { id: id.to_string(), observed, applied, drift })
}
