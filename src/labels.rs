//! Label synchronization: make exactly one status label reflect the phase.
//!
//! Eventually-reconciling, not transactional. A crash mid-sync can leave the
//! tracker's label set inconsistent, but the algorithm is idempotent, so the
//! next sync converges back to a single status label.

use std::sync::Arc;

use tracing::{info, warn};

use crate::github::TicketBackend;
use crate::phase::{STATUS_LABEL_PREFIX, WorkflowPhase};

/// Colors for the status label set, used when creating missing labels.
const LABEL_COLORS: &[(&str, &str)] = &[
    ("status:new", "0052cc"),
    ("status:specs-ready", "fbca04"),
    ("status:plans-ready", "f9a825"),
    ("status:tests-designed", "c5def5"),
    ("status:implementing", "1d76db"),
    ("status:in-review", "7057ff"),
    ("status:approved", "0e8a16"),
    ("status:done", "0e8a16"),
    ("status:cancelled", "d93f0b"),
];

/// Outcome status of one sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Target label added, no removal failures.
    Success,
    /// Target label added, but some stale labels could not be removed.
    Partial,
    /// The add itself failed.
    Failure,
}

/// Outcome of one sync operation, including accumulated removal failures.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub status: OperationStatus,
    pub message: String,
    pub errors: Vec<String>,
}

/// Reconciles tracker labels with the current workflow phase.
pub struct LabelSync {
    backend: Arc<dyn TicketBackend>,
}

impl LabelSync {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self { backend }
    }

    /// Make the tracker carry exactly the status label for `phase`.
    ///
    /// Removes every `status:`-prefixed label other than the target,
    /// collecting (not aborting on) individual failures, then adds the
    /// target. Only an add failure makes the operation a `Failure`.
    pub async fn sync_labels(&self, feature_id: u64, phase: WorkflowPhase) -> OperationResult {
        let target = phase.status_label();
        let mut errors: Vec<String> = Vec::new();

        match self.backend.get_labels(feature_id).await {
            Ok(labels) => {
                for label in labels {
                    if label.starts_with(STATUS_LABEL_PREFIX) && label != target {
                        if let Err(e) = self.backend.remove_label(feature_id, &label).await {
                            warn!(feature_id, label = %label, error = %e, "label removal failed");
                            errors.push(format!("Failed to remove {label}: {e}"));
                        }
                    }
                }
            }
            Err(e) => {
                // Still try the add; the next sync will retry removals.
                warn!(feature_id, error = %e, "failed to fetch existing labels");
                errors.push(format!("Failed to fetch labels: {e}"));
            }
        }

        if let Err(e) = self.backend.add_label(feature_id, target).await {
            errors.push(format!("Failed to add {target}: {e}"));
            return OperationResult {
                status: OperationStatus::Failure,
                message: format!("Failed to add label {target}"),
                errors,
            };
        }

        info!(feature_id, label = target, "status label synced");
        if errors.is_empty() {
            OperationResult {
                status: OperationStatus::Success,
                message: format!("Synced label to {target}"),
                errors,
            }
        } else {
            OperationResult {
                status: OperationStatus::Partial,
                message: "Labels synced with some errors".to_string(),
                errors,
            }
        }
    }

    /// Ensure the whole status label set exists in the repository.
    pub async fn ensure_labels_exist(&self) -> OperationResult {
        let mut errors = Vec::new();
        for (name, color) in LABEL_COLORS {
            if let Err(e) = self.backend.create_label(name, color).await {
                errors.push(format!("{name}: {e}"));
            }
        }

        if errors.is_empty() {
            OperationResult {
                status: OperationStatus::Success,
                message: "All status labels ensured".to_string(),
                errors,
            }
        } else {
            OperationResult {
                status: OperationStatus::Partial,
                message: "Some labels could not be created".to_string(),
                errors,
            }
        }
    }
}
