//! Error taxonomy for the coordinator.
//!
//! Every fallible path in the crate returns one of these variants; there is
//! no panic-based control flow on a user-reachable path. The outer CLI
//! entry point is the only place a `Result` is turned into a process exit
//! code (see `src/bin/ensemble.rs`).

use crate::types::WorkerId;
use thiserror::Error;

/// Result type alias used throughout the coordinator.
pub type EnsembleResult<T> = Result<T, EnsembleError>;

#[derive(Error, Debug)]
pub enum EnsembleError {
    // --- kind 1: user-config error, detected at startup ---
    #[error("unknown comms backend: {0}")]
    UnknownComms(String),

    #[error("missing required configuration key: {0}")]
    MissingSpecKey(String),

    #[error("inconsistent field declaration: {0}")]
    InconsistentFields(String),

    #[error("config error: {0}")]
    Config(String),

    // --- kind 2: allocation violation ---
    #[error("work order targets worker 0 (the manager), which can never receive work")]
    TargetIsManager,

    #[error("allocation function requested work for worker {0} which is not idle")]
    WorkerBusy(WorkerId),

    #[error("allocation function requested work for unknown worker {0}")]
    UnknownWorker(WorkerId),

    #[error("allocation function requested unknown history field: {0}")]
    UnknownField(String),

    #[error("allocation function requested row {0}, but history has only {1} rows")]
    RowOutOfRange(usize, usize),

    // --- history invariants ---
    #[error("row {0}: {1}")]
    HistoryInvariant(usize, String),

    #[error("sim_id collision at row {0}")]
    SimIdCollision(usize),

    #[error("history capacity exceeded: {0} rows requested, capacity is {1}")]
    CapacityExceeded(usize, usize),

    #[error("column type mismatch on field '{0}'")]
    ColumnTypeMismatch(String),

    // --- kind 3: invariant violation on worker message ---
    #[error("unknown calc_type received from worker {0}")]
    UnknownCalcType(WorkerId),

    #[error("unknown calc_status received from worker {0}")]
    UnknownCalcStatus(WorkerId),

    // --- kind 4: transport error on receive ---
    #[error("transport error on worker {0}: {1}")]
    Transport(WorkerId, String),

    // --- kind 5: explicit worker abort ---
    #[error("worker {0} raised ABORT_ENSEMBLE")]
    WorkerAbort(WorkerId),

    // --- ambient stack ---
    #[error("snapshot I/O error: {0}")]
    Snapshot(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EnsembleError {
    /// Whether this error originates from the allocation adapter's
    /// validation of a user-supplied work order (§4.5 / §7 kind 2).
    pub fn is_allocation_violation(&self) -> bool {
        matches!(
            self,
            EnsembleError::TargetIsManager
                | EnsembleError::WorkerBusy(_)
                | EnsembleError::UnknownWorker(_)
                | EnsembleError::UnknownField(_)
                | EnsembleError::RowOutOfRange(_, _)
        )
    }
}

impl From<bincode::Error> for EnsembleError {
    fn from(e: bincode::Error) -> Self {
        EnsembleError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for EnsembleError {
    fn from(e: serde_json::Error) -> Self {
        EnsembleError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_violation_classification() {
        assert!(EnsembleError::TargetIsManager.is_allocation_violation());
        assert!(EnsembleError::WorkerBusy(WorkerId(2)).is_allocation_violation());
        assert!(!EnsembleError::SimIdCollision(4).is_allocation_violation());
    }
}
