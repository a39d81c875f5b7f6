//! Core identifiers and closed enumerations shared by the manager and by
//! worker-side code.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a worker link. `0` is reserved for the manager itself and
/// is never a valid dispatch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u16);

impl WorkerId {
    pub const MANAGER: WorkerId = WorkerId(0);

    pub fn is_manager(&self) -> bool {
        *self == Self::MANAGER
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// The two calculation kinds a work order or a worker result can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalcType {
    Sim,
    Gen,
}

impl fmt::Display for CalcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalcType::Sim => write!(f, "sim"),
            CalcType::Gen => write!(f, "gen"),
        }
    }
}

/// The full message-tag vocabulary exchanged on a worker link. Kept as one
/// closed enumeration so manager and worker code never re-declare the
/// constants separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    EvalSim,
    EvalGen,
    Stop,
    Unset,
    FinishedPersistentSim,
    FinishedPersistentGen,
    ManSignalFinish,
    ManSignalKill,
    ManSignalReqResend,
    ManSignalReqPickleDump,
    WorkerKill,
    WorkerKillOnErr,
    WorkerKillOnTimeout,
    JobFailed,
    WorkerDone,
    CalcException,
    AbortEnsemble,
    /// The companion data-slice message that always follows a work order
    /// with non-empty rows (tag `0` in the wire vocabulary).
    DataSlice,
}

impl From<CalcType> for Tag {
    fn from(value: CalcType) -> Self {
        match value {
            CalcType::Sim => Tag::EvalSim,
            CalcType::Gen => Tag::EvalGen,
        }
    }
}

/// Closed set of statuses a worker may report back for a completed
/// calculation. Anything outside this set is an invariant violation
/// (§7 kind 3 in the design).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalcStatus {
    Unset,
    FinishedPersistentSim,
    FinishedPersistentGen,
    ManSignalFinish,
    ManSignalKill,
    WorkerKillOnErr,
    WorkerKillOnTimeout,
    WorkerKill,
    JobFailed,
    WorkerDone,
}

impl CalcStatus {
    /// Human string used by the calculation-statistics summary file.
    pub fn describe(&self) -> &'static str {
        match self {
            CalcStatus::Unset => "Unknown status",
            CalcStatus::FinishedPersistentSim => "Finished persistent sim",
            CalcStatus::FinishedPersistentGen => "Finished persistent gen",
            CalcStatus::ManSignalFinish => "Manager signaled finish",
            CalcStatus::ManSignalKill => "Manager killed job",
            CalcStatus::WorkerKillOnErr => "Worker killed job on error",
            CalcStatus::WorkerKillOnTimeout => "Worker killed job on timeout",
            CalcStatus::WorkerKill => "Worker killed",
            CalcStatus::JobFailed => "Job failed",
            CalcStatus::WorkerDone => "Completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_display_and_manager() {
        assert!(WorkerId::MANAGER.is_manager());
        assert!(!WorkerId(1).is_manager());
        assert_eq!(format!("{}", WorkerId(3)), "worker-3");
    }

    #[test]
    fn calc_type_to_tag() {
        assert_eq!(Tag::from(CalcType::Sim), Tag::EvalSim);
        assert_eq!(Tag::from(CalcType::Gen), Tag::EvalGen);
    }
}
