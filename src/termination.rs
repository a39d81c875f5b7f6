//! The termination evaluator: stateless tests over the history and the
//! wall clock, checked in a fixed priority order (§4.4).

use serde::{Deserialize, Serialize};

use crate::history::HistoryTable;

/// Recognized exit criteria keys (§6 configuration). Any key left `None`
/// never trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitCriteria {
    pub elapsed_wallclock_time: Option<f64>,
    pub sim_max: Option<usize>,
    pub gen_max: Option<usize>,
    /// `(field, threshold)`: trips when any non-NaN value in `field` falls
    /// at or below `threshold`.
    pub stop_val: Option<(String, f64)>,
}

/// The three possible outcomes of `term_test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitFlag {
    Clean = 0,
    Tripped = 1,
    Wallclock = 2,
}

impl ExitFlag {
    pub fn code(self) -> u8 {
        self as u8
    }
}

pub struct TerminationEvaluator<'a> {
    criteria: &'a ExitCriteria,
}

impl<'a> TerminationEvaluator<'a> {
    pub fn new(criteria: &'a ExitCriteria) -> Self {
        Self { criteria }
    }

    /// Evaluate every configured test in priority order: wallclock first
    /// (exit flag 2), then `sim_max`/`gen_max`/`stop_val` (exit flag 1).
    /// The first test that trips wins; absent tests are skipped entirely.
    pub fn test(&self, hist: &HistoryTable, elapsed_secs: f64, logged: bool) -> ExitFlag {
        if let Some(max) = self.criteria.elapsed_wallclock_time {
            if elapsed_secs >= max {
                if logged {
                    tracing::info!(key = "elapsed_wallclock_time", elapsed_secs, "term test tripped");
                }
                return ExitFlag::Wallclock;
            }
        }

        if let Some(sim_max) = self.criteria.sim_max {
            if hist.given_count() >= sim_max + hist.offset() {
                if logged {
                    tracing::info!(key = "sim_max", given_count = hist.given_count(), "term test tripped");
                }
                return ExitFlag::Tripped;
            }
        }

        if let Some(gen_max) = self.criteria.gen_max {
            if hist.index() >= gen_max + hist.offset() {
                if logged {
                    tracing::info!(key = "gen_max", index = hist.index(), "term test tripped");
                }
                return ExitFlag::Tripped;
            }
        }

        if let Some((field, threshold)) = &self.criteria.stop_val {
            if hist.stop_val_tripped(field, *threshold) {
                if logged {
                    tracing::info!(key = "stop_val", field = %field, threshold, "term test tripped");
                }
                return ExitFlag::Tripped;
            }
        }

        ExitFlag::Clean
    }
}
