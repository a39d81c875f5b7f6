//! Calculation statistics: a running, per-worker-per-calc-type summary of
//! how many calculations ran, how long they took, and how each one ended.
//! Grounded in the historical reference system's calculation summary
//! (`calc_info.py`), which keeps exactly this kind of rolling count/timing
//! record per worker and flushes it to a text log as the run progresses.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::types::{CalcStatus, CalcType, WorkerId};

/// Aggregate timing and outcome counts for one `(worker, calc_type)` pair.
#[derive(Debug, Clone, Default)]
pub struct CalcSummary {
    pub count: usize,
    pub total_elapsed: f64,
    pub max_elapsed: f64,
    pub outcome_counts: BTreeMap<&'static str, usize>,
}

impl CalcSummary {
    fn record(&mut self, elapsed: f64, status: CalcStatus) {
        self.count += 1;
        self.total_elapsed += elapsed;
        if elapsed > self.max_elapsed {
            self.max_elapsed = elapsed;
        }
        *self.outcome_counts.entry(status.describe()).or_insert(0) += 1;
    }

    pub fn mean_elapsed(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_elapsed / self.count as f64
        }
    }
}

/// Accumulates `CalcSummary` entries across the whole run, keyed by
/// `(worker, calc_type)` so the final report can break down both per-worker
/// load and per-calc-type behavior.
#[derive(Debug, Clone, Default)]
pub struct CalcStats {
    entries: BTreeMap<(WorkerId, &'static str), CalcSummary>,
}

impl CalcStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, worker: WorkerId, calc_type: CalcType, elapsed: f64, status: CalcStatus) {
        let key = (worker, calc_type_label(calc_type));
        self.entries.entry(key).or_default().record(elapsed, status);
    }

    pub fn summary_for(&self, worker: WorkerId, calc_type: CalcType) -> Option<&CalcSummary> {
        self.entries.get(&(worker, calc_type_label(calc_type)))
    }

    /// Render the human-readable summary report, one line per
    /// `(worker, calc_type)`, in worker order — the text format the
    /// reference system writes alongside its history dump.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for ((worker, calc_type), summary) in &self.entries {
            let _ = writeln!(
                out,
                "{worker} {calc_type}: n={} mean={:.3}s max={:.3}s outcomes={:?}",
                summary.count,
                summary.mean_elapsed(),
                summary.max_elapsed,
                summary.outcome_counts
            );
        }
        out
    }
}

fn calc_type_label(calc_type: CalcType) -> &'static str {
    match calc_type {
        CalcType::Sim => "sim",
        CalcType::Gen => "gen",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_per_worker_and_type() {
        let mut stats = CalcStats::new();
        stats.record(WorkerId(1), CalcType::Sim, 1.0, CalcStatus::WorkerDone);
        stats.record(WorkerId(1), CalcType::Sim, 3.0, CalcStatus::WorkerDone);
        stats.record(WorkerId(1), CalcType::Gen, 0.5, CalcStatus::FinishedPersistentGen);

        let sim = stats.summary_for(WorkerId(1), CalcType::Sim).unwrap();
        assert_eq!(sim.count, 2);
        assert_eq!(sim.mean_elapsed(), 2.0);
        assert_eq!(sim.max_elapsed, 3.0);

        let gen = stats.summary_for(WorkerId(1), CalcType::Gen).unwrap();
        assert_eq!(gen.count, 1);
    }

    #[test]
    fn render_includes_every_tracked_pair() {
        let mut stats = CalcStats::new();
        stats.record(WorkerId(1), CalcType::Sim, 1.0, CalcStatus::WorkerDone);
        stats.record(WorkerId(2), CalcType::Gen, 2.0, CalcStatus::JobFailed);
        let text = stats.render();
        assert!(text.contains("worker-1"));
        assert!(text.contains("worker-2"));
    }

    #[test]
    fn missing_pair_yields_none() {
        let stats = CalcStats::new();
        assert!(stats.summary_for(WorkerId(9), CalcType::Sim).is_none());
    }
}
