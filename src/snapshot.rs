//! Snapshot and abort-dump writer (§4.8). Snapshots are periodic,
//! best-effort checkpoints of the history table taken every `save_every_k`
//! newly-returned rows; an abort dump is written once, unconditionally, when
//! the coordinator exits on any error path.
//!
//! Periodic snapshot counts are always rounded down to the nearest multiple
//! of `save_every_k` before naming and recording, matching `_save_every_k`'s
//! `count = k*(count//k)` in the historical reference manager: a single
//! batch that advances `sim_count` past more than one multiple of `k` still
//! names the file after the multiple it crossed, not the raw count.

use std::path::{Path, PathBuf};

use crate::error::EnsembleResult;
use crate::history::{HistoryTable, RawHistoryDump};

/// Drives periodic snapshotting from the coordinator's main loop.
pub struct SnapshotWriter {
    dir: PathBuf,
    save_every_k: Option<usize>,
    last_snapshot_sim_count: usize,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, save_every_k: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            save_every_k,
            last_snapshot_sim_count: 0,
        }
    }

    /// Called after every successful `mark_returned` batch. Writes a
    /// snapshot if `sim_count`, rounded down to the nearest multiple of
    /// `save_every_k`, has advanced past the last one recorded; a no-op when
    /// `save_every_k` is unset. Skip-if-exists, so replaying the same count
    /// twice (or a prior run sharing the directory) never overwrites a file.
    pub fn maybe_snapshot(&mut self, hist: &HistoryTable) -> EnsembleResult<Option<PathBuf>> {
        let Some(k) = self.save_every_k else {
            return Ok(None);
        };
        if k == 0 {
            return Ok(None);
        }
        let rounded = k * (hist.sim_count() / k);
        if rounded == 0 || rounded <= self.last_snapshot_sim_count {
            return Ok(None);
        }
        let path = self.snapshot_path(rounded);
        if path.exists() {
            tracing::warn!(path = %path.display(), "periodic snapshot already exists, skipping");
            self.last_snapshot_sim_count = rounded;
            return Ok(None);
        }
        write_dump(&path, &hist.raw_dump())?;
        self.last_snapshot_sim_count = rounded;
        tracing::info!(path = %path.display(), sim_count = rounded, "wrote periodic snapshot");
        Ok(Some(path))
    }

    /// Write the final abort dump unconditionally, skipping if a file of
    /// that exact name already exists (never overwrite a prior abort dump
    /// from a different run sharing the same directory).
    pub fn abort_dump(&self, hist: &HistoryTable) -> EnsembleResult<Option<PathBuf>> {
        let path = self.dir.join("ensemble_abort.bin");
        if path.exists() {
            tracing::warn!(path = %path.display(), "abort dump already exists, skipping");
            return Ok(None);
        }
        write_dump(&path, &hist.raw_dump())?;
        tracing::info!(path = %path.display(), "wrote abort snapshot");
        Ok(Some(path))
    }

    fn snapshot_path(&self, sim_count: usize) -> PathBuf {
        self.dir.join(format!("ensemble_history_{sim_count}.bin"))
    }

    /// Flush the rendered calculation-statistics report to a flat text file
    /// alongside the snapshots, overwriting any report from a prior run in
    /// the same directory. Grounded on `calc_info.py`'s `merge_statfiles`,
    /// which likewise writes one summary file per run rather than per
    /// calculation.
    pub fn write_calc_stats(&self, report: &str) -> EnsembleResult<()> {
        let path = self.dir.join("ensemble_summary.txt");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, report)?;
        tracing::info!(path = %path.display(), "wrote calculation summary");
        Ok(())
    }
}

fn write_dump(path: &Path, dump: &RawHistoryDump) -> EnsembleResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serialize(dump)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Load a previously written dump back. Exposed for callers that want to
/// inspect a snapshot or abort dump after the fact (diagnostics, tests).
pub fn read_dump(path: &Path) -> EnsembleResult<RawHistoryDump> {
    let bytes = std::fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}
