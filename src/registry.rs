//! The worker registry: a small fixed-size table tracking each worker's
//! activity, persistence, and blocking state. Updated only from the
//! coordinator thread (§5).

use crate::error::{EnsembleError, EnsembleResult};
use crate::types::{CalcType, WorkerId};

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub active: Option<CalcType>,
    pub persis_state: Option<CalcType>,
    pub blocked: bool,
}

impl WorkerRecord {
    fn new(id: WorkerId) -> Self {
        Self {
            id,
            active: None,
            persis_state: None,
            blocked: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn is_persistent(&self) -> bool {
        self.persis_state.is_some()
    }
}

/// Registry of worker records, indexed `1..=nworkers`. Worker `0` (the
/// manager) never appears here.
#[derive(Debug)]
pub struct WorkerRegistry {
    records: Vec<WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new(nworkers: usize) -> Self {
        let records = (1..=nworkers)
            .map(|i| WorkerRecord::new(WorkerId(i as u16)))
            .collect();
        Self { records }
    }

    pub fn nworkers(&self) -> usize {
        self.records.len()
    }

    fn idx(&self, w: WorkerId) -> EnsembleResult<usize> {
        if w.is_manager() {
            return Err(EnsembleError::TargetIsManager);
        }
        let idx = w.0 as usize - 1;
        if idx >= self.records.len() {
            return Err(EnsembleError::UnknownWorker(w));
        }
        Ok(idx)
    }

    pub fn get(&self, w: WorkerId) -> EnsembleResult<&WorkerRecord> {
        Ok(&self.records[self.idx(w)?])
    }

    pub fn is_idle(&self, w: WorkerId) -> EnsembleResult<bool> {
        Ok(self.get(w)?.is_idle())
    }

    pub fn is_persistent(&self, w: WorkerId) -> EnsembleResult<bool> {
        Ok(self.get(w)?.is_persistent())
    }

    pub fn any_active(&self) -> bool {
        self.records.iter().any(|r| r.active.is_some())
    }

    pub fn idle_workers(&self) -> Vec<WorkerId> {
        self.records
            .iter()
            .filter(|r| r.is_idle())
            .map(|r| r.id)
            .collect()
    }

    pub fn all_workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.records.iter().map(|r| r.id)
    }

    pub fn set_active(&mut self, w: WorkerId, tag: CalcType) -> EnsembleResult<()> {
        let idx = self.idx(w)?;
        self.records[idx].active = Some(tag);
        Ok(())
    }

    pub fn clear_active(&mut self, w: WorkerId) -> EnsembleResult<()> {
        let idx = self.idx(w)?;
        self.records[idx].active = None;
        Ok(())
    }

    pub fn set_persistent(&mut self, w: WorkerId, tag: CalcType) -> EnsembleResult<()> {
        let idx = self.idx(w)?;
        self.records[idx].persis_state = Some(tag);
        Ok(())
    }

    pub fn clear_persistent(&mut self, w: WorkerId) -> EnsembleResult<()> {
        let idx = self.idx(w)?;
        self.records[idx].persis_state = None;
        Ok(())
    }

    pub fn set_blocked(&mut self, w: WorkerId, value: bool) -> EnsembleResult<()> {
        let idx = self.idx(w)?;
        self.records[idx].blocked = value;
        Ok(())
    }
}
