//! The allocation adapter contract: a pluggable function that decides, on
//! each pass through the coordinator's dispatch loop, what work (if any) to
//! hand to each idle worker (§4.5).
//!
//! An allocation function never touches workers directly; it only returns a
//! `WorkMap` describing its intent, which the coordinator validates against
//! `validate_work_order` before acting on any of it — mirroring
//! `_check_work_order` in the historical reference manager, which runs the
//! same checks against every order an allocation function proposes before
//! the manager trusts it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, EnsembleResult};
use crate::history::HistoryPrefix;
use crate::persis_info::PersisInfoMap;
use crate::registry::WorkerRegistry;
use crate::types::{CalcType, WorkerId};

/// `libE_info` as attached *to* a work order by the allocator (as opposed to
/// the one a worker reports back alongside a result, `LibeInfoIn` in
/// `link.rs`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibeInfoOut {
    /// Whether this assignment starts (or continues) a persistent
    /// calculation that will run until explicitly stopped.
    pub persistent: bool,
    /// Workers this assignment blocks from receiving further work until it
    /// completes (used to pair a persistent generator with the sim workers
    /// it consumes results from).
    pub blocking: Vec<WorkerId>,
    /// Present on a `FinishedPersistentSim`/`FinishedPersistentGen` reply
    /// only: which generator instance this result is associated with.
    pub gen_num: Option<WorkerId>,
}

/// One allocation function's intent for a single worker: a calculation type,
/// the history fields and rows to ship alongside it, and the accompanying
/// `libE_info`/`persis_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub tag: CalcType,
    pub fields: Vec<String>,
    pub rows: Vec<usize>,
    #[serde(default)]
    pub persis_info: crate::persis_info::PersisInfo,
    #[serde(default)]
    pub libe_info: LibeInfoOut,
}

impl WorkOrder {
    pub fn new(tag: CalcType) -> Self {
        Self {
            tag,
            fields: Vec::new(),
            rows: Vec::new(),
            persis_info: Default::default(),
            libe_info: LibeInfoOut::default(),
        }
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_rows(mut self, rows: Vec<usize>) -> Self {
        self.rows = rows;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.libe_info.persistent = true;
        self
    }

    pub fn blocking(mut self, workers: Vec<WorkerId>) -> Self {
        self.libe_info.blocking = workers;
        self
    }
}

/// One allocation pass's full intent: at most one order per idle worker,
/// in the order the allocator wants them sent. `IndexMap` preserves that
/// order, matching the dictionary-order iteration the original allocation
/// functions rely on when a deterministic dispatch sequence matters for
/// testing.
pub type WorkMap = IndexMap<WorkerId, WorkOrder>;

/// Read-only view handed to an allocation function on each pass: the history
/// prefix, the worker registry, and the persistent-info map. None of these
/// may be mutated directly; the function expresses intent only through the
/// `WorkMap` it returns.
pub struct AllocInput<'a> {
    pub hist: HistoryPrefix<'a>,
    pub registry: &'a WorkerRegistry,
    pub persis_info: &'a PersisInfoMap,
}

/// The shape every allocation function must implement: given the current
/// state, decide what to dispatch this pass.
pub trait AllocFn {
    fn allocate(&mut self, input: &AllocInput<'_>) -> EnsembleResult<WorkMap>;
}

impl<F> AllocFn for F
where
    F: FnMut(&AllocInput<'_>) -> EnsembleResult<WorkMap>,
{
    fn allocate(&mut self, input: &AllocInput<'_>) -> EnsembleResult<WorkMap> {
        self(input)
    }
}

/// Validate one proposed order against the registry before the coordinator
/// acts on it, in the same sequence as `_check_work_order`: reject orders
/// aimed at the manager, at a worker that isn't idle, or that reference
/// history fields or rows that don't exist.
pub fn validate_work_order(
    worker: WorkerId,
    order: &WorkOrder,
    registry: &WorkerRegistry,
    hist: &HistoryPrefix<'_>,
) -> EnsembleResult<()> {
    if worker.is_manager() {
        return Err(EnsembleError::TargetIsManager);
    }
    if !registry.is_idle(worker)? {
        return Err(EnsembleError::WorkerBusy(worker));
    }
    for field in &order.fields {
        if hist.column(field).is_none() {
            return Err(EnsembleError::UnknownField(field.clone()));
        }
    }
    for &row in &order.rows {
        if row >= hist.index {
            return Err(EnsembleError::RowOutOfRange(row, hist.index));
        }
    }
    Ok(())
}

/// Validate a whole pass's `WorkMap` in insertion order, short-circuiting on
/// the first violation — the coordinator never partially commits a pass.
pub fn validate_work_map(
    work: &WorkMap,
    registry: &WorkerRegistry,
    hist: &HistoryPrefix<'_>,
) -> EnsembleResult<()> {
    for (worker, order) in work {
        validate_work_order(*worker, order, registry, hist)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{FieldKind, FieldSpec, HistoryTable};
    use crate::persis_info::PersisInfoMap;

    fn setup() -> (HistoryTable, WorkerRegistry, PersisInfoMap) {
        let hist = HistoryTable::new(8, 0, &[FieldSpec::new("x", FieldKind::F64)]);
        let registry = WorkerRegistry::new(2);
        let persis_info = PersisInfoMap::new();
        (hist, registry, persis_info)
    }

    #[test]
    fn rejects_order_targeting_manager() {
        let (hist, registry, _) = setup();
        let order = WorkOrder::new(CalcType::Sim);
        let err = validate_work_order(WorkerId::MANAGER, &order, &registry, &hist.trim())
            .unwrap_err();
        assert!(matches!(err, EnsembleError::TargetIsManager));
    }

    #[test]
    fn rejects_order_for_busy_worker() {
        let (hist, mut registry, _) = setup();
        registry.set_active(WorkerId(1), CalcType::Sim).unwrap();
        let order = WorkOrder::new(CalcType::Sim);
        let err = validate_work_order(WorkerId(1), &order, &registry, &hist.trim()).unwrap_err();
        assert!(matches!(err, EnsembleError::WorkerBusy(_)));
    }

    #[test]
    fn rejects_unknown_field_and_out_of_range_row() {
        let (hist, registry, _) = setup();
        let bad_field = WorkOrder::new(CalcType::Sim).with_fields(vec!["nope".into()]);
        assert!(validate_work_order(WorkerId(1), &bad_field, &registry, &hist.trim()).is_err());

        let bad_row = WorkOrder::new(CalcType::Sim).with_rows(vec![0]);
        assert!(matches!(
            validate_work_order(WorkerId(1), &bad_row, &registry, &hist.trim()),
            Err(EnsembleError::RowOutOfRange(0, 0))
        ));
    }

    #[test]
    fn valid_order_passes() {
        let (mut hist, registry, _) = setup();
        hist.append_generated(
            WorkerId(1),
            vec![std::iter::once(("x".to_string(), crate::history::FieldValue::F64(1.0)))
                .collect()],
        )
        .unwrap();
        let order = WorkOrder::new(CalcType::Sim)
            .with_fields(vec!["x".into()])
            .with_rows(vec![0]);
        assert!(validate_work_order(WorkerId(1), &order, &registry, &hist.trim()).is_ok());
    }

    #[test]
    fn work_map_validation_short_circuits_on_first_bad_order() {
        let (hist, registry, _) = setup();
        let mut work = WorkMap::new();
        work.insert(WorkerId(1), WorkOrder::new(CalcType::Sim));
        work.insert(WorkerId::MANAGER, WorkOrder::new(CalcType::Sim));
        assert!(validate_work_map(&work, &registry, &hist.trim()).is_err());
    }
}
