//! The history table: an append-mostly, columnar record of every point
//! proposed by a generator and (eventually) evaluated by a simulator.
//!
//! Storage is a set of named, typed columns over contiguous `Vec`s rather
//! than an array of heterogeneous row structs, so that shipping an
//! arbitrary field subset over a row-index subset (the dispatch data slice
//! of §4.7) never touches unrelated columns.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, EnsembleResult};
use crate::types::WorkerId;

/// One scalar or small-vector value crossing the history/wire boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    F64(f64),
    F64Vec(Vec<f64>),
    I64(i64),
    Bool(bool),
    Str(String),
}

/// The declared type of a user column, used both to preallocate storage and
/// to type-check incoming values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    F64,
    /// Fixed-length float vector, e.g. a parameter vector `x` of length `n`.
    F64Vec,
    I64,
    Bool,
    Str,
}

/// One user-declared column (generator input or simulator output), as named
/// in `sim_specs`/`gen_specs` `in`/`out` lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A named, typed, contiguous column. Rows are appended only; deletion or
/// reordering never occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Column {
    F64(Vec<f64>),
    F64Vec(Vec<Vec<f64>>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl Column {
    fn empty(kind: FieldKind) -> Self {
        match kind {
            FieldKind::F64 => Column::F64(Vec::new()),
            FieldKind::F64Vec => Column::F64Vec(Vec::new()),
            FieldKind::I64 => Column::I64(Vec::new()),
            FieldKind::Bool => Column::Bool(Vec::new()),
            FieldKind::Str => Column::Str(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::F64(v) => v.len(),
            Column::F64Vec(v) => v.len(),
            Column::I64(v) => v.len(),
            Column::Bool(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_default(&mut self) {
        match self {
            Column::F64(v) => v.push(0.0),
            Column::F64Vec(v) => v.push(Vec::new()),
            Column::I64(v) => v.push(0),
            Column::Bool(v) => v.push(false),
            Column::Str(v) => v.push(String::new()),
        }
    }

    fn push_value(&mut self, name: &str, value: FieldValue) -> EnsembleResult<()> {
        match (self, value) {
            (Column::F64(v), FieldValue::F64(x)) => v.push(x),
            (Column::F64Vec(v), FieldValue::F64Vec(x)) => v.push(x),
            (Column::I64(v), FieldValue::I64(x)) => v.push(x),
            (Column::Bool(v), FieldValue::Bool(x)) => v.push(x),
            (Column::Str(v), FieldValue::Str(x)) => v.push(x),
            _ => return Err(EnsembleError::ColumnTypeMismatch(name.to_string())),
        }
        Ok(())
    }

    fn set_value(&mut self, name: &str, row: usize, value: FieldValue) -> EnsembleResult<()> {
        match (self, value) {
            (Column::F64(v), FieldValue::F64(x)) => v[row] = x,
            (Column::F64Vec(v), FieldValue::F64Vec(x)) => v[row] = x,
            (Column::I64(v), FieldValue::I64(x)) => v[row] = x,
            (Column::Bool(v), FieldValue::Bool(x)) => v[row] = x,
            (Column::Str(v), FieldValue::Str(x)) => v[row] = x,
            _ => return Err(EnsembleError::ColumnTypeMismatch(name.to_string())),
        }
        Ok(())
    }

    pub fn get(&self, row: usize) -> Option<FieldValue> {
        match self {
            Column::F64(v) => v.get(row).copied().map(FieldValue::F64),
            Column::F64Vec(v) => v.get(row).cloned().map(FieldValue::F64Vec),
            Column::I64(v) => v.get(row).copied().map(FieldValue::I64),
            Column::Bool(v) => v.get(row).copied().map(FieldValue::Bool),
            Column::Str(v) => v.get(row).cloned().map(FieldValue::Str),
        }
    }

    /// Gather the named rows into a new column of the same variant, in the
    /// order given.
    fn gather(&self, rows: &[usize]) -> Column {
        match self {
            Column::F64(v) => Column::F64(rows.iter().map(|&r| v[r]).collect()),
            Column::F64Vec(v) => Column::F64Vec(rows.iter().map(|&r| v[r].clone()).collect()),
            Column::I64(v) => Column::I64(rows.iter().map(|&r| v[r]).collect()),
            Column::Bool(v) => Column::Bool(rows.iter().map(|&r| v[r]).collect()),
            Column::Str(v) => Column::Str(rows.iter().map(|&r| v[r].clone()).collect()),
        }
    }

    /// Non-NaN values below `threshold`, used by the `stop_val` termination
    /// test. Non-float columns never trip it.
    fn any_below(&self, threshold: f64, upto: usize) -> bool {
        match self {
            Column::F64(v) => v[..upto].iter().any(|x| !x.is_nan() && *x <= threshold),
            _ => false,
        }
    }
}

/// A columnar slice of the history: the requested `fields` over the
/// requested `rows`, exactly the payload that crosses the worker link in
/// §4.7 and the one a worker's result message carries back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySlice {
    pub rows: Vec<usize>,
    pub columns: IndexMap<String, Column>,
}

impl HistorySlice {
    pub fn new(rows: Vec<usize>, columns: IndexMap<String, Column>) -> Self {
        Self { rows, columns }
    }

    /// Build a slice from row-major records, used by reference
    /// generator/simulator functions that find it more natural to produce
    /// one record per row than to build columns directly.
    pub fn from_records(
        specs: &[FieldSpec],
        records: &[HashMap<String, FieldValue>],
    ) -> EnsembleResult<Self> {
        let mut columns: IndexMap<String, Column> = IndexMap::new();
        for spec in specs {
            columns.insert(spec.name.clone(), Column::empty(spec.kind));
        }
        for record in records {
            for spec in specs {
                let column = columns.get_mut(&spec.name).expect("just inserted");
                match record.get(&spec.name) {
                    Some(value) => column.push_value(&spec.name, value.clone())?,
                    None => column.push_default(),
                }
            }
        }
        Ok(Self {
            rows: Vec::new(),
            columns,
        })
    }

    /// Inverse of `from_records`: expand this slice's columns back into
    /// row-major records, used when a generator's result crosses the wire
    /// as a columnar `HistorySlice` but `append_generated` wants one record
    /// per new row.
    pub fn into_records(&self) -> Vec<HashMap<String, FieldValue>> {
        let n = self.columns.values().map(Column::len).max().unwrap_or(0);
        (0..n)
            .map(|row| {
                self.columns
                    .iter()
                    .filter_map(|(name, column)| column.get(row).map(|v| (name.clone(), v)))
                    .collect()
            })
            .collect()
    }
}

/// A read-only, borrowed prefix `[0, index)` of the history, passed to the
/// allocator, the termination evaluator, and the queue-update hook. None of
/// those callers may mutate history state directly.
pub struct HistoryPrefix<'a> {
    pub index: usize,
    pub offset: usize,
    pub given_count: usize,
    pub sim_count: usize,
    table: &'a HistoryTable,
}

impl<'a> HistoryPrefix<'a> {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.table.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.table.columns.keys().map(|s| s.as_str())
    }

    pub fn is_given(&self, row: usize) -> bool {
        self.table.given[row]
    }

    pub fn is_paused(&self, row: usize) -> bool {
        self.table.paused[row]
    }

    pub fn is_returned(&self, row: usize) -> bool {
        self.table.returned[row]
    }

    pub fn given_time(&self, row: usize) -> f64 {
        self.table.given_time[row]
    }

    pub fn gen_worker(&self, row: usize) -> WorkerId {
        self.table.gen_worker[row]
    }

    /// Row indices in `[0, index)` that are neither given nor paused,
    /// oldest first — the canonical "next sim work" query used by
    /// allocation functions such as `only_persistent_gens`.
    pub fn ungiven_unpaused_rows(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.index).filter(move |&r| !self.table.given[r] && !self.table.paused[r])
    }

    /// Rows generated by worker `w`, in ascending order.
    pub fn rows_generated_by(&self, w: WorkerId) -> impl Iterator<Item = usize> + '_ {
        (0..self.index).filter(move |&r| self.table.gen_worker[r] == w)
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }
}

/// The authoritative history store. Owned exclusively by the coordinator
/// thread; never wrapped in a lock (§5).
#[derive(Debug)]
pub struct HistoryTable {
    capacity: usize,
    index: usize,
    offset: usize,
    given_count: usize,
    sim_count: usize,
    columns: IndexMap<String, Column>,
    given: Vec<bool>,
    given_time: Vec<f64>,
    sim_worker: Vec<WorkerId>,
    gen_worker: Vec<WorkerId>,
    paused: Vec<bool>,
    returned: Vec<bool>,
}

impl HistoryTable {
    /// Create an empty table preallocated to `capacity` rows, with `offset`
    /// pre-seeded rows assumed already appended by the caller via
    /// `append_generated` immediately afterwards.
    pub fn new(capacity: usize, offset: usize, field_specs: &[FieldSpec]) -> Self {
        let mut columns = IndexMap::with_capacity(field_specs.len());
        for spec in field_specs {
            columns.insert(spec.name.clone(), Column::empty(spec.kind));
        }
        Self {
            capacity,
            index: 0,
            offset,
            given_count: 0,
            sim_count: 0,
            columns,
            given: Vec::with_capacity(capacity),
            given_time: Vec::with_capacity(capacity),
            sim_worker: Vec::with_capacity(capacity),
            gen_worker: Vec::with_capacity(capacity),
            paused: Vec::with_capacity(capacity),
            returned: Vec::with_capacity(capacity),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn given_count(&self) -> usize {
        self.given_count
    }

    pub fn sim_count(&self) -> usize {
        self.sim_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// The prefix `[0, index)`, the read-only view exported to the
    /// allocator, the termination evaluator, and the queue-update hook.
    pub fn trim(&self) -> HistoryPrefix<'_> {
        HistoryPrefix {
            index: self.index,
            offset: self.offset,
            given_count: self.given_count,
            sim_count: self.sim_count,
            table: self,
        }
    }

    fn check_any_below(&self, field: &str, threshold: f64) -> bool {
        self.columns
            .get(field)
            .map(|c| c.any_below(threshold, self.index))
            .unwrap_or(false)
    }

    /// Used only by `TerminationEvaluator::test` for the `stop_val` check.
    pub(crate) fn stop_val_tripped(&self, field: &str, threshold: f64) -> bool {
        self.check_any_below(field, threshold)
    }

    /// Append rows produced by a generator. Assigns `sim_id` (the row
    /// index) to each new row and records `gen_worker`. If a row's record
    /// includes a user-supplied `sim_id` field, it is never written into a
    /// column (there is no such column) but is checked for a collision
    /// against the id this row is about to receive, and its mere presence
    /// is logged as a warning — mirroring the historical reference system,
    /// which always assigns `sim_id` itself.
    pub fn append_generated(
        &mut self,
        worker_id: WorkerId,
        rows: Vec<HashMap<String, FieldValue>>,
    ) -> EnsembleResult<std::ops::Range<usize>> {
        let start = self.index;
        let n = rows.len();
        if self.index + n > self.capacity {
            return Err(EnsembleError::CapacityExceeded(
                self.index + n,
                self.capacity,
            ));
        }

        for (offset, record) in rows.into_iter().enumerate() {
            let new_id = start + offset;
            if let Some(FieldValue::I64(supplied)) = record.get("sim_id") {
                tracing::warn!(
                    row = new_id,
                    supplied = *supplied,
                    "generator output included a sim_id column; sim_id is always \
                     auto-assigned by the history table and this value is ignored"
                );
                if *supplied as usize == new_id {
                    // harmless coincidence, not treated as a collision
                } else if (*supplied as usize) < self.index {
                    return Err(EnsembleError::SimIdCollision(*supplied as usize));
                }
            }

            for (name, column) in self.columns.iter_mut() {
                match record.get(name) {
                    Some(value) => column.push_value(name, value.clone())?,
                    None => column.push_default(),
                }
            }

            self.given.push(false);
            self.given_time.push(0.0);
            self.sim_worker.push(WorkerId::MANAGER);
            self.gen_worker.push(worker_id);
            self.paused.push(false);
            self.returned.push(false);
        }

        self.index += n;
        Ok(start..self.index)
    }

    /// Mark `rows` as dispatched to `worker_id` at wall-clock time `now`.
    pub fn mark_given(
        &mut self,
        rows: &[usize],
        worker_id: WorkerId,
        now: f64,
    ) -> EnsembleResult<()> {
        for &row in rows {
            if row >= self.index {
                return Err(EnsembleError::RowOutOfRange(row, self.index));
            }
            if self.given[row] {
                return Err(EnsembleError::HistoryInvariant(
                    row,
                    "row already given".into(),
                ));
            }
            if self.paused[row] {
                return Err(EnsembleError::HistoryInvariant(row, "row paused".into()));
            }
        }
        for &row in rows {
            self.given[row] = true;
            self.given_time[row] = now;
            self.sim_worker[row] = worker_id;
        }
        self.given_count += rows.len();
        Ok(())
    }

    /// Rows currently dispatched to `worker_id` and not yet returned, in
    /// ascending order.
    pub fn outstanding_rows(&self, worker_id: WorkerId) -> Vec<usize> {
        (0..self.index)
            .filter(|&r| self.sim_worker[r] == worker_id && self.given[r] && !self.returned[r])
            .collect()
    }

    /// Write simulator output columns for the rows in `slice.rows` (which
    /// must be a non-empty subset of `worker_id`'s outstanding rows),
    /// marking each `returned`.
    pub fn mark_returned(&mut self, worker_id: WorkerId, slice: &HistorySlice) -> EnsembleResult<usize> {
        let outstanding = self.outstanding_rows(worker_id);
        let rows: Vec<usize> = if slice.rows.is_empty() {
            outstanding.clone()
        } else {
            slice.rows.clone()
        };
        if rows.is_empty() {
            return Err(EnsembleError::HistoryInvariant(
                0,
                format!("worker {worker_id} returned a result with no outstanding rows"),
            ));
        }
        for &row in &rows {
            if !outstanding.contains(&row) {
                return Err(EnsembleError::HistoryInvariant(
                    row,
                    format!("row not outstanding for worker {worker_id}"),
                ));
            }
        }

        for (name, column) in slice.columns.iter() {
            let target = self
                .columns
                .get_mut(name)
                .ok_or_else(|| EnsembleError::UnknownField(name.clone()))?;
            for (i, &row) in rows.iter().enumerate() {
                let value = column
                    .get(i)
                    .ok_or_else(|| EnsembleError::ColumnTypeMismatch(name.clone()))?;
                target.set_value(name, row, value)?;
            }
        }

        for &row in &rows {
            self.returned[row] = true;
        }
        self.sim_count += rows.len();
        Ok(rows.len())
    }

    /// A columnar slice of `fields` over `rows`, used to build the data
    /// message that immediately follows a work order (§4.7).
    pub fn slice(&self, fields: &[String], rows: &[usize]) -> EnsembleResult<HistorySlice> {
        for &row in rows {
            if row >= self.index {
                return Err(EnsembleError::RowOutOfRange(row, self.index));
            }
        }
        let mut columns = IndexMap::with_capacity(fields.len());
        for field in fields {
            let column = self
                .columns
                .get(field)
                .ok_or_else(|| EnsembleError::UnknownField(field.clone()))?;
            columns.insert(field.clone(), column.gather(rows));
        }
        Ok(HistorySlice::new(rows.to_vec(), columns))
    }

    /// Raw dump of every column (including the scheduling columns) for the
    /// snapshot writer.
    pub fn raw_dump(&self) -> RawHistoryDump {
        RawHistoryDump {
            index: self.index,
            offset: self.offset,
            given_count: self.given_count,
            sim_count: self.sim_count,
            columns: self.columns.clone(),
            given: self.given.clone(),
            given_time: self.given_time.clone(),
            sim_worker: self.sim_worker.clone(),
            gen_worker: self.gen_worker.clone(),
            paused: self.paused.clone(),
            returned: self.returned.clone(),
        }
    }
}

/// Flat, owned representation of the whole table used for snapshot
/// serialization. Deliberately separate from `HistoryTable` so the live
/// table never needs to implement (de)serialization of its borrow-heavy
/// access paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHistoryDump {
    pub index: usize,
    pub offset: usize,
    pub given_count: usize,
    pub sim_count: usize,
    pub columns: IndexMap<String, Column>,
    pub given: Vec<bool>,
    pub given_time: Vec<f64>,
    pub sim_worker: Vec<WorkerId>,
    pub gen_worker: Vec<WorkerId>,
    pub paused: Vec<bool>,
    pub returned: Vec<bool>,
}
