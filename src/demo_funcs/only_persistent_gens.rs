//! The `only_persistent_gens` allocator, grounded on
//! `only_persistent_gens` in the historical reference system's bundled
//! allocation functions: start exactly one persistent generator, keep every
//! other worker busy evaluating whatever points it has already produced,
//! and feed the generator's own returned results back to it so it can
//! decide where to sample next.

use crate::alloc::{AllocFn, AllocInput, WorkMap, WorkOrder};
use crate::error::EnsembleResult;
use crate::types::{CalcType, WorkerId};

pub struct OnlyPersistentGens {
    sim_fields: Vec<String>,
    gen_fields: Vec<String>,
}

impl OnlyPersistentGens {
    pub fn new(sim_fields: Vec<String>, gen_fields: Vec<String>) -> Self {
        Self {
            sim_fields,
            gen_fields,
        }
    }
}

impl AllocFn for OnlyPersistentGens {
    fn allocate(&mut self, input: &AllocInput<'_>) -> EnsembleResult<WorkMap> {
        let mut work = WorkMap::new();
        let hist = &input.hist;
        let mut claimed = std::collections::HashSet::new();

        let gen_running = input
            .registry
            .all_workers()
            .any(|w| input.registry.get(w).map(|r| r.is_persistent()).unwrap_or(false));

        // Persistent generators waiting on their own returned results.
        for worker in input.registry.all_workers() {
            let record = input.registry.get(worker)?;
            if !record.is_idle() || !record.is_persistent() {
                continue;
            }
            let gen_rows: Vec<usize> = hist.rows_generated_by(worker).collect();
            if gen_rows.is_empty() || !gen_rows.iter().all(|&r| hist.is_returned(r)) {
                continue;
            }
            let Some(last_row) = gen_rows
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    hist.given_time(a)
                        .partial_cmp(&hist.given_time(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            else {
                continue;
            };

            let order = WorkOrder::new(CalcType::Gen)
                .with_fields(self.sim_fields.clone())
                .with_rows(vec![last_row])
                .persistent();
            work.insert(worker, order);
        }

        // Idle, non-persistent workers: feed them existing unclaimed sim
        // work first; only fall back to starting the generator if none
        // exists and no generator is running yet.
        let mut gen_started = gen_running;
        for worker in input.registry.all_workers() {
            let record = input.registry.get(worker)?;
            if !record.is_idle() || record.is_persistent() {
                continue;
            }

            if let Some(row) = hist
                .ungiven_unpaused_rows()
                .find(|r| !claimed.contains(r))
            {
                claimed.insert(row);
                let order = WorkOrder::new(CalcType::Sim)
                    .with_fields(self.sim_fields.clone())
                    .with_rows(vec![row]);
                work.insert(worker, order);
                continue;
            }

            if gen_started {
                continue;
            }
            gen_started = true;
            let order = WorkOrder::new(CalcType::Gen)
                .with_fields(self.gen_fields.clone())
                .persistent();
            work.insert(worker, order);
        }

        Ok(work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{FieldKind, FieldSpec, HistoryTable};
    use crate::persis_info::PersisInfoMap;
    use crate::registry::WorkerRegistry;
    use std::collections::HashMap;

    #[test]
    fn starts_exactly_one_generator_when_queue_is_empty() {
        let hist = HistoryTable::new(16, 0, &[FieldSpec::new("x", FieldKind::F64Vec)]);
        let registry = WorkerRegistry::new(3);
        let persis_info = PersisInfoMap::new();
        let mut alloc = OnlyPersistentGens::new(vec!["x".into()], vec![]);

        let input = AllocInput {
            hist: hist.trim(),
            registry: &registry,
            persis_info: &persis_info,
        };
        let work = alloc.allocate(&input).unwrap();
        assert_eq!(work.len(), 1);
        let (_, order) = work.iter().next().unwrap();
        assert!(matches!(order.tag, CalcType::Gen));
        assert!(order.libe_info.persistent);
    }

    #[test]
    fn feeds_existing_points_before_starting_a_second_generator() {
        let mut hist = HistoryTable::new(16, 0, &[FieldSpec::new("x", FieldKind::F64Vec)]);
        hist.append_generated(WorkerId(1), vec![HashMap::new(), HashMap::new()])
            .unwrap();
        let mut registry = WorkerRegistry::new(2);
        registry.set_active(WorkerId(1), CalcType::Gen).unwrap();
        registry.set_persistent(WorkerId(1), CalcType::Gen).unwrap();
        let persis_info = PersisInfoMap::new();
        let mut alloc = OnlyPersistentGens::new(vec!["x".into()], vec![]);

        let input = AllocInput {
            hist: hist.trim(),
            registry: &registry,
            persis_info: &persis_info,
        };
        let work = alloc.allocate(&input).unwrap();
        assert_eq!(work.len(), 1);
        let order = work.get(&WorkerId(2)).unwrap();
        assert!(matches!(order.tag, CalcType::Sim));
        assert_eq!(order.rows, vec![0]);
    }

    #[test]
    fn returns_waiting_generator_its_results() {
        let mut hist = HistoryTable::new(16, 0, &[FieldSpec::new("x", FieldKind::F64Vec)]);
        hist.append_generated(WorkerId(1), vec![HashMap::new()])
            .unwrap();
        hist.mark_given(&[0], WorkerId(2), 0.0).unwrap();
        let mut columns = indexmap::IndexMap::new();
        columns.insert("x".to_string(), crate::history::Column::F64Vec(vec![vec![1.0]]));
        hist.mark_returned(WorkerId(2), &crate::history::HistorySlice::new(vec![0], columns))
            .unwrap();

        let mut registry = WorkerRegistry::new(2);
        registry.set_persistent(WorkerId(1), CalcType::Gen).unwrap();
        let persis_info = PersisInfoMap::new();
        let mut alloc = OnlyPersistentGens::new(vec!["x".into()], vec![]);

        let input = AllocInput {
            hist: hist.trim(),
            registry: &registry,
            persis_info: &persis_info,
        };
        let work = alloc.allocate(&input).unwrap();
        let order = work.get(&WorkerId(1)).unwrap();
        assert!(matches!(order.tag, CalcType::Gen));
        assert_eq!(order.rows, vec![0]);
    }
}
