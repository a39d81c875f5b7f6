//! The manager's coordination engine: the single-threaded receive/dispatch
//! loop described in §4.6–§4.8. `Manager::run` owns the history table, the
//! worker registry, and the persistent-info map outright — none of them are
//! ever wrapped in a lock, because exactly one thread of control ever
//! touches them (§5).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::alloc::{AllocFn, AllocInput, validate_work_order, WorkOrder};
use crate::calc_stats::CalcStats;
use crate::error::{EnsembleError, EnsembleResult};
use crate::history::HistoryTable;
use crate::link::{Payload, WorkerLink, WorkerMessage};
use crate::persis_info::PersisInfoMap;
use crate::registry::WorkerRegistry;
use crate::snapshot::SnapshotWriter;
use crate::termination::{ExitCriteria, ExitFlag, TerminationEvaluator};
use crate::types::{CalcStatus, CalcType, Tag, WorkerId};

/// Bound on how long the manager will poll for a pickle-dump reply before
/// treating the retry itself as a transport failure (§7 kind 4: "if that
/// also fails, fatal").
const PICKLE_DUMP_POLL_ATTEMPTS: u32 = 2_000;
const PICKLE_DUMP_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The §4.6 step 3 queue-update hook: an optional callback invoked every
/// pass with the current history prefix and `persis_info`, whose return
/// value replaces `persis_info`. Skipped entirely when absent.
pub trait QueueUpdateFn {
    fn update(&mut self, hist: &crate::history::HistoryPrefix<'_>, persis_info: PersisInfoMap) -> PersisInfoMap;
}

impl<F> QueueUpdateFn for F
where
    F: FnMut(&crate::history::HistoryPrefix<'_>, PersisInfoMap) -> PersisInfoMap,
{
    fn update(&mut self, hist: &crate::history::HistoryPrefix<'_>, persis_info: PersisInfoMap) -> PersisInfoMap {
        self(hist, persis_info)
    }
}

pub struct Manager<L: WorkerLink> {
    links: IndexMap<WorkerId, L>,
    hist: HistoryTable,
    registry: WorkerRegistry,
    persis_info: PersisInfoMap,
    exit_criteria: ExitCriteria,
    snapshot: SnapshotWriter,
    calc_stats: CalcStats,
    started_at: Instant,
    dispatch_started: HashMap<WorkerId, (Instant, CalcType)>,
    queue_update: Option<Box<dyn QueueUpdateFn>>,
}

impl<L: WorkerLink> Manager<L> {
    pub fn new(
        links: IndexMap<WorkerId, L>,
        hist: HistoryTable,
        exit_criteria: ExitCriteria,
        snapshot: SnapshotWriter,
    ) -> Self {
        let nworkers = links.len();
        Self {
            links,
            hist,
            registry: WorkerRegistry::new(nworkers),
            persis_info: PersisInfoMap::new(),
            exit_criteria,
            snapshot,
            calc_stats: CalcStats::new(),
            started_at: Instant::now(),
            dispatch_started: HashMap::new(),
            queue_update: None,
        }
    }

    /// Install the §4.6 step 3 queue-update hook, replacing any previously
    /// set one.
    pub fn with_queue_update_fn(mut self, f: impl QueueUpdateFn + 'static) -> Self {
        self.queue_update = Some(Box::new(f));
        self
    }

    pub fn history(&self) -> &HistoryTable {
        &self.hist
    }

    pub fn calc_stats(&self) -> &CalcStats {
        &self.calc_stats
    }

    fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    fn term_test(&self, logged: bool) -> ExitFlag {
        TerminationEvaluator::new(&self.exit_criteria).test(&self.hist, self.elapsed_secs(), logged)
    }

    /// Run the coordinator to completion. Returns the final `persis_info`
    /// map and the exit flag on a clean or tripped exit; on a fatal error
    /// an abort snapshot is written and a finish signal best-effort
    /// broadcast before the error is returned to the caller (§4.8, §7).
    pub fn run(&mut self, alloc: &mut dyn AllocFn) -> EnsembleResult<(PersisInfoMap, u8)> {
        match self.run_inner(alloc) {
            Ok(flag) => {
                self.final_drain_and_shutdown(flag)?;
                if let Err(err) = self.snapshot.write_calc_stats(&self.calc_stats.render()) {
                    tracing::warn!(error = %err, "failed to write calculation summary");
                }
                Ok((self.persis_info.clone(), flag.code()))
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    elapsed = self.elapsed_secs(),
                    sim_count = self.hist.sim_count(),
                    "manager aborting"
                );
                if let Err(snapshot_err) = self.snapshot.abort_dump(&self.hist) {
                    tracing::warn!(error = %snapshot_err, "failed to write abort snapshot");
                }
                if let Err(stats_err) = self.snapshot.write_calc_stats(&self.calc_stats.render()) {
                    tracing::warn!(error = %stats_err, "failed to write calculation summary");
                }
                self.broadcast_finish();
                Err(err)
            }
        }
    }

    fn run_inner(&mut self, alloc: &mut dyn AllocFn) -> EnsembleResult<ExitFlag> {
        loop {
            let flag = self.term_test(true);
            if flag != ExitFlag::Clean {
                return Ok(flag);
            }

            self.receive_phase()?;
            self.snapshot.maybe_snapshot(&self.hist)?;
            self.run_queue_update_hook();

            if self.registry.idle_workers().is_empty() {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }

            let flag = self.allocation_phase(alloc)?;
            if flag != ExitFlag::Clean {
                return Ok(flag);
            }
        }
    }

    /// §4.6 step 3: if a queue-update hook is installed, call it with the
    /// current history prefix and `persis_info`, replacing `persis_info`
    /// with its return value. A no-op when no hook is installed.
    fn run_queue_update_hook(&mut self) {
        if let Some(hook) = self.queue_update.as_mut() {
            let prefix = self.hist.trim();
            let updated = hook.update(&prefix, self.persis_info.clone());
            self.persis_info = updated;
        }
    }

    /// Poll every worker's `mail_flag` in a loop until a full sweep
    /// delivers nothing new (§4.6 step 1). Bounded because the number of
    /// in-flight results is bounded by the number of dispatched orders.
    fn receive_phase(&mut self) -> EnsembleResult<()> {
        loop {
            let worker_ids: Vec<WorkerId> = self.links.keys().copied().collect();
            let mut progressed = false;
            for worker in worker_ids {
                let ready = self
                    .links
                    .get(&worker)
                    .map(|link| link.mail_flag())
                    .unwrap_or(false);
                if !ready {
                    continue;
                }
                progressed = true;
                match self.receive_one(worker) {
                    Ok(()) => {}
                    Err(EnsembleError::Transport(w, _)) => self.retry_via_pickle_dump(w)?,
                    Err(other) => return Err(other),
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn receive_one(&mut self, worker: WorkerId) -> EnsembleResult<()> {
        let (tag, payload) = {
            let link = self
                .links
                .get(&worker)
                .ok_or(EnsembleError::UnknownWorker(worker))?;
            link.recv()?
        };
        self.apply_worker_message(worker, tag, payload)
    }

    /// The one-retry pickle-dump recovery path (§4.6, §7 kind 4): ask the
    /// worker to dump its pending payload to a file, read it back, delete
    /// it, and apply it as if the original `recv` had succeeded.
    fn retry_via_pickle_dump(&mut self, worker: WorkerId) -> EnsembleResult<()> {
        tracing::warn!(%worker, "transport error on receive, requesting pickle dump");
        {
            let link = self
                .links
                .get(&worker)
                .ok_or(EnsembleError::UnknownWorker(worker))?;
            link.send(Tag::ManSignalReqPickleDump, Payload::Signal)?;
        }

        let mut attempts = 0;
        loop {
            let ready = self
                .links
                .get(&worker)
                .map(|link| link.mail_flag())
                .unwrap_or(false);
            if ready {
                break;
            }
            attempts += 1;
            if attempts >= PICKLE_DUMP_POLL_ATTEMPTS {
                return Err(EnsembleError::Transport(
                    worker,
                    "pickle-dump retry timed out waiting for reply".into(),
                ));
            }
            std::thread::sleep(PICKLE_DUMP_POLL_INTERVAL);
        }

        let (tag, payload) = {
            let link = self
                .links
                .get(&worker)
                .ok_or(EnsembleError::UnknownWorker(worker))?;
            link.recv()?
        };
        let Payload::SnapshotPath(path) = payload else {
            return Err(EnsembleError::Transport(
                worker,
                format!("expected snapshot path reply, got {tag:?}"),
            ));
        };

        let bytes = std::fs::read(&path)?;
        std::fs::remove_file(&path)?;
        let msg: WorkerMessage = bincode::deserialize(&bytes)?;
        self.apply_worker_message(worker, Tag::from(msg.calc_type), Payload::Result(msg))
    }

    fn apply_worker_message(
        &mut self,
        worker: WorkerId,
        tag: Tag,
        payload: Payload,
    ) -> EnsembleResult<()> {
        if matches!(tag, Tag::AbortEnsemble) {
            return Err(EnsembleError::WorkerAbort(worker));
        }
        let Payload::Result(msg) = payload else {
            return Err(EnsembleError::UnknownCalcType(worker));
        };

        self.registry.clear_active(worker)?;

        let persistent_finished = matches!(
            msg.calc_status,
            CalcStatus::FinishedPersistentSim | CalcStatus::FinishedPersistentGen
        );

        // `calc_out` is always applied first, independent of the persistent
        // flag, matching `_update_state_on_worker_msg`/`_check_received_calc`
        // in the historical reference manager: a finishing persistent message
        // may still carry a final batch of results that must land in history.
        if let Some(slice) = &msg.calc_out {
            match msg.calc_type {
                CalcType::Sim => self.hist.mark_returned(worker, slice)?,
                CalcType::Gen => self.hist.append_generated(worker, slice.into_records())?,
            }
        } else if !persistent_finished {
            return Err(EnsembleError::HistoryInvariant(
                0,
                format!("{} result missing calc_out", msg.calc_type),
            ));
        }

        if persistent_finished {
            self.registry.clear_persistent(worker)?;
        }

        if let Some(libe_info) = &msg.libe_info {
            // A finishing message's `persistent` flag (if still set) means
            // "this session was persistent", not "re-arm persistence" — the
            // clear above must stick.
            if libe_info.persistent && !persistent_finished {
                self.registry.set_persistent(worker, msg.calc_type)?;
            }
            if let Some(blocking) = &libe_info.blocking {
                for &w in blocking {
                    self.registry.set_blocked(w, false)?;
                    self.registry.clear_active(w)?;
                }
            }
        }

        if let Some(update) = msg.persis_info {
            self.persis_info.merge(worker, update);
        }

        if let Some((start, calc_type)) = self.dispatch_started.remove(&worker) {
            self.calc_stats
                .record(worker, calc_type, start.elapsed().as_secs_f64(), msg.calc_status);
        }

        Ok(())
    }

    /// §4.6 step 4: if any worker is idle, call the allocation adapter and
    /// act on each returned order in dictionary (insertion) order,
    /// rechecking termination before every send.
    fn allocation_phase(&mut self, alloc: &mut dyn AllocFn) -> EnsembleResult<ExitFlag> {
        if self.registry.idle_workers().is_empty() {
            return Ok(ExitFlag::Clean);
        }

        let work = {
            let input = AllocInput {
                hist: self.hist.trim(),
                registry: &self.registry,
                persis_info: &self.persis_info,
            };
            alloc.allocate(&input)?
        };

        for (worker, order) in work {
            let flag = self.term_test(true);
            if flag != ExitFlag::Clean {
                return Ok(flag);
            }
            validate_work_order(worker, &order, &self.registry, &self.hist.trim())?;
            self.send_work_order(worker, &order)?;
            self.update_state_on_alloc(worker, &order)?;
        }

        Ok(ExitFlag::Clean)
    }

    /// §4.7: send the order, then (if it carries rows) the companion data
    /// slice as a second, immediately-following message on the same link.
    fn send_work_order(&self, worker: WorkerId, order: &WorkOrder) -> EnsembleResult<()> {
        let link = self
            .links
            .get(&worker)
            .ok_or(EnsembleError::UnknownWorker(worker))?;
        link.send(Tag::from(order.tag), Payload::Order(order.clone()))?;
        if !order.rows.is_empty() {
            let slice = self.hist.slice(&order.fields, &order.rows)?;
            link.send(Tag::DataSlice, Payload::Data(slice))?;
        }
        Ok(())
    }

    fn update_state_on_alloc(&mut self, worker: WorkerId, order: &WorkOrder) -> EnsembleResult<()> {
        self.registry.set_active(worker, order.tag)?;
        if order.libe_info.persistent {
            self.registry.set_persistent(worker, order.tag)?;
        }
        for &blocked in &order.libe_info.blocking {
            if !self.registry.is_idle(blocked)? {
                return Err(EnsembleError::WorkerBusy(blocked));
            }
            self.registry.set_blocked(blocked, true)?;
            self.registry.set_active(blocked, order.tag)?;
        }
        if matches!(order.tag, CalcType::Sim) {
            self.hist.mark_given(&order.rows, worker, self.elapsed_secs())?;
        }
        self.dispatch_started
            .insert(worker, (Instant::now(), order.tag));
        Ok(())
    }

    /// §4.8: drain outstanding results until every worker is idle or a
    /// wallclock trip is observed, then broadcast the finish signal on
    /// every link unconditionally.
    fn final_drain_and_shutdown(&mut self, flag: ExitFlag) -> EnsembleResult<()> {
        if flag != ExitFlag::Wallclock {
            loop {
                self.receive_phase()?;
                if !self.registry.any_active() {
                    break;
                }
                if self.term_test(false) == ExitFlag::Wallclock {
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.broadcast_finish();
        self.drain_persistent_finish_replies();
        Ok(())
    }

    fn broadcast_finish(&self) {
        for (worker, link) in &self.links {
            if let Err(err) = link.send(Tag::ManSignalFinish, Payload::Signal) {
                tracing::warn!(%worker, error = %err, "failed to send finish signal during shutdown");
            }
        }
    }

    /// A persistent worker replies with its `FinishedPersistentSim`/
    /// `FinishedPersistentGen` status only after receiving the finish
    /// signal broadcast above, so give outstanding persistent sessions a
    /// brief, bounded window to report in before the links are dropped.
    /// Best-effort: errors here are logged, never propagated, since the
    /// process is already shutting down.
    fn drain_persistent_finish_replies(&mut self) {
        const ATTEMPTS: u32 = 200;
        for _ in 0..ATTEMPTS {
            let any_persistent = self
                .registry
                .all_workers()
                .any(|w| self.registry.is_persistent(w).unwrap_or(false));
            if !any_persistent {
                return;
            }
            if let Err(err) = self.receive_phase() {
                tracing::warn!(error = %err, "error draining persistent-finish replies during shutdown");
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        tracing::warn!("timed out waiting for persistent workers to report finished during shutdown");
    }
}
