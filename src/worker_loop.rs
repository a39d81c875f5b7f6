//! A reference worker loop: drives the bundled generator and simulator
//! functions over a `LocalWorkerLink`. Exists so the coordinator can be
//! exercised end to end without a real cluster; a production deployment's
//! workers are out of scope for this crate (§4.3 / Non-goals) and replace
//! this loop entirely.

use rand::SeedableRng;

use crate::alloc::LibeInfoOut;
use crate::demo_funcs::{quadratic_sim, uniform_sample_batch};
use crate::error::{EnsembleError, EnsembleResult};
use crate::link::{LibeInfoIn, Payload, WorkerMessage};
use crate::local::LocalWorkerLink;
use crate::persis_info::PersisInfo;
use crate::types::{CalcStatus, CalcType, Tag};

/// Parameters a worker needs to run the bundled demo functions; stands in
/// for whatever configuration a real worker process would load on its own.
pub struct WorkerLoopConfig {
    pub gen_user: serde_json::Value,
    pub gen_batch_size: usize,
    pub seed: u64,
}

/// Run until the manager sends a stop/kill signal or the link breaks.
/// Returns `Ok(())` on a clean stop; any other outcome is a transport or
/// protocol error.
///
/// A worker only ever reports `FinishedPersistentSim`/`FinishedPersistentGen`
/// when it is actually tearing down a persistent session on a stop signal —
/// never merely because the exchange it is currently replying to happens to
/// be persistent-flagged. An ongoing persistent exchange reports plain
/// `WorkerDone` with `libe_info.persistent` carrying the continuing flag, the
/// same way `libE_worker.py` keeps reporting regular results for a running
/// persistent generator and only sends its finished status on `STOP_TAG`.
pub fn run_worker(link: &LocalWorkerLink, config: &WorkerLoopConfig) -> EnsembleResult<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
    let mut persistent_calc_type: Option<CalcType> = None;

    loop {
        let (tag, payload) = link.recv_blocking()?;
        match tag {
            Tag::Stop | Tag::ManSignalFinish | Tag::ManSignalKill | Tag::WorkerKill => {
                if let Some(calc_type) = persistent_calc_type {
                    send_finished_persistent(link, calc_type)?;
                }
                return Ok(());
            }
            Tag::EvalSim => {
                let Payload::Order(order) = payload else {
                    return Err(protocol_error("expected work order on EvalSim"));
                };
                let input = if order.rows.is_empty() {
                    None
                } else {
                    match link.recv_blocking()? {
                        (Tag::DataSlice, Payload::Data(slice)) => Some(slice),
                        _ => return Err(protocol_error("expected data slice after EvalSim order")),
                    }
                };
                let input = input.ok_or_else(|| protocol_error("EvalSim order carried no rows"))?;
                let out = quadratic_sim(&input)?;
                let persistent = order.libe_info.persistent;
                persistent_calc_type = if persistent { Some(CalcType::Sim) } else { None };
                link.send(
                    Tag::WorkerDone,
                    Payload::Result(WorkerMessage {
                        calc_type: CalcType::Sim,
                        calc_status: CalcStatus::WorkerDone,
                        calc_out: Some(out),
                        libe_info: Some(LibeInfoIn {
                            persistent,
                            blocking: None,
                        }),
                        persis_info: None,
                    }),
                )?;
            }
            Tag::EvalGen => {
                let Payload::Order(order) = payload else {
                    return Err(protocol_error("expected work order on EvalGen"));
                };
                let persistent = order.libe_info.persistent;
                persistent_calc_type = if persistent { Some(CalcType::Gen) } else { None };
                let rows = uniform_sample_batch(&config.gen_user, config.gen_batch_size, &mut rng)?;
                let out = crate::history::HistorySlice::from_records(
                    &[crate::history::FieldSpec::new(
                        "x",
                        crate::history::FieldKind::F64Vec,
                    )],
                    &rows,
                )?;
                link.send(
                    Tag::WorkerDone,
                    Payload::Result(WorkerMessage {
                        calc_type: CalcType::Gen,
                        calc_status: CalcStatus::WorkerDone,
                        calc_out: Some(out),
                        libe_info: Some(LibeInfoIn {
                            persistent,
                            blocking: None,
                        }),
                        persis_info: Some(PersisInfo::new()),
                    }),
                )?;
            }
            other => {
                return Err(protocol_error(&format!("unexpected tag on worker loop: {other:?}")));
            }
        }
    }
}

/// Send the final reply for a persistent session being torn down on a stop
/// signal. Carries no `calc_out`: any data the session produced was already
/// sent with its own `WorkerDone` reply.
fn send_finished_persistent(link: &LocalWorkerLink, calc_type: CalcType) -> EnsembleResult<()> {
    let calc_status = match calc_type {
        CalcType::Sim => CalcStatus::FinishedPersistentSim,
        CalcType::Gen => CalcStatus::FinishedPersistentGen,
    };
    link.send(
        Tag::WorkerDone,
        Payload::Result(WorkerMessage {
            calc_type,
            calc_status,
            calc_out: None,
            libe_info: Some(LibeInfoIn {
                persistent: false,
                blocking: None,
            }),
            persis_info: None,
        }),
    )
}

fn protocol_error(message: &str) -> EnsembleError {
    EnsembleError::Transport(crate::types::WorkerId::MANAGER, message.to_string())
}

/// Unused by the worker loop itself but kept alongside it: the default
/// `libe_info` a worker attaches to a non-persistent result.
pub fn default_libe_info_out() -> LibeInfoOut {
    LibeInfoOut::default()
}
