//! Ensemble Coordinator
//!
//! A manager/worker coordination engine for iterative generate-simulate
//! ensembles: a single manager holds the authoritative history of proposed
//! and evaluated points, consults a pluggable allocation policy to decide
//! what each idle worker should do next, and dispatches work across a
//! transport-abstracted set of worker links.

pub mod alloc;
pub mod calc_stats;
pub mod config;
pub mod coordinator;
pub mod demo_funcs;
pub mod error;
pub mod history;
pub mod link;
pub mod local;
pub mod persis_info;
pub mod registry;
pub mod snapshot;
pub mod termination;
pub mod types;
pub mod worker_loop;

pub use coordinator::Manager;
pub use error::{EnsembleError, EnsembleResult};
pub use types::{CalcStatus, CalcType, Tag, WorkerId};

use tracing::info;

/// Initialize structured logging for the CLI entry point.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("ensemble coordinator logging initialized");
}
