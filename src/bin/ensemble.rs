//! CLI entry point: loads configuration, spawns an in-process `LocalLink`
//! worker fleet running the bundled reference generator/simulator
//! functions, runs the coordinator to completion, and maps the returned
//! exit flag to a process exit code (§6 supplemental).

use std::path::PathBuf;

use clap::Parser;
use indexmap::IndexMap;

use ensemble_coordinator::config::{EnsembleConfig, FieldDecl, FieldKindDecl, GenSpecs, SimSpecs};
use ensemble_coordinator::demo_funcs::OnlyPersistentGens;
use ensemble_coordinator::error::EnsembleResult;
use ensemble_coordinator::history::HistoryTable;
use ensemble_coordinator::local::link_pair;
use ensemble_coordinator::snapshot::SnapshotWriter;
use ensemble_coordinator::termination::ExitCriteria;
use ensemble_coordinator::types::WorkerId;
use ensemble_coordinator::worker_loop::{run_worker, WorkerLoopConfig};
use ensemble_coordinator::Manager;

#[derive(Parser, Debug)]
#[command(name = "ensemble", about = "Run a generate-simulate ensemble")]
struct Cli {
    /// Path to a TOML configuration file. Falls back to a small bundled
    /// uniform-sampling demo when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    nworkers: Option<usize>,

    #[arg(long = "sim-max")]
    sim_max: Option<usize>,

    #[arg(long = "out-dir", default_value = ".")]
    out_dir: PathBuf,
}

fn main() {
    ensemble_coordinator::init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!(error = %err, "ensemble run failed");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> EnsembleResult<i32> {
    let mut config = match &cli.config {
        Some(path) => EnsembleConfig::from_file(path)?,
        None => default_demo_config(),
    };
    if let Some(n) = cli.nworkers {
        config.nworkers = n;
    }
    if let Some(sim_max) = cli.sim_max {
        config.exit_criteria.sim_max = Some(sim_max);
        if config.history_capacity.is_none() {
            config.history_capacity = Some(sim_max);
        }
    }

    let capacity = config.resolved_history_capacity();
    let field_specs = config.field_specs();
    let hist = HistoryTable::new(capacity, 0, &field_specs);

    let mut links = IndexMap::new();
    let mut worker_handles = Vec::new();
    for i in 1..=config.nworkers {
        let worker_id = WorkerId(i as u16);
        let (manager_link, worker_link) = link_pair(worker_id);
        links.insert(worker_id, manager_link);

        let worker_config = WorkerLoopConfig {
            gen_user: config.gen_specs.user.clone(),
            gen_batch_size: config.gen_specs.batch_size.max(1),
            seed: 1_000 + i as u64,
        };
        worker_handles.push(std::thread::spawn(move || {
            if let Err(err) = run_worker(&worker_link, &worker_config) {
                tracing::warn!(worker = i, error = %err, "worker loop exited with error");
            }
        }));
    }

    let snapshot = SnapshotWriter::new(&cli.out_dir, config.save_every_k);
    let mut alloc = OnlyPersistentGens::new(config.sim_specs.inputs.clone(), Vec::new());
    let mut manager = Manager::new(links, hist, config.exit_criteria.clone(), snapshot);

    let (_, exit_flag) = manager.run(&mut alloc)?;

    for handle in worker_handles {
        let _ = handle.join();
    }

    Ok(exit_flag as i32)
}

/// Scenario 1 of §8: 8 rows of `x ∈ ℝ²` drawn from `[-3,3]×[-2,2]`,
/// evaluated by the bundled quadratic simulator, with 3 workers and
/// `sim_max=8`.
fn default_demo_config() -> EnsembleConfig {
    EnsembleConfig {
        nworkers: 3,
        sim_specs: SimSpecs {
            inputs: vec!["x".to_string()],
            outputs: vec![FieldDecl {
                name: "f".to_string(),
                kind: FieldKindDecl::F64,
            }],
            user: serde_json::Value::Null,
        },
        gen_specs: GenSpecs {
            outputs: vec![FieldDecl {
                name: "x".to_string(),
                kind: FieldKindDecl::F64Vec,
            }],
            batch_size: 1,
            user: serde_json::json!({ "lb": [-3.0, -2.0], "ub": [3.0, 2.0] }),
        },
        exit_criteria: ExitCriteria {
            sim_max: Some(8),
            ..Default::default()
        },
        history_capacity: Some(8),
        save_every_k: None,
        workdir: ".".to_string(),
        comms: "local".to_string(),
    }
}
