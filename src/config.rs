//! Ensemble configuration: the TOML-sourced description of the calculation
//! (sim/gen specs, worker topology, exit criteria, snapshot cadence). Loaded
//! once at startup and validated before a single worker is dispatched (§6).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, EnsembleResult};
use crate::history::{FieldKind, FieldSpec};
use crate::termination::ExitCriteria;

/// A user column declaration as it appears in TOML: `name = "x"`,
/// `kind = "f64-vec"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub kind: FieldKindDecl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKindDecl {
    #[serde(rename = "f64")]
    F64,
    #[serde(rename = "f64-vec")]
    F64Vec,
    #[serde(rename = "i64")]
    I64,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "str")]
    Str,
}

impl From<FieldKindDecl> for FieldKind {
    fn from(value: FieldKindDecl) -> Self {
        match value {
            FieldKindDecl::F64 => FieldKind::F64,
            FieldKindDecl::F64Vec => FieldKind::F64Vec,
            FieldKindDecl::I64 => FieldKind::I64,
            FieldKindDecl::Bool => FieldKind::Bool,
            FieldKindDecl::Str => FieldKind::Str,
        }
    }
}

/// The simulator's declared `in`/`out` fields and any scalar user params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimSpecs {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<FieldDecl>,
    #[serde(default)]
    pub user: serde_json::Value,
}

/// The generator's declared `out` fields, batch size, and scalar user
/// params.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenSpecs {
    #[serde(default)]
    pub outputs: Vec<FieldDecl>,
    #[serde(default)]
    pub batch_size: usize,
    #[serde(default)]
    pub user: serde_json::Value,
}

/// `comms` values this crate recognizes as valid configuration syntax.
/// Only `"local"` is functionally wired to a transport (`LocalLink`) —
/// `"mpi"`/`"tcp"` are accepted here but the transports themselves are out
/// of scope (see Non-goals); `src/bin/ensemble.rs` only ever builds a
/// `LocalLink` fleet regardless of this value.
const RECOGNIZED_COMMS: [&str; 3] = ["mpi", "local", "tcp"];

/// Top-level ensemble configuration, one TOML document per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub nworkers: usize,
    #[serde(default)]
    pub sim_specs: SimSpecs,
    #[serde(default)]
    pub gen_specs: GenSpecs,
    #[serde(default)]
    pub exit_criteria: ExitCriteria,
    /// Preallocated history capacity; defaults to `sim_max` when set,
    /// otherwise must be given explicitly.
    pub history_capacity: Option<usize>,
    #[serde(default)]
    pub save_every_k: Option<usize>,
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_comms")]
    pub comms: String,
}

fn default_workdir() -> String {
    ".".to_string()
}

fn default_comms() -> String {
    "local".to_string()
}

impl EnsembleConfig {
    pub fn from_toml_str(text: &str) -> EnsembleResult<Self> {
        let config: EnsembleConfig =
            toml::from_str(text).map_err(|e| EnsembleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EnsembleResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EnsembleError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Startup validation (§6 / §7 kind 1): catch malformed configuration
    /// before any worker is spawned, rather than failing mid-run.
    fn validate(&self) -> EnsembleResult<()> {
        if !RECOGNIZED_COMMS.contains(&self.comms.as_str()) {
            return Err(EnsembleError::UnknownComms(self.comms.clone()));
        }
        if self.nworkers == 0 {
            return Err(EnsembleError::MissingSpecKey("nworkers".into()));
        }
        if self.gen_specs.outputs.is_empty() {
            return Err(EnsembleError::MissingSpecKey("gen_specs.outputs".into()));
        }
        let capacity = self.resolved_history_capacity();
        if capacity == 0 {
            return Err(EnsembleError::InconsistentFields(
                "history_capacity could not be resolved: set history_capacity or exit_criteria.sim_max"
                    .into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for decl in self.gen_specs.outputs.iter().chain(self.sim_specs.outputs.iter()) {
            if !seen.insert(decl.name.clone()) {
                return Err(EnsembleError::InconsistentFields(format!(
                    "field '{}' declared more than once across gen_specs/sim_specs outputs",
                    decl.name
                )));
            }
        }
        Ok(())
    }

    pub fn resolved_history_capacity(&self) -> usize {
        self.history_capacity
            .or(self.exit_criteria.sim_max)
            .unwrap_or(0)
    }

    /// The combined set of history field declarations (generator outputs
    /// plus simulator outputs), used to build the `HistoryTable`.
    pub fn field_specs(&self) -> Vec<FieldSpec> {
        self.gen_specs
            .outputs
            .iter()
            .chain(self.sim_specs.outputs.iter())
            .map(|d| FieldSpec::new(d.name.clone(), d.kind.into()))
            .collect()
    }
}
