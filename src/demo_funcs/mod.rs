//! Reference generator, allocator, and simulator functions bundled with the
//! crate so the coordinator is runnable out of the box and so the
//! integration tests have a realistic, non-trivial workload to drive.
//!
//! None of these are part of the coordinator's core contract — a real
//! deployment supplies its own generator/simulator/allocator — but their
//! shape (plain functions over `HistorySlice`/`WorkOrder`) is the one any
//! user-supplied function must match.

mod only_persistent_gens;
mod toy_sim;
mod uniform_sampling;

pub use only_persistent_gens::OnlyPersistentGens;
pub use toy_sim::quadratic_sim;
pub use uniform_sampling::uniform_sample_batch;
