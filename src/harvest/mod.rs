//! Harvest runs
//!
//! [`Orchestrator`] drives one run for one source. [`Harvester`] wires
//! configuration into orchestrators and runs several sources.

mod manager;
mod orchestrator;
mod result;

pub use manager::Harvester;
pub use orchestrator::Orchestrator;
pub use result::{ErrorDetail, ErrorKind, ProfileError, ProfileOutcome, RunResult};
