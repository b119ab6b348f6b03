// Document-store side of the agent: value normalization, the store seam and
// the plan executor.

pub mod executor;
pub mod normalizer;
pub mod store;

#[cfg(test)]
pub mod memory;

pub use executor::{QueryPlanExecutor, ResultMap, MAX_RESULT_DOCUMENTS};
pub use store::{DocumentStore, UpdateOutcome};
