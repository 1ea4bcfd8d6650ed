//! Calculation core for variable compensation.
//!
//! Every component is evaluated twice, by the component evaluator (path A)
//! and by the intent executor (path B), and the two results are compared
//! per entity and per component. Agreement history is kept per pattern
//! signature as a persisted confidence density.

pub mod batch;
pub mod comparator;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod intent;
pub mod metrics;
pub mod orchestrator;
pub mod rule_set;
pub mod signature;
pub mod store;
pub mod surface;
pub mod types;

pub use orchestrator::{run_calculation, BatchOrchestrator, CalculationOutcome};
