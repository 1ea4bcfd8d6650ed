use thiserror::Error;

/// Run-level failures. Any of these stops the batch before (or instead of)
/// advancing its lifecycle state.
#[derive(Error, Debug)]
pub enum CalcError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Rule set '{rule_set_id}' not found")]
    RuleSetNotFound { rule_set_id: String },

    #[error("Rule set '{rule_set_id}' has no variants")]
    NoVariants { rule_set_id: String },

    #[error("Variant '{variant_id}' has no components")]
    EmptyComponents { variant_id: String },

    #[error("Variant '{variant_id}' has duplicate ordinal {ordinal}")]
    DuplicateOrdinal { variant_id: String, ordinal: u32 },

    #[error("Component '{component_id}' has non-monotonic bands: {detail}")]
    NonMonotonicBands { component_id: String, detail: String },

    #[error("Component '{component_id}' is misconfigured: {detail}")]
    InvalidConfiguration { component_id: String, detail: String },

    #[error("Persistence of {what} failed: {reason}")]
    Persistence { what: &'static str, reason: String },

    #[error("Worker pool could not be built: {0}")]
    WorkerPool(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CalcResult<T> = Result<T, CalcError>;

/// A failure while evaluating one component for one entity.
/// Contained by the orchestrator: the component pays 0 and is flagged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("metric '{metric}' is not a finite number ({value})")]
    NonFiniteMetric { metric: String, value: f64 },

    #[error("no grid configured for '{key}'")]
    GridNotFound { key: String },

    #[error("lookup table is empty")]
    EmptyTable,

    #[error("prior result {index} referenced before it was computed")]
    PriorResultOutOfRange { index: usize },
}

pub type EvalResult<T> = Result<T, EvalError>;
