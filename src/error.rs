use thiserror::Error;

pub type BacktestResult<T> = Result<T, BacktestError>;

/// The exhaustive set of failure modes the core surfaces (spec §7).
///
/// Configuration, data, and feature-pipeline errors are fatal to a run and
/// abort before the simulation phase begins. Exchange errors are recoverable
/// within a bar (order rejection, counter increment) and never propagate out
/// of `SimulatedExchange::process_bar`. Artifact errors are reported after a
/// successful simulation without corrupting the in-memory result.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    FeaturePipeline(#[from] FeaturePipelineError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Errors raised while loading or compiling an `IdeaCard`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("invalid symbol '{0}': must match ^[A-Z0-9]+USDT$")]
    InvalidSymbol(String),

    #[error("unsupported indicator type '{0}'")]
    UnsupportedIndicatorType(String),

    #[error("invalid params for indicator '{indicator_type}': {reason}")]
    InvalidIndicatorParams {
        indicator_type: String,
        reason: String,
    },

    #[error("missing warmup config for role '{0}'")]
    MissingWarmupConfig(String),

    #[error("rule compile error: {0}")]
    RuleCompileError(String),
}

/// Errors raised while resolving historical data coverage.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DataError {
    #[error("data not found for symbol '{symbol}' tf '{tf}'")]
    DataNotFound { symbol: String, tf: String },

    #[error("data gap in symbol '{symbol}' tf '{tf}' between {from} and {to}")]
    DataGap {
        symbol: String,
        tf: String,
        from: i64,
        to: i64,
    },

    #[error("insufficient coverage: need [{need_start}, {need_end}], have [{have_start}, {have_end}]")]
    InsufficientCoverage {
        need_start: i64,
        need_end: i64,
        have_start: i64,
        have_end: i64,
    },

    #[error("insufficient sim bars: need at least {min_required}, have {available} after warmup/delay")]
    InsufficientSimBars {
        min_required: usize,
        available: usize,
    },
}

/// Errors raised while building or reading the feature frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeaturePipelineError {
    #[error("canonical collision on column '{column}' from specs {first_spec} and {second_spec}")]
    CanonicalCollision {
        column: String,
        first_spec: String,
        second_spec: String,
    },

    #[error("indicator '{indicator_type}' (output '{output_key}') missing declared outputs: {missing:?}")]
    MissingDeclaredOutputs {
        indicator_type: String,
        output_key: String,
        missing: Vec<String>,
    },

    #[error("feature array length mismatch for '{key}': expected {expected}, got {actual}")]
    FeatureLengthMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("indicator '{0}' not declared in feed store")]
    IndicatorNotDeclared(String),

    #[error("indicator '{key}' is NaN at index {index} (still in warmup)")]
    IndicatorNan { key: String, index: usize },
}

/// Errors raised by the simulated exchange while processing a bar.
///
/// These are recoverable: the hot loop counts them and continues, except
/// `Liquidation` which is terminal for the current position (see
/// `engine::stop` for how it interacts with run-level stop conditions).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("insufficient margin: need {required_usdt:.8} available {available_usdt:.8}")]
    InsufficientMargin {
        required_usdt: f64,
        available_usdt: f64,
    },

    #[error("duplicate pending order for the same intent")]
    DuplicatePendingOrder,

    #[error("order book full (capacity {capacity})")]
    OrderBookFull { capacity: usize },

    #[error("position liquidated at {price:.8} on bar {bar_index}")]
    Liquidation { price: f64, bar_index: usize },

    #[error("entries are disabled for the remainder of this run")]
    EntriesDisabled,
}

/// Errors raised while writing or verifying run artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to write artifact '{path}': {reason}")]
    ArtifactWriteFailed { path: String, reason: String },

    #[error("hash mismatch for '{artifact}': expected {expected} got {actual}")]
    HashMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
