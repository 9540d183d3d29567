use thiserror::Error;

/// Input data errors
///
/// Recovered locally through documented fallbacks wherever possible; these
/// only surface as a run failure when every fallback path is exhausted.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Empty alpha signal")]
    EmptySignal,

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Insufficient history: {rows} rows, {required} required")]
    InsufficientHistory { rows: usize, required: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Weight constraint violations
///
/// Most are corrected in place (clip / renormalize / zero) and logged; the
/// final-output variants are hard validation errors surfaced to the
/// orchestrator.
#[derive(Error, Debug)]
pub enum ConstraintError {
    #[error("Gross exposure {total:.6} exceeds limit {limit:.6}")]
    GrossExposureExceeded { total: f64, limit: f64 },

    #[error("Weight for {symbol} out of bounds: {weight:.6} (max {max:.6})")]
    WeightOutOfBounds {
        symbol: String,
        weight: f64,
        max: f64,
    },

    #[error("Non-finite weight for {0}")]
    NonFiniteWeight(String),
}

/// Convex solver errors
///
/// Never fatal to a run: the optimizer recovers via an equal-weight fallback
/// and reports the status in its info record.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Problem setup failed: {0}")]
    SetupError(String),

    #[error("Solver returned non-optimal status: {0}")]
    NonOptimal(String),

    #[error("Numerical error: {0}")]
    NumericalError(String),
}

/// Broker connector errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Missing broker credentials: {0}")]
    MissingCredentials(String),

    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Retry exhausted after {attempts} attempts: {message}")]
    RetryExhausted { attempts: u32, message: String },
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Pipeline stage failures
///
/// The only error class that is operator-visible as a failed run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
