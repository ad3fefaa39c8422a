//! Engine error taxonomy — a single result-carrying type for every entry point.
//!
//! Kinds mirror the propagation policy: `InvalidInput`/`FileRejected` are
//! surfaced to the caller before anything touches the stores; `Io` aborts
//! the capture path; `Corruption` is fatal for the affected item only;
//! `ExtractionFailure`/`Timeout` are confined to a single enrichment stage
//! and never escape it.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("file rejected: {0}")]
    FileRejected(String),

    #[error("not found")]
    NotFound,

    #[error("duplicate id")]
    DuplicateId,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("enrichment stage timed out")]
    Timeout,
}

impl EngineError {
    /// A short machine-readable kind string, stable across versions —
    /// used by the HTTP layer and by the overlay's "one-line reason" display.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::FileRejected(_) => "file_rejected",
            Self::NotFound => "not_found",
            Self::DuplicateId => "duplicate_id",
            Self::Io(_) => "io_error",
            Self::Corruption(_) => "corruption",
            Self::ExtractionFailure(_) => "extraction_failure",
            Self::Timeout => "timeout",
        }
    }

    /// Human-readable reason shown to the user — no stack traces, one line.
    pub fn reason(&self) -> String {
        format!("{self}")
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Corruption(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
