use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database unreachable for instance '{instance}': {detail}")]
    Connectivity { instance: String, detail: String },

    #[error("Required tool '{0}' not found in PATH")]
    ToolUnavailable(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolExecution {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("{failed} of {total} instances failed")]
    PartialFailure { failed: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
