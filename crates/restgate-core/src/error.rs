use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Schema context could not be acquired. Recoverable: `init()` may be retried.
    #[error("Initialization error: {0}")]
    Initialization(String),

    /// Malformed configuration, surfaced before any socket is touched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Two handler trees claim overlapping path prefixes.
    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("Server start error: {0}")]
    ServerStart(String),

    /// Listener teardown did not complete cleanly.
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Short machine-readable tag, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialization(_) => "initialization",
            Self::Configuration(_) => "configuration",
            Self::Conflict(_) => "conflict",
            Self::ServerStart(_) => "server_start",
            Self::Shutdown(_) => "shutdown",
            Self::Service(_) => "service",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
