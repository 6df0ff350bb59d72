use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Throttled by remote service: {0}")]
    Throttling(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Artifact error: {0}")]
    Artifact(String),
}

impl PipelineError {
    /// Only throttling is worth waiting out; everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Throttling(_))
    }

    /// Short kind name used in logs and persisted error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Network(_) => "network",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::ModelLoad(_) => "model_load",
            PipelineError::Model(_) => "model",
            PipelineError::QuotaExceeded(_) => "quota_exceeded",
            PipelineError::Auth(_) => "auth",
            PipelineError::Throttling(_) => "throttling",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::Config(_) => "config",
            PipelineError::Artifact(_) => "artifact",
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Artifact(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Artifact(err.to_string())
    }
}
