use thiserror::Error;

pub type Result<T> = std::result::Result<T, FbAdsError>;

#[derive(Debug, Error)]
pub enum FbAdsError {
    #[error("Token extraction failed: {0}")]
    TokenExtraction(String),

    #[error("Image upload failed: {0}")]
    ImageUpload(String),

    #[error("Failed to accept ad policy (status {status}): {message}")]
    AcceptPolicy { status: u16, message: String },

    #[error("Stats retrieval failed: {0}")]
    StatsRetrieval(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid proxy string: {0}")]
    InvalidProxy(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline exceeded deadline of {0}s")]
    Timeout(u64),
}

impl From<reqwest::Error> for FbAdsError {
    fn from(err: reqwest::Error) -> Self {
        FbAdsError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FbAdsError {
    fn from(err: serde_json::Error) -> Self {
        FbAdsError::Parse(err.to_string())
    }
}
