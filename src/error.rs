use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider call timed out after {seconds}s")]
    Timeout { seconds: u64 },
}
