use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error returned by the SFU signaling API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u32,
    pub message: String,
    /// Whether the server considers the request retryable.
    #[serde(default)]
    pub retryable: bool,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "api error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("socket error: {0}")]
    Socket(String),
    #[error("{0}")]
    Api(ApiError),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no ack within {0:?}")]
    LivenessTimeout(Duration),
    #[error("signaling error: {0}")]
    Signaling(String),
}

impl CallError {
    /// Whether the connection controller should retry after this error.
    ///
    /// Socket-level failures and liveness timeouts are network blips;
    /// API errors retry only when the server marks them retryable.
    /// Decode errors never affect connection state at all.
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Socket(_) | CallError::LivenessTimeout(_) => true,
            CallError::Api(api) => api.retryable,
            CallError::Decode(_) | CallError::Signaling(_) => false,
        }
    }
}
