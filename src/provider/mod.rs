// src/provider/mod.rs
pub mod rfd;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::topic::Topic;

/// Why a fetch produced no usable topic collection.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("upstream returned no topics")]
    Empty,
}

impl ProviderError {
    /// Classify a client error; a client-side deadline is reported as `Timeout(limit)`.
    pub fn from_http(e: reqwest::Error, limit: Duration) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(limit)
        } else {
            ProviderError::from(e)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Malformed(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// The capability the refresher depends on: produce the full current topic set.
#[async_trait]
pub trait TopicProvider: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Topic>, ProviderError>;
    fn name(&self) -> &'static str;
}
