//! AI parsing client.
//!
//! The worker talks to the external parsing model through the
//! [`ModelClient`] trait; `HttpModelClient` is the production
//! implementation and tests script outcomes through the stub.

use async_trait::async_trait;

use crate::error::AiError;

pub mod http;

#[cfg(test)]
pub mod stub;

pub use http::HttpModelClient;

/// One successfully parsed file: extracted structure plus the model's
/// confidence estimate normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub data: serde_json::Value,
    pub confidence: f64,
}

/// Per-file parse call against an externally configured model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        model_id: &str,
    ) -> Result<ParsedFile, AiError>;
}
