//! HTTP client for the external parsing model.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use super::{ModelClient, ParsedFile};
use crate::error::AiError;

/// Client for a JSON parse endpoint.
///
/// The document bytes are POSTed to `<endpoint>/models/<model_id>:parse`.
/// The response body is the extracted structure with two extra keys the
/// model reports about itself: `confidence_score` (0-100) and
/// `confidence_summary`. Both are popped out of the data before it is
/// handed to the consolidator; the score is normalized to `[0, 1]`.
#[derive(Debug)]
pub struct HttpModelClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpModelClient {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, AiError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(AiError::InvalidEndpoint(endpoint.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AiError::ClientBuild)?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn parse(
        &self,
        bytes: &[u8],
        filename: &str,
        model_id: &str,
    ) -> Result<ParsedFile, AiError> {
        let url = format!("{}/models/{}:parse", self.endpoint, model_id);

        tracing::debug!(filename, model_id, "Sending file to parse endpoint");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .query(&[("filename", filename)])
            .body(bytes.to_vec())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AiError::Api {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        extract_parsed(&body)
    }
}

/// Decodes a model response body into a [`ParsedFile`].
fn extract_parsed(body: &str) -> Result<ParsedFile, AiError> {
    if body.trim().is_empty() {
        return Err(AiError::EmptyResponse);
    }

    let mut value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| AiError::MalformedResponse(e.to_string()))?;

    let object = value
        .as_object_mut()
        .ok_or_else(|| AiError::MalformedResponse("response is not a JSON object".to_string()))?;

    let score = object
        .remove("confidence_score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            AiError::MalformedResponse("missing or non-numeric confidence_score".to_string())
        })?;
    object.remove("confidence_summary");

    if object.is_empty() {
        return Err(AiError::EmptyResponse);
    }

    Ok(ParsedFile {
        data: value,
        confidence: (score / 100.0).clamp(0.0, 1.0),
    })
}
