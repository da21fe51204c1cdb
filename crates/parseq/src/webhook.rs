//! Webhook dispatcher.
//!
//! Notifies the client's callback URL after a job reaches a terminal state.
//! Delivery is exactly one attempt per terminal transition: no retries, no
//! queue. The outcome is reported to the caller as a [`DeliveryResult`] so
//! it can be persisted on the job without ever touching the job status.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;

use crate::error::WebhookError;
use crate::job::{Job, JobStatus};

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub delivered: bool,
    /// "success", or "fail (<http status>)", or "fail (<error>)".
    pub status: String,
    pub attempted_at: DateTime<Utc>,
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(WebhookError::ClientBuild)?;
        Ok(Self { http })
    }

    /// Posts the terminal notification for `job` to `url`.
    ///
    /// Never fails: every outcome, including connection errors, is folded
    /// into the returned [`DeliveryResult`].
    pub async fn deliver(&self, job: &Job, url: &str) -> DeliveryResult {
        let payload = notification_payload(job);
        let attempted_at = Utc::now();

        let outcome = self.http.post(url).json(&payload).send().await;

        let (delivered, status) = match outcome {
            Ok(response) if response.status().is_success() => (true, "success".to_string()),
            Ok(response) => (false, format!("fail ({})", response.status().as_u16())),
            Err(e) => {
                let reason: String = e.to_string().chars().take(100).collect();
                (false, format!("fail ({})", reason))
            }
        };

        if delivered {
            tracing::info!(job_id = %job.id, url, "Webhook delivered");
        } else {
            tracing::warn!(job_id = %job.id, url, status = %status, "Webhook delivery failed");
        }

        DeliveryResult {
            delivered,
            status,
            attempted_at,
        }
    }
}

/// Builds the JSON body sent to the callback URL.
///
/// Completed jobs carry `parsed_data`; failed jobs carry `error`.
fn notification_payload(job: &Job) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("job_id".to_string(), json!(job.id));
    body.insert("tenant_id".to_string(), json!(job.tenant_id));
    body.insert("project_id".to_string(), json!(job.project_id));
    body.insert("report_id".to_string(), json!(job.report_id));
    body.insert("status".to_string(), json!(job.status.as_str()));
    body.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));

    match job.status {
        JobStatus::Completed => {
            body.insert(
                "parsed_data".to_string(),
                job.parsed_data.clone().unwrap_or(serde_json::Value::Null),
            );
            if let Some(score) = job.confidence_score {
                body.insert("confidence_score".to_string(), json!(score));
            }
            if let Some(summary) = job.confidence_summary {
                body.insert("confidence_summary".to_string(), json!(summary.as_str()));
            }
        }
        JobStatus::Failed => {
            body.insert(
                "error".to_string(),
                json!(job.last_error.as_deref().unwrap_or("unknown error")),
            );
        }
        _ => {}
    }

    serde_json::Value::Object(body)
}
