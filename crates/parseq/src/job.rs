//! Job model for asynchronous parsing work.
//!
//! One `Job` exists per upload request. Jobs are created in `Pending` by the
//! upload boundary and exclusively mutated by the parsing worker afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a parsing job.
///
/// Transitions are restricted to `Pending -> Processing -> {Completed |
/// Pending | Failed}`. `Pending` is only re-entered from `Processing` via the
/// retry path; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Confidence bucket for a consolidated parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceSummary {
    High,
    Medium,
    Low,
}

impl ConfidenceSummary {
    /// Buckets an aggregate confidence score in `[0, 1]`.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            ConfidenceSummary::High
        } else if score >= 0.60 {
            ConfidenceSummary::Medium
        } else {
            ConfidenceSummary::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceSummary::High => "High",
            ConfidenceSummary::Medium => "Medium",
            ConfidenceSummary::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "High" => Some(ConfidenceSummary::High),
            "Medium" => Some(ConfidenceSummary::Medium),
            "Low" => Some(ConfidenceSummary::Low),
            _ => None,
        }
    }
}

/// A staged file belonging to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRef {
    /// Original filename as uploaded.
    pub filename: String,
    /// Tenant-prefixed stager key (e.g. `tenant-001/20260101_120000_report.pdf`).
    pub location: String,
    /// File size in megabytes.
    pub size_mb: f64,
}

/// Webhook delivery metadata.
///
/// The delivery policy is exactly one attempt per terminal transition, so
/// `attempts` is 0 or 1 for the lifetime of the job.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookMeta {
    pub delivered: bool,
    /// "pending" until an attempt is made, then "success" or "fail (...)".
    pub status: String,
    pub webhook_url: Option<String>,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl Default for WebhookMeta {
    fn default() -> Self {
        Self {
            delivered: false,
            status: "pending".to_string(),
            webhook_url: None,
            attempts: 0,
            last_attempt_at: None,
        }
    }
}

/// Creation record produced by the external upload boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub tenant_id: String,
    pub project_id: String,
    pub report_id: String,
    pub files: Vec<FileRef>,
    pub webhook_url: Option<String>,
    pub model_id: String,
    pub max_retries: Option<u32>,
}

/// A persisted parsing job.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier (UUID). Never reused.
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub report_id: String,
    /// Ordered sequence of staged files to parse.
    pub files: Vec<FileRef>,
    /// Sum of file sizes in MB.
    pub total_size_mb: f64,
    /// AI model used for parsing.
    pub model_id: String,
    pub status: JobStatus,
    /// Human-readable status message.
    pub message: Option<String>,
    /// Number of files the last attempt looked at.
    pub files_processed: u32,
    pub successful_parses: u32,
    pub failed_parses: u32,
    /// Wall-clock seconds from claim to completion (download + parse +
    /// consolidation).
    pub parsing_time_seconds: Option<f64>,
    /// Consolidated structured data. Non-null once `Completed`.
    pub parsed_data: Option<serde_json::Value>,
    /// Aggregate confidence in `[0, 1]`.
    pub confidence_score: Option<f64>,
    pub confidence_summary: Option<ConfidenceSummary>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Last error message. Non-null once `Failed`.
    pub last_error: Option<String>,
    pub webhook_meta: WebhookMeta,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Builds a fresh `Pending` job from an upload-boundary creation record.
    pub fn from_new(new: NewJob, default_max_retries: u32) -> Self {
        let total_size_mb = new.files.iter().map(|f| f.size_mb).sum();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: new.tenant_id,
            project_id: new.project_id,
            report_id: new.report_id,
            files: new.files,
            total_size_mb,
            model_id: new.model_id,
            status: JobStatus::Pending,
            message: Some("Parsing queued".to_string()),
            files_processed: 0,
            successful_parses: 0,
            failed_parses: 0,
            parsing_time_seconds: None,
            parsed_data: None,
            confidence_score: None,
            confidence_summary: None,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(default_max_retries),
            last_error: None,
            webhook_meta: WebhookMeta {
                webhook_url: new.webhook_url,
                ..WebhookMeta::default()
            },
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Client-supplied callback URL, if any.
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_meta.webhook_url.as_deref()
    }
}
