//! Job repository: persistence and claim operations for the `jobs` table.
//!
//! The claim operation is a single conditional UPDATE with a RETURNING
//! clause, so selecting a pending job and transitioning it to processing
//! happen in one atomic step. Two concurrent claimants can never receive
//! the same job, even across processes sharing the database file.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row};

use super::{Database, StoreError};
use crate::job::{ConfidenceSummary, FileRef, Job, JobStatus, WebhookMeta};

fn ts_to_sql(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_err(reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, reason)),
    )
}

fn ts_from_sql(s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("invalid timestamp '{}': {}", s, e)))
}

fn opt_ts_from_sql(s: Option<String>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    s.as_deref().map(ts_from_sql).transpose()
}

fn job_from_row(row: &Row<'_>) -> Result<Job, rusqlite::Error> {
    let files_json: String = row.get("files")?;
    let files: Vec<FileRef> = serde_json::from_str(&files_json)
        .map_err(|e| decode_err(format!("invalid files column: {}", e)))?;

    let status_str: String = row.get("status")?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| decode_err(format!("unknown job status '{}'", status_str)))?;

    let parsed_data: Option<serde_json::Value> = row
        .get::<_, Option<String>>("parsed_data")?
        .map(|s| {
            serde_json::from_str(&s)
                .map_err(|e| decode_err(format!("invalid parsed_data column: {}", e)))
        })
        .transpose()?;

    let confidence_summary = row
        .get::<_, Option<String>>("confidence_summary")?
        .map(|s| {
            ConfidenceSummary::parse(&s)
                .ok_or_else(|| decode_err(format!("unknown confidence summary '{}'", s)))
        })
        .transpose()?;

    let created_at_str: String = row.get("created_at")?;

    Ok(Job {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        project_id: row.get("project_id")?,
        report_id: row.get("report_id")?,
        files,
        total_size_mb: row.get("total_size_mb")?,
        model_id: row.get("model_id")?,
        status,
        message: row.get("message")?,
        files_processed: row.get("files_processed")?,
        successful_parses: row.get("successful_parses")?,
        failed_parses: row.get("failed_parses")?,
        parsing_time_seconds: row.get("parsing_time_seconds")?,
        parsed_data,
        confidence_score: row.get("confidence_score")?,
        confidence_summary,
        retry_count: row.get("retry_count")?,
        max_retries: row.get("max_retries")?,
        last_error: row.get("last_error")?,
        webhook_meta: WebhookMeta {
            delivered: row.get("webhook_delivered")?,
            status: row.get("webhook_status")?,
            webhook_url: row.get("webhook_url")?,
            attempts: row.get("webhook_attempts")?,
            last_attempt_at: opt_ts_from_sql(row.get("webhook_last_attempt_at")?)?,
        },
        created_at: ts_from_sql(&created_at_str)?,
        started_at: opt_ts_from_sql(row.get("started_at")?)?,
        completed_at: opt_ts_from_sql(row.get("completed_at")?)?,
    })
}

/// Partial update applied to a job by id. Only `Some` fields are written,
/// which makes a retried update idempotent.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub files_processed: Option<u32>,
    pub successful_parses: Option<u32>,
    pub failed_parses: Option<u32>,
    pub parsing_time_seconds: Option<f64>,
    pub parsed_data: Option<serde_json::Value>,
    pub confidence_score: Option<f64>,
    pub confidence_summary: Option<ConfidenceSummary>,
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub webhook_delivered: Option<bool>,
    pub webhook_status: Option<String>,
    pub webhook_attempts: Option<u32>,
    pub webhook_last_attempt_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), StoreError> {
    let files_json = serde_json::to_string(&job.files).expect("FileRef serializes");
    let parsed_json = job
        .parsed_data
        .as_ref()
        .map(|v| serde_json::to_string(v).expect("Value serializes"));

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, tenant_id, project_id, report_id, files, total_size_mb,
             model_id, status, message, files_processed, successful_parses, failed_parses,
             parsing_time_seconds, parsed_data, confidence_score, confidence_summary,
             retry_count, max_retries, last_error, webhook_url, webhook_delivered,
             webhook_status, webhook_attempts, webhook_last_attempt_at, created_at,
             started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
            params![
                job.id,
                job.tenant_id,
                job.project_id,
                job.report_id,
                files_json,
                job.total_size_mb,
                job.model_id,
                job.status.as_str(),
                job.message,
                job.files_processed,
                job.successful_parses,
                job.failed_parses,
                job.parsing_time_seconds,
                parsed_json,
                job.confidence_score,
                job.confidence_summary.map(|c| c.as_str()),
                job.retry_count,
                job.max_retries,
                job.last_error,
                job.webhook_meta.webhook_url,
                job.webhook_meta.delivered,
                job.webhook_meta.status,
                job.webhook_meta.attempts,
                job.webhook_meta.last_attempt_at.as_ref().map(ts_to_sql),
                ts_to_sql(&job.created_at),
                job.started_at.as_ref().map(ts_to_sql),
                job.completed_at.as_ref().map(ts_to_sql),
            ],
        )?;
        Ok(())
    })
}

/// Atomically claims up to `limit` pending jobs, oldest first.
///
/// Each claimed job is transitioned to `processing` with `started_at` set in
/// the same statement that selects it. Returns the claimed jobs in FIFO
/// order by creation time.
pub fn claim_batch(db: &Database, limit: u32, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE jobs
             SET status = 'processing', started_at = ?1, message = 'Parsing in progress'
             WHERE id IN (
                 SELECT id FROM jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?2
             )
             RETURNING *",
        )?;

        let mut jobs: Vec<Job> = stmt
            .query_map(params![ts_to_sql(&now), limit], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // RETURNING does not guarantee row order.
        jobs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        Ok(jobs)
    })
}

/// Applies a partial update to a job by id.
pub fn update(db: &Database, job_id: &str, update: &JobUpdate) -> Result<(), StoreError> {
    let mut assignments: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(job_id.to_string())];

    fn push(
        column: &str,
        value: Box<dyn rusqlite::types::ToSql>,
        values: &mut Vec<Box<dyn rusqlite::types::ToSql>>,
        assignments: &mut Vec<String>,
    ) {
        values.push(value);
        assignments.push(format!("{} = ?{}", column, values.len()));
    }

    if let Some(status) = update.status {
        push("status", Box::new(status.as_str()), &mut values, &mut assignments);
    }
    if let Some(ref message) = update.message {
        push("message", Box::new(message.clone()), &mut values, &mut assignments);
    }
    if let Some(n) = update.files_processed {
        push("files_processed", Box::new(n), &mut values, &mut assignments);
    }
    if let Some(n) = update.successful_parses {
        push("successful_parses", Box::new(n), &mut values, &mut assignments);
    }
    if let Some(n) = update.failed_parses {
        push("failed_parses", Box::new(n), &mut values, &mut assignments);
    }
    if let Some(secs) = update.parsing_time_seconds {
        push("parsing_time_seconds", Box::new(secs), &mut values, &mut assignments);
    }
    if let Some(ref data) = update.parsed_data {
        let json = serde_json::to_string(data).expect("Value serializes");
        push("parsed_data", Box::new(json), &mut values, &mut assignments);
    }
    if let Some(score) = update.confidence_score {
        push("confidence_score", Box::new(score), &mut values, &mut assignments);
    }
    if let Some(summary) = update.confidence_summary {
        push("confidence_summary", Box::new(summary.as_str()), &mut values, &mut assignments);
    }
    if let Some(n) = update.retry_count {
        push("retry_count", Box::new(n), &mut values, &mut assignments);
    }
    if let Some(ref err) = update.last_error {
        push("last_error", Box::new(err.clone()), &mut values, &mut assignments);
    }
    if let Some(delivered) = update.webhook_delivered {
        push("webhook_delivered", Box::new(delivered), &mut values, &mut assignments);
    }
    if let Some(ref status) = update.webhook_status {
        push("webhook_status", Box::new(status.clone()), &mut values, &mut assignments);
    }
    if let Some(n) = update.webhook_attempts {
        push("webhook_attempts", Box::new(n), &mut values, &mut assignments);
    }
    if let Some(ref at) = update.webhook_last_attempt_at {
        push("webhook_last_attempt_at", Box::new(ts_to_sql(at)), &mut values, &mut assignments);
    }
    if let Some(ref at) = update.started_at {
        push("started_at", Box::new(ts_to_sql(at)), &mut values, &mut assignments);
    }
    if let Some(ref at) = update.completed_at {
        push("completed_at", Box::new(ts_to_sql(at)), &mut values, &mut assignments);
    }

    if assignments.is_empty() {
        return Ok(());
    }

    let sql = format!("UPDATE jobs SET {} WHERE id = ?1", assignments.join(", "));

    db.with_conn(|conn| {
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, params_ref.as_slice())?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, StoreError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], job_from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(StoreError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, StoreError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
