//! Parsing worker.
//!
//! Pull-based loop over the job store: claim a batch of pending jobs,
//! process each one to a terminal state or back to pending for retry, sleep,
//! repeat. A single worker owns all claimed jobs; the claim itself is atomic
//! in the store, so running a second worker against the same database is
//! safe even though this crate does not coordinate them.
//!
//! There is no lease or heartbeat on claimed jobs. A crash mid-processing
//! leaves the job in `processing` until an operator intervenes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{info_span, Instrument};

use crate::ai::ModelClient;
use crate::consolidate::{consolidate, FileOutcome};
use crate::db::{job_repo, Database, JobUpdate, StoreError};
use crate::job::{Job, JobStatus};
use crate::stager::FileStager;
use crate::webhook::WebhookDispatcher;

/// Worker knobs, fixed at construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub polling_interval: Duration,
    pub batch_size: u32,
    pub default_max_retries: u32,
    pub webhook_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(120),
            batch_size: 10,
            default_max_retries: 3,
            webhook_timeout: Duration::from_secs_f64(10.0),
        }
    }
}

struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

/// Handle for stopping a running worker.
///
/// `stop` is prompt: it wakes the worker out of its polling sleep, but the
/// batch currently in flight always finishes first.
#[derive(Clone)]
pub struct WorkerHandle {
    shutdown: Arc<Shutdown>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        self.shutdown.requested.store(true, Ordering::SeqCst);
        self.shutdown.notify.notify_one();
    }
}

pub struct ParsingWorker {
    db: Database,
    stager: Arc<dyn FileStager>,
    model: Arc<dyn ModelClient>,
    webhook: WebhookDispatcher,
    config: WorkerConfig,
    shutdown: Arc<Shutdown>,
}

impl ParsingWorker {
    pub fn new(
        db: Database,
        stager: Arc<dyn FileStager>,
        model: Arc<dyn ModelClient>,
        webhook: WebhookDispatcher,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            stager,
            model,
            webhook,
            config,
            shutdown: Arc::new(Shutdown {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Runs the polling loop until [`WorkerHandle::stop`] is called.
    pub async fn run(&self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            polling_interval_seconds = self.config.polling_interval.as_secs(),
            "Parsing worker started"
        );

        while !self.shutdown.requested.load(Ordering::SeqCst) {
            match self.process_batch().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(jobs = n, "Batch finished"),
                Err(e) => tracing::error!(error = %e, "Failed to claim pending jobs"),
            }

            if self.shutdown.requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.shutdown.notify.notified() => {}
                _ = tokio::time::sleep(self.config.polling_interval) => {}
            }
        }

        tracing::info!("Parsing worker stopped");
    }

    /// Claims and processes one batch. Returns the number of jobs claimed.
    ///
    /// Per-job errors are absorbed at the job boundary; only a claim failure
    /// surfaces, since without the store there is nothing to do.
    pub async fn process_batch(&self) -> Result<usize, StoreError> {
        let jobs = job_repo::claim_batch(&self.db, self.config.batch_size, Utc::now())?;
        let claimed = jobs.len();

        for job in jobs {
            let span = info_span!("job", job_id = %job.id, tenant_id = %job.tenant_id);
            self.process_job(job).instrument(span).await;
        }

        Ok(claimed)
    }

    /// Processes one claimed job to completion, retry, or failure.
    async fn process_job(&self, job: Job) {
        tracing::info!(
            files = job.files.len(),
            model_id = %job.model_id,
            attempt = job.retry_count + 1,
            "Processing job"
        );

        let started_at = job.started_at.unwrap_or_else(Utc::now);
        let outcomes = self.parse_files(&job).await;
        let now = Utc::now();
        let elapsed_seconds = (now - started_at).num_milliseconds() as f64 / 1000.0;

        let terminal = match consolidate(&outcomes) {
            Some(result) => {
                let message = format!(
                    "Successfully processed {} file(s) in {:.1}s",
                    result.successful, elapsed_seconds
                );
                tracing::info!(
                    successful = result.successful,
                    failed = result.failed,
                    confidence = result.confidence_score,
                    "Job completed"
                );
                let patch = JobUpdate {
                    status: Some(JobStatus::Completed),
                    message: Some(message),
                    files_processed: Some(outcomes.len() as u32),
                    successful_parses: Some(result.successful),
                    failed_parses: Some(result.failed),
                    parsing_time_seconds: Some(elapsed_seconds),
                    parsed_data: Some(result.data),
                    confidence_score: Some(result.confidence_score),
                    confidence_summary: Some(result.confidence_summary),
                    completed_at: Some(now),
                    ..JobUpdate::default()
                };
                if !self.persist(&job.id, &patch) {
                    return;
                }
                true
            }
            None => {
                let reason = failure_reason(&outcomes);
                self.handle_failure(&job, &reason)
            }
        };

        if terminal {
            self.notify_terminal(&job.id).await;
        }
    }

    /// Downloads and parses every file of the job, folding each error into
    /// a failed outcome so one bad file never aborts the rest.
    async fn parse_files(&self, job: &Job) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(job.files.len());

        for file in &job.files {
            let bytes = match self.stager.download(&job.tenant_id, &file.location).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(filename = %file.filename, error = %e, "Download failed");
                    outcomes.push(FileOutcome::Failed {
                        filename: file.filename.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.model.parse(&bytes, &file.filename, &job.model_id).await {
                Ok(parsed) => {
                    tracing::debug!(
                        filename = %file.filename,
                        confidence = parsed.confidence,
                        "File parsed"
                    );
                    outcomes.push(FileOutcome::Parsed {
                        filename: file.filename.clone(),
                        data: parsed.data,
                        confidence: parsed.confidence,
                    });
                }
                Err(e) => {
                    tracing::warn!(filename = %file.filename, error = %e, "Parse failed");
                    outcomes.push(FileOutcome::Failed {
                        filename: file.filename.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        outcomes
    }

    /// Routes a fully failed attempt to the retry path or to `Failed`.
    /// Returns true when the job reached a terminal state.
    fn handle_failure(&self, job: &Job, reason: &str) -> bool {
        if job.retry_count < job.max_retries {
            let attempt = job.retry_count + 1;
            tracing::warn!(
                retry = attempt,
                max_retries = job.max_retries,
                error = %reason,
                "Job attempt failed, requeueing"
            );
            let patch = JobUpdate {
                status: Some(JobStatus::Pending),
                retry_count: Some(attempt),
                last_error: Some(reason.to_string()),
                message: Some(format!(
                    "Retry {}/{}: {}",
                    attempt,
                    job.max_retries,
                    truncate(reason, 100)
                )),
                ..JobUpdate::default()
            };
            self.persist(&job.id, &patch);
            false
        } else {
            tracing::error!(
                retries = job.max_retries,
                error = %reason,
                "Job failed permanently"
            );
            let patch = JobUpdate {
                status: Some(JobStatus::Failed),
                last_error: Some(reason.to_string()),
                message: Some(format!(
                    "Failed after {} retries: {}",
                    job.max_retries,
                    truncate(reason, 200)
                )),
                completed_at: Some(Utc::now()),
                ..JobUpdate::default()
            };
            self.persist(&job.id, &patch)
        }
    }

    /// Dispatches the terminal webhook and records the outcome.
    ///
    /// The job is re-read first so the payload reflects exactly what was
    /// persisted. Delivery failures are recorded, never retried, and never
    /// touch the job status.
    async fn notify_terminal(&self, job_id: &str) {
        let job = match job_repo::find_by_id(&self.db, job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::error!("Job disappeared before webhook dispatch");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to re-read job for webhook dispatch");
                return;
            }
        };

        let url = match job.webhook_url() {
            Some(url) => url.to_string(),
            None => return,
        };

        let result = self.webhook.deliver(&job, &url).await;
        let patch = JobUpdate {
            webhook_delivered: Some(result.delivered),
            webhook_status: Some(result.status),
            webhook_attempts: Some(job.webhook_meta.attempts + 1),
            webhook_last_attempt_at: Some(result.attempted_at),
            ..JobUpdate::default()
        };
        self.persist(&job.id, &patch);
    }

    /// Applies a job update, logging instead of propagating store errors.
    /// A job whose outcome could not be persisted stays `processing`.
    fn persist(&self, job_id: &str, patch: &JobUpdate) -> bool {
        match job_repo::update(&self.db, job_id, patch) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist job update");
                false
            }
        }
    }
}

fn failure_reason(outcomes: &[FileOutcome]) -> String {
    outcomes
        .iter()
        .find_map(|o| match o {
            FileOutcome::Failed { filename, reason } => {
                Some(format!("{}: {}", filename, reason))
            }
            FileOutcome::Parsed { .. } => None,
        })
        .unwrap_or_else(|| "no files to parse".to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::stub::{ScriptedParse, StubModelClient};
    use crate::job::{FileRef, NewJob};
    use crate::stager::FilesystemStager;
    use crate::testsupport::http_responder;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    struct Harness {
        _tmp: TempDir,
        db: Database,
        stager: Arc<FilesystemStager>,
        model: Arc<StubModelClient>,
        worker: ParsingWorker,
    }

    fn harness(config: WorkerConfig) -> Harness {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let stager = Arc::new(FilesystemStager::new(tmp.path()));
        let model = Arc::new(StubModelClient::new());
        let worker = ParsingWorker::new(
            db.clone(),
            stager.clone(),
            model.clone(),
            WebhookDispatcher::new(Duration::from_secs(5)).unwrap(),
            config,
        );
        Harness {
            _tmp: tmp,
            db,
            stager,
            model,
            worker,
        }
    }

    async fn stage_and_insert(
        h: &Harness,
        filenames: &[&str],
        webhook_url: Option<String>,
        max_retries: Option<u32>,
    ) -> Job {
        let mut files = Vec::new();
        for filename in filenames {
            let location = h
                .stager
                .upload("tenant-001", b"pdf bytes", filename)
                .await
                .unwrap();
            files.push(FileRef {
                filename: filename.to_string(),
                location,
                size_mb: 1.0,
            });
        }
        let job = Job::from_new(
            NewJob {
                tenant_id: "tenant-001".to_string(),
                project_id: "project-001".to_string(),
                report_id: "report-001".to_string(),
                files,
                webhook_url,
                model_id: "model-001".to_string(),
                max_retries,
            },
            3,
        );
        job_repo::insert(&h.db, &job).unwrap();
        job
    }

    #[tokio::test]
    async fn test_single_file_success() {
        let h = harness(WorkerConfig::default());
        let (url, sink) = http_responder("200 OK", 1).await;
        let job = stage_and_insert(&h, &["report.pdf"], Some(url), None).await;

        h.model.push(
            "report.pdf",
            ScriptedParse::Success {
                data: json!({"patient_name": "Jane Doe", "confidence_unrelated": 1}),
                confidence: 0.92,
            },
        );

        assert_eq!(h.worker.process_batch().await.unwrap(), 1);

        let found = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.retry_count, 0);
        assert_eq!(found.files_processed, 1);
        assert_eq!(found.successful_parses, 1);
        assert_eq!(found.failed_parses, 0);
        assert_eq!(found.confidence_score, Some(0.92));
        assert_eq!(
            found.parsed_data.unwrap()["patient_name"],
            "Jane Doe"
        );
        assert!(found.message.unwrap().starts_with("Successfully processed 1 file(s)"));
        assert!(found.parsing_time_seconds.is_some());
        assert!(found.completed_at.is_some());
        assert!(found.webhook_meta.delivered);
        assert_eq!(found.webhook_meta.status, "success");
        assert_eq!(found.webhook_meta.attempts, 1);
        assert!(found.webhook_meta.last_attempt_at.is_some());

        let bodies = sink.await.unwrap();
        assert_eq!(bodies[0]["status"], "completed");
        assert_eq!(bodies[0]["job_id"], job.id);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let h = harness(WorkerConfig::default());
        let job = stage_and_insert(&h, &["report.pdf"], None, None).await;

        h.model.push(
            "report.pdf",
            ScriptedParse::Failure("model overloaded".to_string()),
        );
        h.model.push(
            "report.pdf",
            ScriptedParse::Failure("model overloaded".to_string()),
        );
        h.model.push(
            "report.pdf",
            ScriptedParse::Success {
                data: json!({"patient_name": "Jane Doe"}),
                confidence: 0.8,
            },
        );

        h.worker.process_batch().await.unwrap();
        let after_first = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(after_first.status, JobStatus::Pending);
        assert_eq!(after_first.retry_count, 1);
        assert!(after_first.message.unwrap().starts_with("Retry 1/3:"));
        assert!(after_first.last_error.unwrap().contains("model overloaded"));
        assert!(after_first.completed_at.is_none());

        h.worker.process_batch().await.unwrap();
        let after_second = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(after_second.status, JobStatus::Pending);
        assert_eq!(after_second.retry_count, 2);

        h.worker.process_batch().await.unwrap();
        let done = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.retry_count, 2);
        assert_eq!(done.confidence_score, Some(0.8));
        assert_eq!(h.model.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let h = harness(WorkerConfig::default());
        let (url, sink) = http_responder("200 OK", 1).await;
        let job = stage_and_insert(&h, &["report.pdf"], Some(url), Some(3)).await;

        for _ in 0..4 {
            h.model.push(
                "report.pdf",
                ScriptedParse::Failure("model unavailable".to_string()),
            );
        }

        // Initial attempt plus three retries.
        for _ in 0..4 {
            h.worker.process_batch().await.unwrap();
        }

        let found = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Failed);
        assert_eq!(found.retry_count, 3);
        assert!(found.message.unwrap().starts_with("Failed after 3 retries:"));
        assert!(found.last_error.unwrap().contains("model unavailable"));
        assert!(found.completed_at.is_some());
        assert!(found.webhook_meta.delivered);
        assert_eq!(found.webhook_meta.attempts, 1);

        // Terminal, so a further batch never touches it.
        assert_eq!(h.worker.process_batch().await.unwrap(), 0);
        assert_eq!(h.model.calls(), 4);

        let bodies = sink.await.unwrap();
        assert_eq!(bodies[0]["status"], "failed");
        assert!(bodies[0]["error"].as_str().unwrap().contains("model unavailable"));
    }

    #[tokio::test]
    async fn test_partial_success_completes() {
        let h = harness(WorkerConfig::default());
        let job = stage_and_insert(&h, &["page1.pdf", "page2.pdf"], None, None).await;

        h.model.push(
            "page1.pdf",
            ScriptedParse::Success {
                data: json!({"patient_name": "Jane Doe"}),
                confidence: 0.9,
            },
        );
        h.model.push(
            "page2.pdf",
            ScriptedParse::Failure("illegible scan".to_string()),
        );

        h.worker.process_batch().await.unwrap();

        let found = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.files_processed, 2);
        assert_eq!(found.successful_parses, 1);
        assert_eq!(found.failed_parses, 1);
        assert_eq!(found.confidence_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_cross_tenant_file_never_read() {
        let h = harness(WorkerConfig::default());

        // Blob staged by another tenant, referenced by this tenant's job.
        let foreign = h
            .stager
            .upload("tenant-002", b"secret", "report.pdf")
            .await
            .unwrap();
        let job = Job::from_new(
            NewJob {
                tenant_id: "tenant-001".to_string(),
                project_id: "project-001".to_string(),
                report_id: "report-001".to_string(),
                files: vec![FileRef {
                    filename: "report.pdf".to_string(),
                    location: foreign,
                    size_mb: 1.0,
                }],
                webhook_url: None,
                model_id: "model-001".to_string(),
                max_retries: None,
            },
            3,
        );
        job_repo::insert(&h.db, &job).unwrap();

        h.worker.process_batch().await.unwrap();

        let found = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.retry_count, 1);
        assert!(found.last_error.unwrap().contains("Access denied"));
        // The model never saw the other tenant's bytes.
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_webhook_failure_leaves_status_intact() {
        let h = harness(WorkerConfig::default());

        // Bind then drop to get a port that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);

        let job = stage_and_insert(&h, &["report.pdf"], Some(url), None).await;
        h.model.push(
            "report.pdf",
            ScriptedParse::Success {
                data: json!({"a": 1}),
                confidence: 0.9,
            },
        );

        h.worker.process_batch().await.unwrap();

        let found = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert!(!found.webhook_meta.delivered);
        assert!(found.webhook_meta.status.starts_with("fail ("));
        assert_eq!(found.webhook_meta.attempts, 1);
    }

    #[tokio::test]
    async fn test_no_webhook_url_no_attempt() {
        let h = harness(WorkerConfig::default());
        let job = stage_and_insert(&h, &["report.pdf"], None, None).await;
        h.model.push(
            "report.pdf",
            ScriptedParse::Success {
                data: json!({"a": 1}),
                confidence: 0.9,
            },
        );

        h.worker.process_batch().await.unwrap();

        let found = job_repo::find_by_id(&h.db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert!(!found.webhook_meta.delivered);
        assert_eq!(found.webhook_meta.status, "pending");
        assert_eq!(found.webhook_meta.attempts, 0);
    }

    #[tokio::test]
    async fn test_one_bad_job_never_aborts_the_batch() {
        let h = harness(WorkerConfig::default());
        let bad = stage_and_insert(&h, &["bad.pdf"], None, None).await;
        let good = stage_and_insert(&h, &["good.pdf"], None, None).await;

        h.model
            .push("bad.pdf", ScriptedParse::Failure("garbage".to_string()));
        h.model.push(
            "good.pdf",
            ScriptedParse::Success {
                data: json!({"a": 1}),
                confidence: 0.9,
            },
        );

        assert_eq!(h.worker.process_batch().await.unwrap(), 2);

        let bad = job_repo::find_by_id(&h.db, &bad.id).unwrap().unwrap();
        let good = job_repo::find_by_id(&h.db, &good.id).unwrap().unwrap();
        assert_eq!(bad.status, JobStatus::Pending);
        assert_eq!(good.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_wakes_polling_sleep() {
        let h = harness(WorkerConfig {
            polling_interval: Duration::from_secs(3600),
            ..WorkerConfig::default()
        });
        let handle = h.worker.handle();

        let run = h.worker.run();
        tokio::pin!(run);

        // Let the first (empty) batch pass, then stop mid-sleep.
        tokio::select! {
            _ = &mut run => panic!("worker stopped on its own"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => handle.stop(),
        }

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("worker did not stop promptly");
    }
}
