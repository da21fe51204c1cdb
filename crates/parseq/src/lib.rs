pub mod ai;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod stager;
pub mod webhook;
pub mod worker;

#[cfg(test)]
pub(crate) mod testsupport;

pub use ai::{HttpModelClient, ModelClient, ParsedFile};
pub use config::{load_settings, load_settings_from_str, Settings};
pub use consolidate::{consolidate, Consolidated, FileOutcome};
pub use db::{Database, JobUpdate, StoreError};
pub use error::{AiError, ConfigError, ParseqError, Result, StagerError, WebhookError};
pub use job::{ConfidenceSummary, FileRef, Job, JobStatus, NewJob, WebhookMeta};
pub use stager::{FileStager, FilesystemStager};
pub use webhook::{DeliveryResult, WebhookDispatcher};
pub use worker::{ParsingWorker, WorkerConfig, WorkerHandle};
