use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseqError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] crate::db::StoreError),

    #[error("Stager error: {0}")]
    Stager(#[from] StagerError),

    #[error("AI client error: {0}")]
    Ai(#[from] AiError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StagerError {
    #[error("Access denied: location '{location}' does not belong to tenant '{tenant_id}'")]
    AccessDenied { tenant_id: String, location: String },

    #[error("Invalid tenant id: {0}")]
    InvalidTenant(String),

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("Staged file not found: {0}")]
    NotFound(String),

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write staged file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read staged file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete staged file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum AiError {
    #[error("Invalid parse endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Parse request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse endpoint returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Model returned a malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Failed to build webhook HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ParseqError>;
