//! Scripted model client for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ModelClient, ParsedFile};
use crate::error::AiError;

/// One scripted outcome for a filename.
#[derive(Debug, Clone)]
pub enum ScriptedParse {
    Success {
        data: serde_json::Value,
        confidence: f64,
    },
    Failure(String),
}

/// Model client that replays scripted outcomes per filename, in order.
/// Running out of scripted outcomes yields an empty-response error.
#[derive(Default)]
pub struct StubModelClient {
    script: Mutex<HashMap<String, VecDeque<ScriptedParse>>>,
    calls: AtomicU32,
}

impl StubModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next outcome for `filename`.
    pub fn push(&self, filename: &str, outcome: ScriptedParse) {
        self.script
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ModelClient for StubModelClient {
    async fn parse(
        &self,
        _bytes: &[u8],
        filename: &str,
        _model_id: &str,
    ) -> Result<ParsedFile, AiError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(filename)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(ScriptedParse::Success { data, confidence }) => {
                Ok(ParsedFile { data, confidence })
            }
            Some(ScriptedParse::Failure(reason)) => Err(AiError::MalformedResponse(reason)),
            None => Err(AiError::EmptyResponse),
        }
    }
}
