//! Result consolidation.
//!
//! Merges the per-file parse outcomes of one job into a single result with
//! an aggregate confidence score. Pure and I/O-free: the same outcomes
//! always produce the same merged result.

use serde_json::Value;

use crate::job::ConfidenceSummary;

/// Outcome of downloading and parsing one staged file.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Parsed {
        filename: String,
        data: Value,
        /// Model confidence in `[0, 1]`.
        confidence: f64,
    },
    Failed {
        filename: String,
        reason: String,
    },
}

impl FileOutcome {
    pub fn filename(&self) -> &str {
        match self {
            FileOutcome::Parsed { filename, .. } => filename,
            FileOutcome::Failed { filename, .. } => filename,
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, FileOutcome::Parsed { .. })
    }
}

/// Merged result of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidated {
    pub data: Value,
    /// Arithmetic mean of the successful files' confidences.
    pub confidence_score: f64,
    pub confidence_summary: ConfidenceSummary,
    pub successful: u32,
    pub failed: u32,
}

/// Merges per-file outcomes into one job result.
///
/// Returns `None` when no file parsed successfully, which is the job-level
/// failure case. Field-level merging is most-complete-wins: a non-null value
/// beats null, a longer array beats a shorter one (multi-page splits of one
/// source document tend to repeat fields, with one page carrying the full
/// list), and otherwise the earliest file's value is kept. Failed files are
/// excluded from the confidence mean, not scored as zero.
pub fn consolidate(outcomes: &[FileOutcome]) -> Option<Consolidated> {
    let mut merged = serde_json::Map::new();
    let mut confidence_sum = 0.0;
    let mut successful = 0u32;
    let mut failed = 0u32;

    for outcome in outcomes {
        match outcome {
            FileOutcome::Parsed {
                data, confidence, ..
            } => {
                successful += 1;
                confidence_sum += confidence;
                if let Value::Object(fields) = data {
                    for (key, value) in fields {
                        merge_field(&mut merged, key, value);
                    }
                }
            }
            FileOutcome::Failed { .. } => {
                failed += 1;
            }
        }
    }

    if successful == 0 {
        return None;
    }

    let confidence_score = confidence_sum / f64::from(successful);

    Some(Consolidated {
        data: Value::Object(merged),
        confidence_score,
        confidence_summary: ConfidenceSummary::from_score(confidence_score),
        successful,
        failed,
    })
}

/// Most-complete-wins merge for a single field.
fn merge_field(merged: &mut serde_json::Map<String, Value>, key: &str, candidate: &Value) {
    match merged.get(key) {
        None => {
            merged.insert(key.to_string(), candidate.clone());
        }
        Some(existing) => {
            if candidate_wins(existing, candidate) {
                merged.insert(key.to_string(), candidate.clone());
            }
        }
    }
}

fn candidate_wins(existing: &Value, candidate: &Value) -> bool {
    if candidate.is_null() {
        return false;
    }
    if existing.is_null() {
        return true;
    }
    match (existing, candidate) {
        (Value::Array(a), Value::Array(b)) => b.len() > a.len(),
        _ => false,
    }
}
