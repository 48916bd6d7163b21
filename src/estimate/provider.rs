//! Estimate providers
//!
//! A provider is shown the live schema and returns free-form estimate rows.
//! Its output is never used without passing through the sanitizer.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use serde::Deserialize;

use super::errors::{EstimateError, EstimateResult};
use super::schema::SchemaInfo;
use super::types::RawEstimate;
use crate::observability::{log_event_with_fields, Event};

/// Source of raw per-column estimates
pub trait EstimateProvider: Send + Sync {
    fn estimates<'a>(&'a self, schema: &'a SchemaInfo) -> BoxFuture<'a, EstimateResult<Vec<RawEstimate>>>;
}

/// Accepted document shapes: a bare array of rows, or `{"estimates": [...]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum EstimateDocument {
    Rows(Vec<RawEstimate>),
    Wrapped { estimates: Vec<RawEstimate> },
}

/// Parse an estimate document
pub fn parse_document(text: &str) -> EstimateResult<Vec<RawEstimate>> {
    Ok(match serde_json::from_str(text)? {
        EstimateDocument::Rows(rows) => rows,
        EstimateDocument::Wrapped { estimates } => estimates,
    })
}

/// Reads estimates from a JSON file, e.g. the saved output of an external
/// estimation service
#[derive(Debug, Clone)]
pub struct FileEstimateProvider {
    path: PathBuf,
}

impl FileEstimateProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl EstimateProvider for FileEstimateProvider {
    fn estimates<'a>(&'a self, _schema: &'a SchemaInfo) -> BoxFuture<'a, EstimateResult<Vec<RawEstimate>>> {
        Box::pin(async move {
            let text = tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| EstimateError::Io(format!("{}: {}", self.path.display(), e)))?;
            let rows = parse_document(&text)?;
            log_event_with_fields(
                Event::EstimatesReceived,
                &[
                    ("source", &self.path.display().to_string()),
                    ("rows", &rows.len().to_string()),
                ],
            );
            Ok(rows)
        })
    }
}

/// Fixed estimates, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticEstimateProvider {
    rows: Vec<RawEstimate>,
}

impl StaticEstimateProvider {
    pub fn new(rows: Vec<RawEstimate>) -> Self {
        Self { rows }
    }
}

impl EstimateProvider for StaticEstimateProvider {
    fn estimates<'a>(&'a self, _schema: &'a SchemaInfo) -> BoxFuture<'a, EstimateResult<Vec<RawEstimate>>> {
        log_event_with_fields(
            Event::EstimatesReceived,
            &[("source", "static"), ("rows", &self.rows.len().to_string())],
        );
        Box::pin(std::future::ready(Ok(self.rows.clone())))
    }
}
