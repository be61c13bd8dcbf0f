use crate::{
    auth::{AuthError, TokenSource},
    model::Batch,
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt, sync::Arc};
use thiserror::Error;

pub mod bigquery;

/// Warehouse write strategy.
///
/// Both modes append the same rows to the same table; they differ in the API
/// surface used and in the partial-failure guarantee (see the impls).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkMode {
    /// Synchronous row insert (`tabledata.insertAll`); may partially apply.
    Insert,
    /// Asynchronous bulk-load job; all-or-nothing.
    Load,
}

impl SinkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkMode::Insert => "insert",
            SinkMode::Load => "load",
        }
    }

    pub const fn all() -> &'static [SinkMode] {
        &[SinkMode::Insert, SinkMode::Load]
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SinkMode {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "insert" => Ok(SinkMode::Insert),
            "load" => Ok(SinkMode::Load),
            _ => Err(anyhow::anyhow!(
                "Unknown sink mode '{value}'. Supported modes: insert, load."
            )),
        }
    }
}

/// Destination table identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize batch for the warehouse: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("warehouse request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("warehouse returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode warehouse response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("load job failed: {0}")]
    Job(String),

    #[error("load job still running after {0} status polls")]
    JobTimeout(usize),
}

/// Error the warehouse service reported for a single row (insert mode only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub index: usize,
    pub message: String,
}

/// Outcome of one successful sink round trip.
///
/// `row_errors` is only ever non-empty in insert mode; the rows it names were
/// not applied and are reported, never retried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkReport {
    pub appended: usize,
    pub row_errors: Vec<RowError>,
}

impl SinkReport {
    pub fn is_clean(&self) -> bool {
        self.row_errors.is_empty()
    }
}

#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Append the whole batch to the destination table in one operation.
    async fn append(&self, batch: &Batch) -> Result<SinkReport, SinkError>;
}

/// Construct the sink for an explicit mode.
pub fn sink_from_mode(
    mode: SinkMode,
    table: TableRef,
    token: Arc<dyn TokenSource>,
) -> Box<dyn WarehouseSink> {
    match mode {
        SinkMode::Insert => Box::new(bigquery::InsertAllSink::new(table, token)),
        SinkMode::Load => Box::new(bigquery::LoadJobSink::new(table, token)),
    }
}
