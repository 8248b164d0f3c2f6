use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for the metrics pipeline. Per-metric failures carry enough
/// context for the orchestrator to log and skip; lookup-load failures are
/// surfaced through anyhow at the batch boundary and abort the whole batch.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("source table `{name}` not found at {path}")]
    SourceNotFound { name: String, path: PathBuf },

    #[error("source table `{source_name}` is missing required column `{column}`")]
    SchemaMismatch { source_name: String, column: String },

    #[error("column `{column}` has type {actual}, expected {expected}")]
    ColumnType {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(
        "join on {keys:?} is one-to-many ({count} lookup rows for key `{key}`) \
         and no tie-break rule was declared"
    )]
    AmbiguousJoin {
        keys: Vec<String>,
        key: String,
        count: usize,
    },

    #[error("key `{key}` present in current run has no baseline counterpart")]
    UnmatchedRow { key: String },

    #[error("no baseline aggregate available for metric `{metric}` branch `{branch}`")]
    MissingBaseline { metric: String, branch: String },

    #[error("normalize: column `{column}` is not numeric and not mapped as an id column")]
    UnmappedColumn { column: String },

    #[error("aggregate over `{group_keys:?}` produced no groups")]
    EmptyAggregate { group_keys: Vec<String> },

    #[error("reading `{path}`: {message}")]
    Read { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, MetricsError>;
