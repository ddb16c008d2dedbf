use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("failed to read input {path}: {message}")]
    InputRead { path: PathBuf, message: String },

    #[error("malformed input {path} at line {line}: {message}")]
    InputParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("invalid identity threshold: {0}")]
    InvalidThreshold(String),

    #[error("invalid minimum group size: {0}")]
    InvalidGroupSize(String),

    #[error("invalid group index: {0}")]
    InvalidGroupIndex(String),

    #[error("invalid genome name pattern: {0}")]
    InvalidPattern(String),

    #[error("table {path} is missing column {column:?}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no oracle program configured (set oracle.program or pass --oracle)")]
    MissingOracle,

    #[error("no group directory at {0}")]
    MissingGroupDir(PathBuf),

    #[error("work directory {path} is not usable: {message}")]
    #[diagnostic(help("pass a writable --work-dir"))]
    WorkDir { path: PathBuf, message: String },

    #[error("no component reaches the minimum group size of {min_group_size}")]
    #[diagnostic(help("lower --min-group-size or --threshold"))]
    NoReferenceGroupFound { min_group_size: usize },

    #[error("oracle exited with {status}")]
    OracleInvocationFailed {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("oracle did not finish within {seconds}s")]
    OracleTimedOut { seconds: u64 },

    #[error("oracle reported success but produced no report at {0}")]
    OracleReportMissing(PathBuf),

    #[error("taxonomy request failed: {0}")]
    TaxonomyHttp(String),

    #[error("taxonomy service returned status {status}: {message}")]
    TaxonomyStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl KiraError {
    pub fn filesystem(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        KiraError::Filesystem(format!("{context}: {err}"))
    }

    /// True for errors that only affect a single trial and must not abort a sweep.
    pub fn is_trial_local(&self) -> bool {
        matches!(
            self,
            KiraError::OracleInvocationFailed { .. }
                | KiraError::OracleTimedOut { .. }
                | KiraError::OracleReportMissing(_)
                | KiraError::Filesystem(_)
        )
    }
}
