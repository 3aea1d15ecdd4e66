use std::path::PathBuf;
use thiserror::Error;

/// Fatal problems detected before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input {0} is missing or empty")]
    MissingInput(PathBuf),
    #[error("{0} count must be at least 1")]
    ZeroWorkers(&'static str),
    #[error("no {0} registered")]
    MissingCallback(&'static str),
}

/// Intermediate files that do not hold `key value` lines.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("malformed record {line:?} in {path}")]
    MalformedRecord { path: PathBuf, line: String },
    #[error("count for key {key:?} overflows")]
    CountOverflow { key: String },
}
