use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to open trace log {path}: {source}")]
    TraceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed trace line {line}: {reason}")]
    TraceParse { line: usize, reason: String },

    #[error("Report is missing field: {0}")]
    ReportParse(&'static str),

    #[error("{0} observer thread(s) have not finished")]
    ThreadsStillActive(u64),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Replay error: {0}")]
    Replay(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Config(_) => -2,
            Error::TraceOpen { .. } => -3,
            Error::TraceParse { .. } => -4,
            Error::ReportParse(_) => -5,
            Error::ThreadsStillActive(_) => -6,
            Error::Metrics(_) => -7,
            Error::Replay(_) => -8,
            Error::Serialization(_) => -9,
        }
    }
}
