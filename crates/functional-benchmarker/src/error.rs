use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid options: {0}")]
    Config(String),

    #[error("Failed to deploy {what}: {message}")]
    Deploy { what: String, message: String },

    #[error("Collector configuration error: {0}")]
    Generate(#[from] logging_operator::generator::GenerateError),

    #[error("Invalid quantity {value:?}: {message}")]
    Quantity { value: String, message: String },

    #[error("Timed out after {0:?} reading receiver logs")]
    ReadTimeout(Duration),

    #[error("None of the {0} received lines matched the benchmark log format")]
    NoParseableLines(usize),
}

pub type Result<T> = std::result::Result<T, BenchmarkError>;

impl BenchmarkError {
    pub fn deploy(what: impl Into<String>, message: impl ToString) -> Self {
        BenchmarkError::Deploy {
            what: what.into(),
            message: message.to_string(),
        }
    }
}
