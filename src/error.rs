//! Error taxonomy for the aggregation pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CensusError {
    /// Malformed slug, non-positive limit, or other caller mistakes.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A git subprocess failed to start or exited unsuccessfully.
    #[error("`{command}` failed{}: {stderr}", exit_suffix(*.code))]
    Sync {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The commit window could not be determined.
    #[error("Could not determine commit window: {0}")]
    Window(String),

    /// Non-OK response from the hosting API, or retry budget exhausted.
    #[error("Hosting API error: {0}")]
    Upstream(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_suffix(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " (terminated by signal)".to_string(),
    }
}

impl CensusError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CensusError::Cancelled)
    }

    pub(crate) fn upstream(message: impl Into<String>) -> Self {
        CensusError::Upstream(message.into())
    }
}

impl From<reqwest::Error> for CensusError {
    fn from(err: reqwest::Error) -> Self {
        CensusError::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CensusError>;
