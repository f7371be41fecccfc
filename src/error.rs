use thiserror::Error;

use crate::core::outcome::ErrorKind;
use crate::core::task::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("no confident match (best candidate: {best_candidate:?}, score: {best_score:.3})")]
    NoConfidentMatch {
        best_candidate: Option<String>,
        best_score: f32,
    },

    #[error("Capability already registered: {0}")]
    CapabilityExists(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Embedding provider error: {0}")]
    Embedding(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map an infrastructure error onto the outcome error taxonomy.
    ///
    /// Used at the boundary where a `Result` becomes an `Outcome`, so the
    /// original failure class survives into the task's terminal state.
    pub fn classify(&self) -> ErrorKind {
        match self {
            Error::Decomposition(_) => ErrorKind::Decomposition,
            Error::Validation(_)
            | Error::NoConfidentMatch { .. }
            | Error::CapabilityExists(_)
            | Error::TaskNotFound(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::NoHomeDir => ErrorKind::PermanentInput,
            Error::Io(_) | Error::Store(_) | Error::Embedding(_) => ErrorKind::TransientExternal,
        }
    }
}
