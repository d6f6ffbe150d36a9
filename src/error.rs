use thiserror::Error;

use crate::deps::DepsError;
use crate::orchestrator::{EngineError, OrchestratorError};

/// Unified app errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Dependency: {0}")]
    Deps(#[from] DepsError),

    #[error("Engine: {0}")]
    Engine(#[from] EngineError),

    #[error("Orchestrator: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Display-safe summary for the presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            Self::Deps(e) => e.user_message().to_string(),
            Self::Engine(e) => e.message.clone(),
            Self::Orchestrator(e) => e.user_message().to_string(),
            Self::Io(_) => {
                "The app could not read or write its local files. Check disk space and permissions."
                    .to_string()
            }
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
