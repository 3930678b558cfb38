use thiserror::Error;

use crate::models::IncidentStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {}", .0.join("; "))]
    ConfigInvalid(Vec<String>),

    #[error("invalid run id: {0}")]
    InvalidRunId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("closing an incident requires a resolution_reason")]
    MissingResolutionReason,

    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
