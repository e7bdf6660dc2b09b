//! Error types shared across mapvis crates.

use serde::{Deserialize, Serialize};

/// Why a map instantiation (or an analysis status check) did not succeed.
///
/// Cloneable so one failure can be recorded on the vis and handed to every
/// pending error callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum InstantiationError {
    /// The map service answered but refused the definition.
    #[error("rejected: {}", .errors.join("; "))]
    Rejected { errors: Vec<String> },
    /// The request never produced an answer.
    #[error("transport: {0}")]
    Transport(String),
    /// The answer could not be understood or applied.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl InstantiationError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { errors: vec![message.into()] }
    }
}

/// Errors surfaced by the mapvis library API.
#[derive(Debug, thiserror::Error)]
pub enum VisError {
    /// A required collaborator was not supplied when building a vis.
    #[error("{0} is required")]
    MissingCollaborator(&'static str),
    /// A factory was called without a required attribute.
    #[error("{property} is required for {kind} dataviews")]
    MissingProperty { kind: String, property: String },
    #[error("invalid attributes: {0}")]
    InvalidAttributes(String),
    #[error("unknown layer type: {0}")]
    UnknownLayerType(String),
    #[error("invalid viz.json: {0}")]
    InvalidVizjson(String),
    #[error("instantiation: {0}")]
    Instantiation(#[from] InstantiationError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The orchestrator task has stopped.
    #[error("vis orchestrator is closed")]
    Closed,
}

pub type VisResult<T> = Result<T, VisError>;
