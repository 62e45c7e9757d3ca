use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// The record an operation was addressing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Workspace,
    Playbook,
    Version,
    Action,
    Rule,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Workspace => "workspace",
            Entity::Playbook => "playbook",
            Entity::Version => "playbook version",
            Entity::Action => "playbook action",
            Entity::Rule => "playbook rule",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidRequest,
    WorkspaceNotFound,
    Unauthorized,
    Transient,
    Inconsistent,
    PartialFailure,
    Api,
    Local,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::WorkspaceNotFound => "workspace_not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Transient => "transient",
            ErrorKind::Inconsistent => "inconsistent",
            ErrorKind::PartialFailure => "partial_failure",
            ErrorKind::Api => "api",
            ErrorKind::Local => "local",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PlaybookError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transient failure, retry the operation: {0}")]
    Transient(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("partial failure, left behind {orphaned:?}: {source}")]
    PartialFailure {
        orphaned: Vec<String>,
        #[source]
        source: Box<PlaybookError>,
    },

    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl PlaybookError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        PlaybookError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlaybookError::NotFound { .. } => ErrorKind::NotFound,
            PlaybookError::Conflict(_) => ErrorKind::Conflict,
            PlaybookError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PlaybookError::WorkspaceNotFound(_) => ErrorKind::WorkspaceNotFound,
            PlaybookError::Unauthorized(_) => ErrorKind::Unauthorized,
            PlaybookError::Transient(_) => ErrorKind::Transient,
            PlaybookError::Inconsistent(_) => ErrorKind::Inconsistent,
            PlaybookError::PartialFailure { .. } => ErrorKind::PartialFailure,
            PlaybookError::Api { .. } => ErrorKind::Api,
            PlaybookError::Config(_)
            | PlaybookError::Io(_)
            | PlaybookError::Json(_)
            | PlaybookError::Yaml(_) => ErrorKind::Local,
        }
    }

    /// Only transport failures and 5xx/429 responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, PlaybookError>;
