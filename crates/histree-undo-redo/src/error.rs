//! Error types for the undo/redo system

use thiserror::Error;

use crate::tree::NodeId;

/// Errors that can occur in the undo/redo system
#[derive(Debug, Error)]
pub enum UndoRedoError {
    /// A delta that cannot be inverted (bare reset/clear) reached merge or replay
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A replay found the target in a state the recorded change cannot apply to
    #[error("Inconsistent replay: {0}")]
    InconsistentReplay(String),

    /// The object or container a change refers to has been dropped
    #[error("Change target released: {0}")]
    TargetReleased(String),

    /// A field name or id is not part of the owner's field table
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    /// No more undos available
    #[error("No more undos available")]
    NoMoreUndos,

    /// No more redos available
    #[error("No more redos available")]
    NoMoreRedos,

    /// Redo requested on a branch the current node does not have
    #[error("Branch {index} not found ({available} available)")]
    BranchNotFound {
        /// Requested branch index
        index: usize,
        /// Number of outgoing branches
        available: usize,
    },

    /// No changeset with this id in the history
    #[error("Changeset not found: {0}")]
    ChangesetNotFound(uuid::Uuid),

    /// Node is not part of the version tree
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// JSON parse error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UndoRedoError {
    /// Create a new UnsupportedOperation error with context
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a new InconsistentReplay error with context
    pub fn inconsistent(msg: impl Into<String>) -> Self {
        Self::InconsistentReplay(msg.into())
    }

    /// Create a new TargetReleased error with context
    pub fn released(what: impl Into<String>) -> Self {
        Self::TargetReleased(what.into())
    }

    /// Create a new FieldNotFound error with context
    pub fn field_not_found(field: impl Into<String>) -> Self {
        Self::FieldNotFound(field.into())
    }

    /// Create a new ValidationError with context
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a new ConfigError with context
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether this error signals corrupted captured state rather than misuse
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedOperation(_) | Self::InconsistentReplay(_) | Self::TargetReleased(_)
        )
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, UndoRedoError>;
