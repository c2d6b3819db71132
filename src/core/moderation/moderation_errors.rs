// Error taxonomy for the moderation layer.
//
// - ConfigurationError: raised while building the registry at startup
// - StoreError / ChainWriteError: raised by persistence implementations
// - MonitorError: everything an operation can surface to its caller

use super::moderation_models::{EntityType, ObjectRef};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("{0} is already registered for moderation")]
    AlreadyRegistered(EntityType),

    #[error("{0} has no primary key field and cannot be moderated")]
    MissingPrimaryKey(EntityType),

    #[error("Field name '{field}' is already taken on {entity_type}")]
    FieldCollision {
        entity_type: EntityType,
        field: String,
    },

    #[error("{child} cascades to {parent}, which is not registered")]
    UnknownCascadeParent {
        child: EntityType,
        parent: EntityType,
    },

    #[error("Cascade chain starting at {0} loops back on itself")]
    CascadeCycle(EntityType),

    #[error("{owner} moderates related type {related}, which is not registered")]
    UnknownRelated {
        owner: EntityType,
        related: EntityType,
    },

    #[error("{related} has no field '{field}' pointing at {owner}")]
    MissingRelatedField {
        owner: EntityType,
        related: EntityType,
        field: String,
    },

    #[error("Failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid registry file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure while writing a unit of work.
#[derive(Debug, Error)]
#[error("Unit of work failed at entry {failed_index:?}: {source}")]
pub struct ChainWriteError {
    /// Position of the entry that failed; `None` when the commit itself failed.
    pub failed_index: Option<usize>,
    /// True when nothing from the batch was kept.
    pub rolled_back: bool,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("{0} is not registered for moderation")]
    NotModerated(EntityType),

    #[error("Permission denied: {actor} lacks '{permission}'")]
    PermissionDenied { actor: String, permission: String },

    #[error(
        "Cascade failed at {link} (depth {depth}, rolled back: {rolled_back}): {reason}"
    )]
    CascadeFailure {
        link: ObjectRef,
        depth: usize,
        rolled_back: bool,
        reason: String,
    },

    #[error("{0} not found")]
    NotFound(ObjectRef),

    #[error("Field '{field}' is not defined on {entity_type}")]
    UnknownField {
        entity_type: EntityType,
        field: String,
    },

    #[error("Field '{field}' is read-only once {object} is approved")]
    ReadOnlyField { object: ObjectRef, field: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MonitorError {
    pub fn permission_denied(actor: &str, permission: impl Into<String>) -> Self {
        MonitorError::PermissionDenied {
            actor: actor.to_string(),
            permission: permission.into(),
        }
    }
}
