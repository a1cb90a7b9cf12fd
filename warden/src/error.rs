//! Permission Engine Error Types

use warden_common::SubjectKind;

use crate::store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum GuardianError {
    /// Mutations need a target with a stable primary key.
    #[error("Object {0} needs to be persisted first")]
    NotPersisted(String),

    #[error("Permission '{codename}' does not exist for content type {content_type}")]
    PermissionNotFound {
        codename: String,
        content_type: String,
    },

    #[error("Expected a {expected} subject, got a {found} subject")]
    SubjectKindMismatch {
        expected: SubjectKind,
        found: SubjectKind,
    },

    #[error("Bulk operation targets more than one model: {first} and {other}")]
    MixedTargets { first: String, other: String },

    #[error("Invalid grant table configuration: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for GuardianError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

pub type Result<T, E = GuardianError> = std::result::Result<T, E>;
