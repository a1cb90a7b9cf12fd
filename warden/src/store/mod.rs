//! Grant storage contract.
//!
//! The engine never talks to a database directly. It goes through two
//! traits:
//! - [`Catalog`]: the type registry and permission identities
//! - [`GrantRepository`]: one grant table, for one subject kind and one
//!   linkage strategy
//!
//! [`GrantTables`] decides, once at startup, which repository serves which
//! target model.
//!
//! Deletes are always a single filtered statement. No per-row deletion
//! hooks exist at this layer, so nothing fires when grants are removed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;
use warden_common::{ContentType, Grant, ModelKey, Permission, Subject, SubjectKind, UserId};

use crate::error::{GuardianError, Result};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryBackend, MemoryGrantRepository};
pub use postgres::{PgCatalog, PgGrantRepository};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Object key '{pk}' is not a valid {column_type}")]
    InvalidObjectKey {
        pk: String,
        column_type: &'static str,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// How a grant table references its target objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// `(content_type_id, object_pk)`; one table serves every model.
    Generic,
    /// Typed foreign key; one table per target model.
    Direct,
}

/// Whose rows a filter selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectFilter {
    Exact(Subject),
    /// Rows held by any group the user belongs to.
    GroupsOf(UserId),
}

/// Which permission a filter selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionMatch {
    Exact(i32),
    Codename {
        codename: String,
        content_type_id: i32,
    },
}

/// Which target objects a filter selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectMatch {
    One(String),
    Any(Vec<String>),
}

impl ObjectMatch {
    #[must_use]
    pub fn contains(&self, pk: &str) -> bool {
        match self {
            Self::One(one) => one == pk,
            Self::Any(pks) => pks.iter().any(|p| p == pk),
        }
    }

    /// The primary keys as a list, for `= ANY($n)` binds.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(one) => vec![one.clone()],
            Self::Any(pks) => pks.clone(),
        }
    }
}

/// Filter over one grant table.
///
/// `content_type_id` is always the target model's type. Generic tables
/// filter on it; direct tables are dedicated to that model and ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantFilter {
    pub subject: SubjectFilter,
    pub permission: Option<PermissionMatch>,
    pub content_type_id: i32,
    pub objects: ObjectMatch,
}

/// A grant row about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    pub subject: Subject,
    pub permission_id: i32,
    pub content_type_id: i32,
    pub object_pk: String,
}

/// The storage layer's type registry and permission identity table.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Content type for a model, registering it on first sight.
    async fn content_type_for_model(&self, model: &ModelKey) -> StorageResult<ContentType>;

    /// The content type in `app_label` that defines `codename`.
    ///
    /// Returns `None` when no model, or more than one model, defines it.
    async fn content_type_for_codename(
        &self,
        app_label: &str,
        codename: &str,
    ) -> StorageResult<Option<ContentType>>;

    async fn permission(
        &self,
        content_type_id: i32,
        codename: &str,
    ) -> StorageResult<Option<Permission>>;
}

/// One grant table.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    fn linkage(&self) -> Linkage;

    fn subject_kind(&self) -> SubjectKind;

    /// Find the row for this triple, inserting it if absent.
    async fn get_or_create(&self, grant: NewGrant) -> StorageResult<Grant>;

    /// Insert rows, skipping any that already exist. Returns the rows
    /// actually inserted.
    async fn bulk_insert(&self, grants: Vec<NewGrant>) -> StorageResult<Vec<Grant>>;

    /// Delete every matching row in one statement. Returns the count.
    async fn delete(&self, filter: &GrantFilter) -> StorageResult<u64>;

    async fn exists(&self, filter: &GrantFilter) -> StorageResult<bool>;

    /// `(object_pk, codename)` for every matching row.
    async fn codenames(&self, filter: &GrantFilter) -> StorageResult<Vec<(String, String)>>;
}

/// Routes target models to grant tables for one subject kind.
///
/// Models registered with [`GrantTables::with_direct`] use their dedicated
/// table; every other model falls back to the generic table.
#[derive(Clone)]
pub struct GrantTables {
    kind: SubjectKind,
    generic: Arc<dyn GrantRepository>,
    direct: HashMap<ModelKey, Arc<dyn GrantRepository>>,
}

impl GrantTables {
    pub fn new(generic: Arc<dyn GrantRepository>) -> Result<Self> {
        if generic.linkage() != Linkage::Generic {
            return Err(GuardianError::Misconfigured(
                "fallback table must use generic linkage".into(),
            ));
        }
        Ok(Self {
            kind: generic.subject_kind(),
            generic,
            direct: HashMap::new(),
        })
    }

    /// Register a direct-linkage table for one model.
    pub fn with_direct(mut self, model: ModelKey, repo: Arc<dyn GrantRepository>) -> Result<Self> {
        if repo.linkage() != Linkage::Direct {
            return Err(GuardianError::Misconfigured(format!(
                "table for {model} must use direct linkage"
            )));
        }
        if repo.subject_kind() != self.kind {
            return Err(GuardianError::Misconfigured(format!(
                "table for {model} holds {} grants, expected {}",
                repo.subject_kind(),
                self.kind
            )));
        }
        self.direct.insert(model, repo);
        Ok(self)
    }

    #[must_use]
    pub const fn kind(&self) -> SubjectKind {
        self.kind
    }

    #[must_use]
    pub fn for_model(&self, model: &ModelKey) -> &Arc<dyn GrantRepository> {
        self.direct.get(model).unwrap_or(&self.generic)
    }
}

/// ID for a freshly built grant row.
pub(crate) fn new_grant_id() -> Uuid {
    Uuid::now_v7()
}
