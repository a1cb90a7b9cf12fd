//! In-memory storage backend.
//!
//! Implements [`Catalog`] and [`GrantRepository`] over plain collections
//! guarded by a `tokio::sync::RwLock`. Each call takes the lock once, so
//! every operation is atomic within the process. Nothing is durable.
//!
//! Besides tests and local development, the backend stands in for the
//! parts of the schema the engine does not own: group membership and
//! cascading deletes when a subject or target goes away.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use warden_common::{
    ContentType, Grant, GroupId, ModelKey, Permission, Subject, SubjectKind, TargetLink, UserId,
};

use super::{
    new_grant_id, Catalog, GrantFilter, GrantRepository, Linkage, NewGrant, PermissionMatch,
    StorageResult, SubjectFilter,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TableKey {
    kind: SubjectKind,
    /// `None` for the generic table.
    model: Option<ModelKey>,
}

#[derive(Debug, Default)]
struct State {
    content_types: Vec<ContentType>,
    permissions: Vec<Permission>,
    memberships: HashSet<(UserId, GroupId)>,
    tables: HashMap<TableKey, Vec<Grant>>,
}

impl State {
    fn content_type_for_model(&mut self, model: &ModelKey) -> ContentType {
        if let Some(existing) = self
            .content_types
            .iter()
            .find(|ct| ct.app_label == model.app_label && ct.model == model.model)
        {
            return existing.clone();
        }

        let content_type = ContentType {
            id: next_id(self.content_types.len()),
            app_label: model.app_label.clone(),
            model: model.model.clone(),
        };
        self.content_types.push(content_type.clone());
        content_type
    }
}

fn next_id(len: usize) -> i32 {
    i32::try_from(len).map_or(i32::MAX, |n| n + 1)
}

fn row_matches(
    permissions: &[Permission],
    memberships: &HashSet<(UserId, GroupId)>,
    row: &Grant,
    filter: &GrantFilter,
) -> bool {
    let subject_ok = match &filter.subject {
        SubjectFilter::Exact(subject) => row.subject == *subject,
        SubjectFilter::GroupsOf(user_id) => match row.subject {
            Subject::Group(group_id) => memberships.contains(&(*user_id, group_id)),
            Subject::User(_) => false,
        },
    };
    if !subject_ok {
        return false;
    }

    let permission_ok = match &filter.permission {
        None => true,
        Some(PermissionMatch::Exact(id)) => row.permission_id == *id,
        Some(PermissionMatch::Codename {
            codename,
            content_type_id,
        }) => permissions.iter().any(|p| {
            p.id == row.permission_id
                && p.codename == *codename
                && p.content_type_id == *content_type_id
        }),
    };
    if !permission_ok {
        return false;
    }

    let type_ok = match &row.target {
        TargetLink::Generic {
            content_type_id, ..
        } => *content_type_id == filter.content_type_id,
        TargetLink::Direct { .. } => true,
    };

    type_ok && filter.objects.contains(row.target.object_pk())
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<State>>,
    reads: Arc<AtomicU64>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The generic-linkage grant table for a subject kind.
    #[must_use]
    pub fn generic_grants(&self, kind: SubjectKind) -> MemoryGrantRepository {
        MemoryGrantRepository {
            backend: self.clone(),
            key: TableKey { kind, model: None },
        }
    }

    /// A direct-linkage grant table dedicated to `model`.
    #[must_use]
    pub fn direct_grants(&self, kind: SubjectKind, model: ModelKey) -> MemoryGrantRepository {
        MemoryGrantRepository {
            backend: self.clone(),
            key: TableKey {
                kind,
                model: Some(model),
            },
        }
    }

    /// Define a permission on a model. Returns the existing one if already defined.
    pub async fn create_permission(
        &self,
        model: &ModelKey,
        codename: &str,
        name: &str,
    ) -> Permission {
        let mut state = self.state.write().await;
        let content_type = state.content_type_for_model(model);

        if let Some(existing) = state
            .permissions
            .iter()
            .find(|p| p.content_type_id == content_type.id && p.codename == codename)
        {
            return existing.clone();
        }

        let permission = Permission {
            id: next_id(state.permissions.len()),
            content_type_id: content_type.id,
            codename: codename.to_string(),
            name: name.to_string(),
        };
        state.permissions.push(permission.clone());
        permission
    }

    pub async fn add_member(&self, user_id: UserId, group_id: GroupId) {
        self.state
            .write()
            .await
            .memberships
            .insert((user_id, group_id));
    }

    pub async fn remove_member(&self, user_id: UserId, group_id: GroupId) {
        self.state
            .write()
            .await
            .memberships
            .remove(&(user_id, group_id));
    }

    /// Cascade a subject deletion: drop its grants and memberships.
    pub async fn delete_subject(&self, subject: Subject) -> u64 {
        let mut state = self.state.write().await;
        state.memberships.retain(|(user_id, group_id)| match subject {
            Subject::User(id) => *user_id != id,
            Subject::Group(id) => *group_id != id,
        });

        let mut removed = 0;
        for rows in state.tables.values_mut() {
            let before = rows.len();
            rows.retain(|row| row.subject != subject);
            removed += before - rows.len();
        }
        removed as u64
    }

    /// Cascade a target deletion: drop every grant on the object.
    pub async fn delete_object(&self, model: &ModelKey, object_pk: &str) -> u64 {
        let mut state = self.state.write().await;
        let content_type_id = state.content_type_for_model(model).id;

        let mut removed = 0;
        for (key, rows) in &mut state.tables {
            let before = rows.len();
            rows.retain(|row| match &row.target {
                TargetLink::Generic {
                    content_type_id: ct,
                    object_pk: pk,
                } => !(*ct == content_type_id && pk == object_pk),
                TargetLink::Direct { object_pk: pk } => {
                    !(key.model.as_ref() == Some(model) && pk == object_pk)
                }
            });
            removed += before - rows.len();
        }
        removed as u64
    }

    /// Number of grant reads served so far.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Catalog for MemoryBackend {
    async fn content_type_for_model(&self, model: &ModelKey) -> StorageResult<ContentType> {
        Ok(self.state.write().await.content_type_for_model(model))
    }

    async fn content_type_for_codename(
        &self,
        app_label: &str,
        codename: &str,
    ) -> StorageResult<Option<ContentType>> {
        let state = self.state.read().await;
        let mut matching = state
            .permissions
            .iter()
            .filter(|p| p.codename == codename)
            .filter_map(|p| {
                state
                    .content_types
                    .iter()
                    .find(|ct| ct.id == p.content_type_id && ct.app_label == app_label)
            });

        let first = matching.next().cloned();
        if matching.next().is_some() {
            return Ok(None);
        }
        Ok(first)
    }

    async fn permission(
        &self,
        content_type_id: i32,
        codename: &str,
    ) -> StorageResult<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .iter()
            .find(|p| p.content_type_id == content_type_id && p.codename == codename)
            .cloned())
    }
}

/// One in-memory grant table.
#[derive(Clone)]
pub struct MemoryGrantRepository {
    backend: MemoryBackend,
    key: TableKey,
}

impl MemoryGrantRepository {
    /// Rows currently stored in this table.
    pub async fn len(&self) -> usize {
        self.backend
            .state
            .read()
            .await
            .tables
            .get(&self.key)
            .map_or(0, Vec::len)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn build(&self, grant: NewGrant) -> Grant {
        let target = match self.key.model {
            None => TargetLink::Generic {
                content_type_id: grant.content_type_id,
                object_pk: grant.object_pk,
            },
            Some(_) => TargetLink::Direct {
                object_pk: grant.object_pk,
            },
        };
        Grant {
            id: new_grant_id(),
            subject: grant.subject,
            permission_id: grant.permission_id,
            target,
        }
    }
}

#[async_trait]
impl GrantRepository for MemoryGrantRepository {
    fn linkage(&self) -> Linkage {
        if self.key.model.is_some() {
            Linkage::Direct
        } else {
            Linkage::Generic
        }
    }

    fn subject_kind(&self) -> SubjectKind {
        self.key.kind
    }

    async fn get_or_create(&self, grant: NewGrant) -> StorageResult<Grant> {
        let candidate = self.build(grant);
        let mut state = self.backend.state.write().await;
        let rows = state.tables.entry(self.key.clone()).or_default();

        if let Some(existing) = rows.iter().find(|row| row.same_triple(&candidate)) {
            return Ok(existing.clone());
        }
        rows.push(candidate.clone());
        Ok(candidate)
    }

    async fn bulk_insert(&self, grants: Vec<NewGrant>) -> StorageResult<Vec<Grant>> {
        let candidates: Vec<Grant> = grants.into_iter().map(|g| self.build(g)).collect();
        let mut state = self.backend.state.write().await;
        let rows = state.tables.entry(self.key.clone()).or_default();

        let mut inserted = Vec::new();
        for candidate in candidates {
            if rows.iter().any(|row| row.same_triple(&candidate)) {
                continue;
            }
            rows.push(candidate.clone());
            inserted.push(candidate);
        }
        Ok(inserted)
    }

    async fn delete(&self, filter: &GrantFilter) -> StorageResult<u64> {
        let mut guard = self.backend.state.write().await;
        let State {
            permissions,
            memberships,
            tables,
            ..
        } = &mut *guard;

        let Some(rows) = tables.get_mut(&self.key) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !row_matches(permissions, memberships, row, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn exists(&self, filter: &GrantFilter) -> StorageResult<bool> {
        self.backend.record_read();
        let state = self.backend.state.read().await;
        Ok(state.tables.get(&self.key).is_some_and(|rows| {
            rows.iter()
                .any(|row| row_matches(&state.permissions, &state.memberships, row, filter))
        }))
    }

    async fn codenames(&self, filter: &GrantFilter) -> StorageResult<Vec<(String, String)>> {
        self.backend.record_read();
        let state = self.backend.state.read().await;
        let Some(rows) = state.tables.get(&self.key) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .iter()
            .filter(|row| row_matches(&state.permissions, &state.memberships, row, filter))
            .filter_map(|row| {
                state
                    .permissions
                    .iter()
                    .find(|p| p.id == row.permission_id)
                    .map(|p| (row.target.object_pk().to_string(), p.codename.clone()))
            })
            .collect())
    }
}
