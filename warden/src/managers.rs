//! Object permission managers.
//!
//! One [`ObjectPermissionManager`] exists per subject kind. Both run the same
//! logic; the kind only selects which grant tables are written.
//!
//! Removal is a filtered delete issued straight at the grant table. Grants
//! are never loaded first, so no per-row deletion hooks run. Callers relying
//! on "row deleted" notifications must not expect them here.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use warden_common::{ContentType, Grant, ModelKey, PermRef, Permission, Subject, SubjectKind, Target};

use crate::checker::ObjectPermissionChecker;
use crate::engine::Engine;
use crate::error::{GuardianError, Result};
use crate::store::{GrantFilter, NewGrant, ObjectMatch, PermissionMatch, SubjectFilter};

/// Grant store operations for one subject kind.
#[derive(Clone)]
pub struct ObjectPermissionManager {
    kind: SubjectKind,
    engine: Arc<Engine>,
}

impl ObjectPermissionManager {
    pub(crate) const fn new(kind: SubjectKind, engine: Arc<Engine>) -> Self {
        Self { kind, engine }
    }

    #[must_use]
    pub const fn kind(&self) -> SubjectKind {
        self.kind
    }

    /// Grant `perm` on `target` to `subject`. Idempotent: repeated calls
    /// return the same row.
    #[tracing::instrument(skip(self, perm, target), fields(kind = %self.kind))]
    pub async fn assign_perm(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        target: &(impl Target + Sync),
    ) -> Result<Grant> {
        self.check_subject(subject)?;
        let object_pk = persisted_pk(target)?;
        let content_type = self.engine.resolver.resolve(&target.model_key()).await?;
        let permission = self.ensure_permission(&perm.into(), &content_type).await?;

        let grant = self
            .engine
            .tables(self.kind)
            .for_model(&content_type.model_key())
            .get_or_create(NewGrant {
                subject,
                permission_id: permission.id,
                content_type_id: content_type.id,
                object_pk,
            })
            .await?;

        debug!(codename = %permission.codename, grant_id = %grant.id, "Assigned object permission");
        Ok(grant)
    }

    /// Deprecated name for [`Self::assign_perm`].
    #[deprecated(note = "renamed to `assign_perm`")]
    pub async fn assign(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        target: &(impl Target + Sync),
    ) -> Result<Grant> {
        warn!(
            target: "warden::deprecation",
            kind = %self.kind,
            "ObjectPermissionManager::assign is deprecated, use assign_perm"
        );
        self.assign_perm(perm, subject, target).await
    }

    /// Grant `perm` to `subject` on every object in `targets`.
    ///
    /// Objects the subject already holds `perm` on are skipped, including a
    /// user's objects held through a group. Returns the rows actually created.
    #[tracing::instrument(skip(self, perm, targets), fields(kind = %self.kind, count = targets.len()))]
    pub async fn bulk_assign_perm<T: Target + Sync>(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        targets: &[T],
    ) -> Result<Vec<Grant>> {
        self.check_subject(subject)?;
        let Some(model) = common_model(targets)? else {
            return Ok(Vec::new());
        };
        let content_type = self.engine.resolver.resolve(&model).await?;
        let permission = self.ensure_permission(&perm.into(), &content_type).await?;

        let mut checker = ObjectPermissionChecker::new(subject, Arc::clone(&self.engine));
        checker.prefetch_perms(targets).await?;

        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for target in targets {
            let object_pk = persisted_pk(target)?;
            if !seen.insert(object_pk.clone())
                || checker.has_perm(&permission.codename, target).await?
            {
                continue;
            }
            rows.push(NewGrant {
                subject,
                permission_id: permission.id,
                content_type_id: content_type.id,
                object_pk,
            });
        }

        let created = self.insert_batched(&content_type, rows).await?;
        debug!(created = created.len(), codename = %permission.codename, "Bulk assigned object permission");
        Ok(created)
    }

    /// Grant `perm` on `target` to every subject in `subjects`.
    #[tracing::instrument(skip(self, perm, subjects, target), fields(kind = %self.kind, count = subjects.len()))]
    pub async fn assign_perm_to_many(
        &self,
        perm: impl Into<PermRef> + Send,
        subjects: &[Subject],
        target: &(impl Target + Sync),
    ) -> Result<Vec<Grant>> {
        for subject in subjects {
            self.check_subject(*subject)?;
        }
        let object_pk = persisted_pk(target)?;
        let content_type = self.engine.resolver.resolve(&target.model_key()).await?;
        let permission = self.ensure_permission(&perm.into(), &content_type).await?;

        let mut seen = HashSet::new();
        let rows = subjects
            .iter()
            .filter(|subject| seen.insert(**subject))
            .map(|subject| NewGrant {
                subject: *subject,
                permission_id: permission.id,
                content_type_id: content_type.id,
                object_pk: object_pk.clone(),
            })
            .collect();

        let created = self.insert_batched(&content_type, rows).await?;
        debug!(created = created.len(), codename = %permission.codename, "Assigned object permission to many");
        Ok(created)
    }

    /// Revoke `perm` on `target` from `subject`. Returns the number of rows removed.
    #[tracing::instrument(skip(self, perm, target), fields(kind = %self.kind))]
    pub async fn remove_perm(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        target: &(impl Target + Sync),
    ) -> Result<u64> {
        self.check_subject(subject)?;
        let object_pk = persisted_pk(target)?;
        let content_type = self.engine.resolver.resolve(&target.model_key()).await?;
        let perm = perm.into();
        self.ensure_permission(&perm, &content_type).await?;

        let filter = GrantFilter {
            subject: SubjectFilter::Exact(subject),
            permission: Some(permission_match(&perm, &content_type)),
            content_type_id: content_type.id,
            objects: ObjectMatch::One(object_pk),
        };
        let removed = self
            .engine
            .tables(self.kind)
            .for_model(&content_type.model_key())
            .delete(&filter)
            .await?;

        debug!(removed, codename = perm.codename(), "Removed object permission");
        Ok(removed)
    }

    /// Revoke `perm` from `subject` on every object in `targets`.
    ///
    /// Unsaved objects cannot hold grants and are ignored.
    #[tracing::instrument(skip(self, perm, targets), fields(kind = %self.kind, count = targets.len()))]
    pub async fn bulk_remove_perm<T: Target + Sync>(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        targets: &[T],
    ) -> Result<u64> {
        self.check_subject(subject)?;
        let Some(model) = common_model(targets)? else {
            return Ok(0);
        };
        let content_type = self.engine.resolver.resolve(&model).await?;
        let perm = perm.into();
        self.ensure_permission(&perm, &content_type).await?;

        let pks: Vec<String> = targets.iter().filter_map(Target::object_pk).collect();
        let repo = self
            .engine
            .tables(self.kind)
            .for_model(&content_type.model_key());

        let mut removed = 0;
        for chunk in pks.chunks(self.engine.bulk_batch_size) {
            let filter = GrantFilter {
                subject: SubjectFilter::Exact(subject),
                permission: Some(permission_match(&perm, &content_type)),
                content_type_id: content_type.id,
                objects: ObjectMatch::Any(chunk.to_vec()),
            };
            removed += repo.delete(&filter).await?;
        }

        debug!(removed, codename = perm.codename(), "Bulk removed object permission");
        Ok(removed)
    }

    fn check_subject(&self, subject: Subject) -> Result<()> {
        if subject.kind() == self.kind {
            Ok(())
        } else {
            Err(GuardianError::SubjectKindMismatch {
                expected: self.kind,
                found: subject.kind(),
            })
        }
    }

    /// Load the permission identity a caller named.
    async fn ensure_permission(
        &self,
        perm: &PermRef,
        content_type: &ContentType,
    ) -> Result<Permission> {
        match perm {
            PermRef::Identity(permission) if permission.content_type_id == content_type.id => {
                Ok(permission.clone())
            }
            PermRef::Identity(permission) => Err(GuardianError::PermissionNotFound {
                codename: permission.codename.clone(),
                content_type: content_type.model_key().to_string(),
            }),
            PermRef::Codename(_) => {
                let codename = perm.codename();
                self.engine
                    .resolver
                    .catalog()
                    .permission(content_type.id, codename)
                    .await?
                    .ok_or_else(|| GuardianError::PermissionNotFound {
                        codename: codename.to_string(),
                        content_type: content_type.model_key().to_string(),
                    })
            }
        }
    }

    async fn insert_batched(
        &self,
        content_type: &ContentType,
        rows: Vec<NewGrant>,
    ) -> Result<Vec<Grant>> {
        let repo = self
            .engine
            .tables(self.kind)
            .for_model(&content_type.model_key());

        let mut created = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(self.engine.bulk_batch_size) {
            created.extend(repo.bulk_insert(chunk.to_vec()).await?);
        }
        Ok(created)
    }
}

fn permission_match(perm: &PermRef, content_type: &ContentType) -> PermissionMatch {
    match perm {
        PermRef::Identity(permission) => PermissionMatch::Exact(permission.id),
        PermRef::Codename(_) => PermissionMatch::Codename {
            codename: perm.codename().to_string(),
            content_type_id: content_type.id,
        },
    }
}

fn persisted_pk(target: &impl Target) -> Result<String> {
    target
        .object_pk()
        .ok_or_else(|| GuardianError::NotPersisted(format!("{} (unsaved)", target.model_key())))
}

/// The single model all `targets` belong to; `None` when empty.
fn common_model<T: Target>(targets: &[T]) -> Result<Option<ModelKey>> {
    let mut models = targets.iter().map(Target::model_key);
    let Some(first) = models.next() else {
        return Ok(None);
    };
    if let Some(other) = models.find(|model| *model != first) {
        return Err(GuardianError::MixedTargets {
            first: first.to_string(),
            other: other.to_string(),
        });
    }
    Ok(Some(first))
}
