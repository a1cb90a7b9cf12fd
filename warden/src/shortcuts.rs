//! Guardian Facade
//!
//! [`Guardian`] is the caller-facing entry point. It owns the content type
//! resolver and the grant tables for both subject kinds, and dispatches each
//! call to the manager matching the subject.
//!
//! ```ignore
//! let guardian = Guardian::connect(&Config::from_env()?).await?;
//! guardian.assign_perm("change_article", Subject::User(user_id), &article).await?;
//!
//! let mut checker = guardian.checker(Subject::User(user_id));
//! assert!(checker.has_perm("articles.change_article", &article).await?);
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;
use warden_common::{Grant, PermRef, Subject, SubjectKind, Target};

use crate::checker::ObjectPermissionChecker;
use crate::config::Config;
use crate::ctypes::{ContentTypeCache, ContentTypeResolver, ResolveContentType};
use crate::db;
use crate::engine::Engine;
use crate::error::{GuardianError, Result};
use crate::managers::ObjectPermissionManager;
use crate::store::{Catalog, GrantTables, MemoryBackend, PgCatalog, PgGrantRepository};

/// Object permission engine handle. Clones share all state.
#[derive(Clone)]
pub struct Guardian {
    engine: Arc<Engine>,
    users: ObjectPermissionManager,
    groups: ObjectPermissionManager,
}

impl Guardian {
    /// Start assembling a guardian from explicit storage parts.
    pub fn builder(
        catalog: Arc<dyn Catalog>,
        users: GrantTables,
        groups: GrantTables,
    ) -> GuardianBuilder {
        GuardianBuilder {
            catalog,
            users,
            groups,
            config: Config::default(),
            strategy: None,
            cache: None,
        }
    }

    /// Guardian over an in-memory backend, using its generic tables.
    pub fn in_memory(backend: &MemoryBackend, config: &Config) -> Result<Self> {
        let users = GrantTables::new(Arc::new(backend.generic_grants(SubjectKind::User)))?;
        let groups = GrantTables::new(Arc::new(backend.generic_grants(SubjectKind::Group)))?;
        Self::builder(Arc::new(backend.clone()), users, groups)
            .config(config)
            .build()
    }

    /// Guardian over the bundled `PostgreSQL` schema.
    pub fn from_pool(pool: PgPool, config: &Config) -> Result<Self> {
        let users = GrantTables::new(Arc::new(PgGrantRepository::generic(
            pool.clone(),
            SubjectKind::User,
        )))?;
        let groups = GrantTables::new(Arc::new(PgGrantRepository::generic(
            pool.clone(),
            SubjectKind::Group,
        )))?;
        Self::builder(Arc::new(PgCatalog::new(pool)), users, groups)
            .config(config)
            .build()
    }

    /// Build a guardian from configuration.
    ///
    /// Connects and migrates when `DATABASE_URL` is set, otherwise starts on
    /// a fresh in-memory backend.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let Some(database_url) = config.database_url.as_deref() else {
            info!("No DATABASE_URL set, using in-memory grant store");
            return Ok(Self::in_memory(&MemoryBackend::new(), config)?);
        };

        let pool = db::create_pool(database_url, config.db_max_connections)
            .await
            .context("Failed to connect to PostgreSQL")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        Ok(Self::from_pool(pool, config)?)
    }

    #[must_use]
    pub const fn user_permissions(&self) -> &ObjectPermissionManager {
        &self.users
    }

    #[must_use]
    pub const fn group_permissions(&self) -> &ObjectPermissionManager {
        &self.groups
    }

    #[must_use]
    pub const fn manager_for(&self, kind: SubjectKind) -> &ObjectPermissionManager {
        match kind {
            SubjectKind::User => &self.users,
            SubjectKind::Group => &self.groups,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &ContentTypeResolver {
        &self.engine.resolver
    }

    pub async fn assign_perm(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        target: &(impl Target + Sync),
    ) -> Result<Grant> {
        self.manager_for(subject.kind())
            .assign_perm(perm, subject, target)
            .await
    }

    pub async fn remove_perm(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        target: &(impl Target + Sync),
    ) -> Result<u64> {
        self.manager_for(subject.kind())
            .remove_perm(perm, subject, target)
            .await
    }

    /// Grant `perm` on `target` to every subject, users and groups alike.
    pub async fn assign_perm_to_many(
        &self,
        perm: impl Into<PermRef> + Send,
        subjects: &[Subject],
        target: &(impl Target + Sync),
    ) -> Result<Vec<Grant>> {
        let perm = perm.into();
        let (users, groups): (Vec<Subject>, Vec<Subject>) = subjects
            .iter()
            .partition(|subject| subject.kind() == SubjectKind::User);

        let mut created = Vec::new();
        if !users.is_empty() {
            created.extend(
                self.users
                    .assign_perm_to_many(perm.clone(), &users, target)
                    .await?,
            );
        }
        if !groups.is_empty() {
            created.extend(self.groups.assign_perm_to_many(perm, &groups, target).await?);
        }
        Ok(created)
    }

    pub async fn bulk_assign_perm<T: Target + Sync>(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        targets: &[T],
    ) -> Result<Vec<Grant>> {
        self.manager_for(subject.kind())
            .bulk_assign_perm(perm, subject, targets)
            .await
    }

    pub async fn bulk_remove_perm<T: Target + Sync>(
        &self,
        perm: impl Into<PermRef> + Send,
        subject: Subject,
        targets: &[T],
    ) -> Result<u64> {
        self.manager_for(subject.kind())
            .bulk_remove_perm(perm, subject, targets)
            .await
    }

    /// A fresh checker with an empty cache.
    #[must_use]
    pub fn checker(&self, subject: Subject) -> ObjectPermissionChecker {
        ObjectPermissionChecker::new(subject, Arc::clone(&self.engine))
    }

    /// One-off lookup of every codename `subject` holds on `target`.
    pub async fn get_perms(
        &self,
        subject: Subject,
        target: &(impl Target + Sync),
    ) -> Result<BTreeSet<String>> {
        self.checker(subject).get_perms(target).await
    }
}

/// Assembles a [`Guardian`] from storage parts.
pub struct GuardianBuilder {
    catalog: Arc<dyn Catalog>,
    users: GrantTables,
    groups: GrantTables,
    config: Config,
    strategy: Option<Arc<dyn ResolveContentType>>,
    cache: Option<Arc<ContentTypeCache>>,
}

impl GuardianBuilder {
    /// Take resolver strategy, aliases and batch size from `config`.
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        self.config = config.clone();
        self
    }

    /// Override the configured resolver strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: Arc<dyn ResolveContentType>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Share a content type cache between guardians.
    #[must_use]
    pub fn cache(mut self, cache: Arc<ContentTypeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn bulk_batch_size(mut self, size: usize) -> Self {
        self.config.bulk_batch_size = size;
        self
    }

    pub fn build(self) -> Result<Guardian> {
        for (tables, expected) in [
            (&self.users, SubjectKind::User),
            (&self.groups, SubjectKind::Group),
        ] {
            if tables.kind() != expected {
                return Err(GuardianError::Misconfigured(format!(
                    "{expected} tables hold {} grants",
                    tables.kind()
                )));
            }
        }
        if self.config.bulk_batch_size == 0 {
            return Err(GuardianError::Misconfigured(
                "bulk batch size must be positive".into(),
            ));
        }

        let cache = self.cache.unwrap_or_default();
        let resolver = match self.strategy {
            Some(strategy) => ContentTypeResolver::new(strategy, self.catalog, cache),
            None => ContentTypeResolver::from_config(&self.config, self.catalog, cache),
        };

        let engine = Arc::new(Engine {
            resolver,
            users: self.users,
            groups: self.groups,
            bulk_batch_size: self.config.bulk_batch_size,
        });
        Ok(Guardian {
            users: ObjectPermissionManager::new(SubjectKind::User, Arc::clone(&engine)),
            groups: ObjectPermissionManager::new(SubjectKind::Group, Arc::clone(&engine)),
            engine,
        })
    }
}
