//! Reusable fixtures for engine integration tests.
//!
//! Every fixture runs on its own [`MemoryBackend`], so tests never share
//! grants. Use [`Fixture::guardian`] for operations and [`Fixture::backend`]
//! to inspect raw rows or define extra permissions.
#![allow(dead_code)]

use uuid::Uuid;
use warden::store::MemoryBackend;
use warden::{Config, Guardian};
use warden_common::{ModelKey, ObjectRef, Permission, Subject, SubjectKind};

pub struct Fixture {
    pub backend: MemoryBackend,
    pub guardian: Guardian,
    pub edit: Permission,
    pub view: Permission,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(&Config::default_for_test()).await
    }

    pub async fn with_config(config: &Config) -> Self {
        let backend = MemoryBackend::new();
        let edit = backend
            .create_permission(&article_model(), "edit", "Can edit article")
            .await;
        let view = backend
            .create_permission(&article_model(), "view", "Can view article")
            .await;
        let guardian = Guardian::in_memory(&backend, config).expect("memory guardian");

        Self {
            backend,
            guardian,
            edit,
            view,
        }
    }

    /// Number of grant rows stored for a subject kind in the generic table.
    pub async fn row_count(&self, kind: SubjectKind) -> usize {
        self.backend.generic_grants(kind).len().await
    }

    /// A fresh group with `user` as its only member.
    pub async fn group_with(&self, user: Subject) -> Subject {
        let group_id = Uuid::now_v7();
        self.backend.add_member(user.id(), group_id).await;
        Subject::Group(group_id)
    }
}

pub fn article_model() -> ModelKey {
    ModelKey::new("articles", "article")
}

pub fn comment_model() -> ModelKey {
    ModelKey::new("articles", "comment")
}

pub fn article(pk: i64) -> ObjectRef {
    ObjectRef::new(article_model(), pk)
}

pub fn articles(pks: impl IntoIterator<Item = i64>) -> Vec<ObjectRef> {
    pks.into_iter().map(article).collect()
}

pub fn new_user() -> Subject {
    Subject::User(Uuid::now_v7())
}

pub fn new_group() -> Subject {
    Subject::Group(Uuid::now_v7())
}
