//! `PostgreSQL` integration tests for the grant repositories.
//!
//! Run with: `cargo test --test postgres_test -- --ignored`

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;
use warden::db;
use warden::store::postgres::PkType;
use warden::store::{Catalog, GrantTables, PgCatalog, PgGrantRepository, StorageError};
use warden::{Config, Guardian, GuardianError};
use warden_common::{ModelKey, ObjectRef, Subject, SubjectKind, TargetLink};

/// Helper to create a migrated test database pool.
async fn create_test_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/warden_test".into());

    let pool = db::create_pool(&database_url, 5)
        .await
        .expect("Failed to connect to test database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

fn article_model() -> ModelKey {
    ModelKey::new("articles", "article")
}

async fn define_permission(pool: &PgPool, model: &ModelKey, codename: &str) -> i32 {
    let content_type = PgCatalog::new(pool.clone())
        .content_type_for_model(model)
        .await
        .expect("content type");

    sqlx::query_scalar(
        r"INSERT INTO permissions (content_type_id, codename, name)
          VALUES ($1, $2, $3)
          ON CONFLICT (content_type_id, codename) DO UPDATE SET name = EXCLUDED.name
          RETURNING id",
    )
    .bind(content_type.id)
    .bind(codename)
    .bind(format!("Can {codename}"))
    .fetch_one(pool)
    .await
    .expect("permission")
}

async fn create_user(pool: &PgPool) -> Subject {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO users (id, username) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("user_{id}"))
        .execute(pool)
        .await
        .expect("user");
    Subject::User(id)
}

async fn create_group_with(pool: &PgPool, member: Subject) -> Subject {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO groups (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(format!("group_{id}"))
        .execute(pool)
        .await
        .expect("group");
    sqlx::query("INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2)")
        .bind(member.id())
        .bind(id)
        .execute(pool)
        .await
        .expect("membership");
    Subject::Group(id)
}

/// Subjects are fresh per test, so plain pks never collide across runs.
fn articles(count: i64) -> Vec<ObjectRef> {
    (1..=count)
        .map(|pk| ObjectRef::new(article_model(), pk))
        .collect()
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_assign_is_idempotent_and_checkable() {
    let pool = create_test_pool().await;
    define_permission(&pool, &article_model(), "edit").await;
    let guardian = Guardian::from_pool(pool.clone(), &Config::default_for_test()).unwrap();
    let user = create_user(&pool).await;
    let targets = articles(1);
    let target = &targets[0];

    let first = guardian.assign_perm("edit", user, target).await.unwrap();
    let second = guardian.assign_perm("edit", user, target).await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(matches!(first.target, TargetLink::Generic { .. }));

    let mut checker = guardian.checker(user);
    assert!(checker.has_perm("articles.edit", target).await.unwrap());

    assert_eq!(guardian.remove_perm("edit", user, target).await.unwrap(), 1);
    checker.clear_cache();
    assert!(!checker.has_perm("edit", target).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_group_inheritance_and_bulk_assign() {
    let pool = create_test_pool().await;
    define_permission(&pool, &article_model(), "edit").await;
    let guardian = Guardian::from_pool(pool.clone(), &Config::default_for_test()).unwrap();
    let user = create_user(&pool).await;
    let group = create_group_with(&pool, user).await;
    let targets = articles(3);

    guardian.assign_perm("edit", group, &targets[0]).await.unwrap();
    assert!(guardian
        .checker(user)
        .has_perm("edit", &targets[0])
        .await
        .unwrap());

    guardian.remove_perm("edit", group, &targets[0]).await.unwrap();
    guardian.assign_perm("edit", user, &targets[0]).await.unwrap();

    let created = guardian
        .bulk_assign_perm("edit", user, &targets)
        .await
        .unwrap();
    assert_eq!(created.len(), 2);

    let mut checker = guardian.checker(user);
    checker.prefetch_perms(&targets).await.unwrap();
    for target in &targets {
        assert!(checker.has_perm("edit", target).await.unwrap());
    }

    assert_eq!(
        guardian.bulk_remove_perm("edit", user, &targets).await.unwrap(),
        3
    );
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_subject_deletion_cascades() {
    let pool = create_test_pool().await;
    define_permission(&pool, &article_model(), "view").await;
    let guardian = Guardian::from_pool(pool.clone(), &Config::default_for_test()).unwrap();
    let user = create_user(&pool).await;

    guardian
        .bulk_assign_perm("view", user, &articles(4))
        .await
        .unwrap();

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id())
        .execute(&pool)
        .await
        .unwrap();

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM user_object_permissions WHERE user_id = $1")
            .bind(user.id())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_direct_table() {
    let pool = create_test_pool().await;
    let permission_id = define_permission(&pool, &article_model(), "edit").await;

    sqlx::query(
        r"CREATE TABLE IF NOT EXISTS article_user_permissions (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            permission_id INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
            content_object_id BIGINT NOT NULL,
            UNIQUE (user_id, permission_id, content_object_id)
        )",
    )
    .execute(&pool)
    .await
    .unwrap();

    let direct = PgGrantRepository::direct(
        pool.clone(),
        SubjectKind::User,
        "article_user_permissions",
        PkType::BigInt,
    )
    .unwrap();
    let users = GrantTables::new(Arc::new(PgGrantRepository::generic(
        pool.clone(),
        SubjectKind::User,
    )))
    .unwrap()
    .with_direct(article_model(), Arc::new(direct))
    .unwrap();
    let groups = GrantTables::new(Arc::new(PgGrantRepository::generic(
        pool.clone(),
        SubjectKind::Group,
    )))
    .unwrap();
    let guardian = Guardian::builder(Arc::new(PgCatalog::new(pool.clone())), users, groups)
        .build()
        .unwrap();

    let user = create_user(&pool).await;
    let targets = articles(2);
    let grant = guardian.assign_perm("edit", user, &targets[0]).await.unwrap();
    assert_eq!(grant.permission_id, permission_id);
    assert!(matches!(grant.target, TargetLink::Direct { .. }));

    let created = guardian
        .bulk_assign_perm("edit", user, &targets)
        .await
        .unwrap();
    assert_eq!(created.len(), 1);

    let mut checker = guardian.checker(user);
    assert!(checker.has_perm("edit", &targets[1]).await.unwrap());
    assert_eq!(
        guardian.bulk_remove_perm("edit", user, &targets).await.unwrap(),
        2
    );

    // Keys that cannot cast to BIGINT are never held and cannot be granted.
    let malformed = ObjectRef::new(article_model(), "not-a-number");
    assert!(!checker.has_perm("edit", &malformed).await.unwrap());
    let err = guardian
        .assign_perm("edit", user, &malformed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GuardianError::Storage(StorageError::InvalidObjectKey { .. })
    ));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_pg_concurrent_assign_converges() {
    let pool = create_test_pool().await;
    define_permission(&pool, &article_model(), "edit").await;
    let guardian = Guardian::from_pool(pool.clone(), &Config::default_for_test()).unwrap();
    let user = create_user(&pool).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let guardian = guardian.clone();
            tokio::spawn(async move {
                guardian
                    .assign_perm("edit", user, &ObjectRef::new(article_model(), 1))
                    .await
            })
        })
        .collect();

    let mut ids = std::collections::BTreeSet::new();
    for result in futures::future::join_all(handles).await {
        ids.insert(result.expect("task panicked").unwrap().id);
    }
    assert_eq!(ids.len(), 1);

    let rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM user_object_permissions WHERE user_id = $1")
            .bind(user.id())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn test_direct_table_name_is_validated() {
    let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
    let result = PgGrantRepository::direct(
        pool,
        SubjectKind::User,
        "articles; DROP TABLE users",
        PkType::Text,
    );
    assert!(result.is_err());
}
