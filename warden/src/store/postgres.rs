//! `PostgreSQL` storage backend.
//!
//! Generic tables come from the bundled migration. Direct tables are
//! deployment-defined and must provide:
//!
//! ```sql
//! id UUID PRIMARY KEY,
//! user_id UUID NOT NULL,          -- or group_id for group grants
//! permission_id INTEGER NOT NULL,
//! content_object_id <pk type> NOT NULL REFERENCES <target table> ON DELETE CASCADE,
//! UNIQUE (user_id, permission_id, content_object_id)
//! ```

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use warden_common::{ContentType, Grant, ModelKey, Permission, Subject, SubjectKind, TargetLink};

use super::{
    new_grant_id, Catalog, GrantFilter, GrantRepository, Linkage, NewGrant, PermissionMatch,
    StorageError, StorageResult, SubjectFilter,
};

static SQL_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("valid regex"));

/// Membership table joining users to groups.
const MEMBERSHIP_TABLE: &str = "user_groups";

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, FromRow)]
struct ContentTypeRow {
    id: i32,
    app_label: String,
    model: String,
}

impl From<ContentTypeRow> for ContentType {
    fn from(row: ContentTypeRow) -> Self {
        Self {
            id: row.id,
            app_label: row.app_label,
            model: row.model,
        }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: i32,
    content_type_id: i32,
    codename: String,
    name: String,
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Self {
            id: row.id,
            content_type_id: row.content_type_id,
            codename: row.codename,
            name: row.name,
        }
    }
}

/// Type registry and permission identities stored in `PostgreSQL`.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn content_type_for_model(&self, model: &ModelKey) -> StorageResult<ContentType> {
        // DO UPDATE (rather than DO NOTHING) so RETURNING yields the existing row.
        let row = sqlx::query_as::<_, ContentTypeRow>(
            r"
            INSERT INTO content_types (app_label, model)
            VALUES ($1, $2)
            ON CONFLICT (app_label, model) DO UPDATE SET model = EXCLUDED.model
            RETURNING id, app_label, model
            ",
        )
        .bind(&model.app_label)
        .bind(&model.model)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn content_type_for_codename(
        &self,
        app_label: &str,
        codename: &str,
    ) -> StorageResult<Option<ContentType>> {
        let mut rows = sqlx::query_as::<_, ContentTypeRow>(
            r"
            SELECT ct.id, ct.app_label, ct.model
            FROM content_types ct
            INNER JOIN permissions p ON p.content_type_id = ct.id
            WHERE ct.app_label = $1
              AND p.codename = $2
            LIMIT 2
            ",
        )
        .bind(app_label)
        .bind(codename)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() == 1 {
            Ok(rows.pop().map(Into::into))
        } else {
            Ok(None)
        }
    }

    async fn permission(
        &self,
        content_type_id: i32,
        codename: &str,
    ) -> StorageResult<Option<Permission>> {
        let row = sqlx::query_as::<_, PermissionRow>(
            r"
            SELECT id, content_type_id, codename, name
            FROM permissions
            WHERE content_type_id = $1
              AND codename = $2
            ",
        )
        .bind(content_type_id)
        .bind(codename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }
}

// ============================================================================
// Grant tables
// ============================================================================

/// SQL type of a direct table's `content_object_id` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkType {
    Text,
    Integer,
    BigInt,
    Uuid,
}

impl PkType {
    const fn sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Uuid => "UUID",
        }
    }

    /// Whether `pk` casts cleanly to this column type.
    #[must_use]
    pub fn accepts(self, pk: &str) -> bool {
        match self {
            Self::Text => true,
            Self::Integer => pk.parse::<i32>().is_ok(),
            Self::BigInt => pk.parse::<i64>().is_ok(),
            Self::Uuid => Uuid::parse_str(pk).is_ok(),
        }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    id: Uuid,
    subject_id: Uuid,
    permission_id: i32,
    content_type_id: Option<i32>,
    object_pk: String,
}

/// One grant table in `PostgreSQL`.
#[derive(Clone)]
pub struct PgGrantRepository {
    pool: PgPool,
    kind: SubjectKind,
    linkage: Linkage,
    table: String,
    pk_type: PkType,
}

impl PgGrantRepository {
    /// The bundled generic table for a subject kind.
    #[must_use]
    pub fn generic(pool: PgPool, kind: SubjectKind) -> Self {
        let table = match kind {
            SubjectKind::User => "user_object_permissions",
            SubjectKind::Group => "group_object_permissions",
        };
        Self {
            pool,
            kind,
            linkage: Linkage::Generic,
            table: table.to_string(),
            pk_type: PkType::Text,
        }
    }

    /// A deployment-defined direct table.
    pub fn direct(
        pool: PgPool,
        kind: SubjectKind,
        table: &str,
        pk_type: PkType,
    ) -> StorageResult<Self> {
        if !SQL_IDENTIFIER.is_match(table) {
            return Err(StorageError::InvalidIdentifier(table.to_string()));
        }
        Ok(Self {
            pool,
            kind,
            linkage: Linkage::Direct,
            table: table.to_string(),
            pk_type,
        })
    }

    fn check_pk(&self, pk: &str) -> StorageResult<()> {
        if self.pk_type.accepts(pk) {
            Ok(())
        } else {
            Err(StorageError::InvalidObjectKey {
                pk: pk.to_string(),
                column_type: self.pk_type.sql(),
            })
        }
    }

    const fn subject_column(&self) -> &'static str {
        match self.kind {
            SubjectKind::User => "user_id",
            SubjectKind::Group => "group_id",
        }
    }

    const fn object_column(&self) -> &'static str {
        match self.linkage {
            Linkage::Generic => "object_pk",
            Linkage::Direct => "content_object_id",
        }
    }

    fn returning(&self) -> String {
        let content_type = match self.linkage {
            Linkage::Generic => "content_type_id",
            Linkage::Direct => "NULL::INTEGER AS content_type_id",
        };
        format!(
            "id, {} AS subject_id, permission_id, {content_type}, {}::TEXT AS object_pk",
            self.subject_column(),
            self.object_column()
        )
    }

    fn to_grant(&self, row: GrantRow) -> Grant {
        let subject = match self.kind {
            SubjectKind::User => Subject::User(row.subject_id),
            SubjectKind::Group => Subject::Group(row.subject_id),
        };
        let target = match (self.linkage, row.content_type_id) {
            (Linkage::Generic, Some(content_type_id)) => TargetLink::Generic {
                content_type_id,
                object_pk: row.object_pk,
            },
            _ => TargetLink::Direct {
                object_pk: row.object_pk,
            },
        };
        Grant {
            id: row.id,
            subject,
            permission_id: row.permission_id,
            target,
        }
    }

    fn insert_prefix(&self) -> String {
        let content_type = match self.linkage {
            Linkage::Generic => ", content_type_id",
            Linkage::Direct => "",
        };
        format!(
            "INSERT INTO {} (id, {}, permission_id{content_type}, {}) ",
            self.table,
            self.subject_column(),
            self.object_column()
        )
    }

    /// Append `WHERE ...` for `filter`, with the table aliased as `g`.
    fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, filter: &GrantFilter) {
        match &filter.subject {
            SubjectFilter::Exact(subject) if subject.kind() == self.kind => {
                qb.push(format!(" WHERE g.{} = ", self.subject_column()));
                qb.push_bind(subject.id());
            }
            SubjectFilter::GroupsOf(user_id) if self.kind == SubjectKind::Group => {
                qb.push(format!(
                    " WHERE g.group_id IN (SELECT group_id FROM {MEMBERSHIP_TABLE} WHERE user_id = "
                ));
                qb.push_bind(*user_id);
                qb.push(")");
            }
            // A user table never holds rows for groups, and vice versa.
            _ => {
                qb.push(" WHERE FALSE");
            }
        }

        match &filter.permission {
            None => {}
            Some(PermissionMatch::Exact(id)) => {
                qb.push(" AND g.permission_id = ");
                qb.push_bind(*id);
            }
            Some(PermissionMatch::Codename {
                codename,
                content_type_id,
            }) => {
                qb.push(" AND g.permission_id IN (SELECT id FROM permissions WHERE codename = ");
                qb.push_bind(codename.clone());
                qb.push(" AND content_type_id = ");
                qb.push_bind(*content_type_id);
                qb.push(")");
            }
        }

        if self.linkage == Linkage::Generic {
            qb.push(" AND g.content_type_id = ");
            qb.push_bind(filter.content_type_id);
        }

        // A pk that cannot cast to the column type matches no row.
        let pks: Vec<String> = filter
            .objects
            .to_vec()
            .into_iter()
            .filter(|pk| self.pk_type.accepts(pk))
            .collect();
        qb.push(format!(" AND g.{} = ANY(", self.object_column()));
        qb.push_bind(pks);
        qb.push(format!("::{}[])", self.pk_type.sql()));
    }
}

#[async_trait]
impl GrantRepository for PgGrantRepository {
    fn linkage(&self) -> Linkage {
        self.linkage
    }

    fn subject_kind(&self) -> SubjectKind {
        self.kind
    }

    async fn get_or_create(&self, grant: NewGrant) -> StorageResult<Grant> {
        self.check_pk(&grant.object_pk)?;
        // Conflict-tolerant insert followed by a read, so concurrent callers
        // converge on the same row.
        let mut qb = QueryBuilder::<Postgres>::new(self.insert_prefix());
        qb.push("VALUES (");
        qb.push_bind(new_grant_id());
        qb.push(", ");
        qb.push_bind(grant.subject.id());
        qb.push(", ");
        qb.push_bind(grant.permission_id);
        if self.linkage == Linkage::Generic {
            qb.push(", ");
            qb.push_bind(grant.content_type_id);
        }
        qb.push(", ");
        qb.push_bind(grant.object_pk.clone());
        qb.push(format!("::{}) ON CONFLICT DO NOTHING", self.pk_type.sql()));
        qb.build().execute(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM {} WHERE {} = ",
            self.returning(),
            self.table,
            self.subject_column()
        ));
        select.push_bind(grant.subject.id());
        select.push(" AND permission_id = ");
        select.push_bind(grant.permission_id);
        select.push(format!(" AND {} = ", self.object_column()));
        select.push_bind(grant.object_pk);
        select.push(format!("::{}", self.pk_type.sql()));

        let row = select
            .build_query_as::<GrantRow>()
            .fetch_one(&self.pool)
            .await?;
        Ok(self.to_grant(row))
    }

    async fn bulk_insert(&self, grants: Vec<NewGrant>) -> StorageResult<Vec<Grant>> {
        if grants.is_empty() {
            return Ok(Vec::new());
        }
        for grant in &grants {
            self.check_pk(&grant.object_pk)?;
        }

        let generic = self.linkage == Linkage::Generic;
        let pk_cast = format!("::{}", self.pk_type.sql());

        let mut qb = QueryBuilder::<Postgres>::new(self.insert_prefix());
        qb.push_values(grants, |mut b, grant| {
            b.push_bind(new_grant_id())
                .push_bind(grant.subject.id())
                .push_bind(grant.permission_id);
            if generic {
                b.push_bind(grant.content_type_id);
            }
            b.push_bind(grant.object_pk).push_unseparated(pk_cast.clone());
        });
        qb.push(format!(" ON CONFLICT DO NOTHING RETURNING {}", self.returning()));

        let rows = qb.build_query_as::<GrantRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|row| self.to_grant(row)).collect())
    }

    async fn delete(&self, filter: &GrantFilter) -> StorageResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} g", self.table));
        self.push_filter(&mut qb, filter);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn exists(&self, filter: &GrantFilter) -> StorageResult<bool> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT EXISTS(SELECT 1 FROM {} g", self.table));
        self.push_filter(&mut qb, filter);
        qb.push(")");

        let (exists,): (bool,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn codenames(&self, filter: &GrantFilter) -> StorageResult<Vec<(String, String)>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT g.{}::TEXT AS object_pk, p.codename FROM {} g \
             INNER JOIN permissions p ON p.id = g.permission_id",
            self.object_column(),
            self.table
        ));
        self.push_filter(&mut qb, filter);

        let rows: Vec<(String, String)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(SQL_IDENTIFIER.is_match("article_user_permissions"));
        assert!(!SQL_IDENTIFIER.is_match("articles; DROP TABLE users"));
        assert!(!SQL_IDENTIFIER.is_match("Articles"));
        assert!(!SQL_IDENTIFIER.is_match("1table"));
    }

    #[test]
    fn test_pk_type_sql() {
        assert_eq!(PkType::Text.sql(), "TEXT");
        assert_eq!(PkType::BigInt.sql(), "BIGINT");
        assert_eq!(PkType::Uuid.sql(), "UUID");
    }

    #[test]
    fn test_pk_type_accepts() {
        assert!(PkType::Text.accepts("draft-7"));
        assert!(PkType::BigInt.accepts("9000000000"));
        assert!(!PkType::Integer.accepts("9000000000"));
        assert!(!PkType::BigInt.accepts("not-a-number"));
        assert!(PkType::Uuid.accepts(&Uuid::now_v7().to_string()));
        assert!(!PkType::Uuid.accepts("42"));
    }
}
