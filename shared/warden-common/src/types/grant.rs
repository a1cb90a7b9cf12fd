//! Grant Types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subject::Subject;

/// How a grant row points at its target object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "linkage", rename_all = "lowercase")]
pub enum TargetLink {
    /// Content type plus primary key as text; works for any model.
    Generic {
        content_type_id: i32,
        object_pk: String,
    },
    /// Foreign key into the one model the grant table is dedicated to.
    Direct { object_pk: String },
}

impl TargetLink {
    #[must_use]
    pub fn object_pk(&self) -> &str {
        match self {
            Self::Generic { object_pk, .. } | Self::Direct { object_pk } => object_pk,
        }
    }
}

/// A persisted (subject, permission, target) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: Uuid,
    pub subject: Subject,
    pub permission_id: i32,
    pub target: TargetLink,
}

impl Grant {
    /// Whether two rows describe the same (subject, permission, target) triple.
    #[must_use]
    pub fn same_triple(&self, other: &Self) -> bool {
        self.subject == other.subject
            && self.permission_id == other.permission_id
            && self.target == other.target
    }
}
