//! Subject Types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Individual principal ID.
pub type UserId = Uuid;

/// Group ID.
pub type GroupId = Uuid;

/// Who a grant is given to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Subject {
    /// A single user.
    User(UserId),
    /// A named collection of users.
    Group(GroupId),
}

impl Subject {
    #[must_use]
    pub const fn kind(&self) -> SubjectKind {
        match self {
            Self::User(_) => SubjectKind::User,
            Self::Group(_) => SubjectKind::Group,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        match self {
            Self::User(id) | Self::Group(id) => *id,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// The two subject variants, without an ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Group,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Group => f.write_str("group"),
        }
    }
}
