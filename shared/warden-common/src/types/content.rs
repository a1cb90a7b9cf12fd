//! Content Type and Permission Types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseModelKeyError;

/// The class of a target object, e.g. `articles.article`.
///
/// Model names are stored lowercase so that `Article` and `article` name
/// the same class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    /// Application namespace the model belongs to.
    pub app_label: String,
    /// Model name (lowercase).
    pub model: String,
}

impl ModelKey {
    pub fn new(app_label: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model: model.into().to_lowercase(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model)
    }
}

impl FromStr for ModelKey {
    type Err = ParseModelKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('.') {
            Some((app_label, model))
                if !app_label.is_empty() && !model.is_empty() && !model.contains('.') =>
            {
                Ok(Self::new(app_label, model))
            }
            _ => Err(ParseModelKeyError(s.to_string())),
        }
    }
}

/// Stable identifier for a model class, as stored in the type registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentType {
    pub id: i32,
    pub app_label: String,
    pub model: String,
}

impl ContentType {
    /// The model this content type identifies.
    #[must_use]
    pub fn model_key(&self) -> ModelKey {
        ModelKey::new(&self.app_label, &self.model)
    }
}

/// A permission identity: a codename scoped to one content type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub id: i32,
    pub content_type_id: i32,
    pub codename: String,
    /// Human readable name.
    pub name: String,
}

/// How a caller names a permission.
///
/// Either an already loaded identity, or a codename that still has to be
/// resolved against the target's content type. Codenames may be qualified
/// with an app label (`articles.change_article`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermRef {
    Identity(Permission),
    Codename(String),
}

impl PermRef {
    /// The bare codename, with any `app_label.` prefix removed.
    #[must_use]
    pub fn codename(&self) -> &str {
        match self {
            Self::Identity(permission) => &permission.codename,
            Self::Codename(raw) => raw.rsplit_once('.').map_or(raw.as_str(), |(_, c)| c),
        }
    }

    /// The app label of a qualified codename, if one was given.
    #[must_use]
    pub fn app_label(&self) -> Option<&str> {
        match self {
            Self::Identity(_) => None,
            Self::Codename(raw) => raw.rsplit_once('.').map(|(app, _)| app),
        }
    }
}

impl From<&str> for PermRef {
    fn from(value: &str) -> Self {
        Self::Codename(value.to_string())
    }
}

impl From<String> for PermRef {
    fn from(value: String) -> Self {
        Self::Codename(value)
    }
}

impl From<Permission> for PermRef {
    fn from(value: Permission) -> Self {
        Self::Identity(value)
    }
}

impl From<&Permission> for PermRef {
    fn from(value: &Permission) -> Self {
        Self::Identity(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_key_lowercases_model() {
        let key = ModelKey::new("articles", "Article");
        assert_eq!(key.model, "article");
        assert_eq!(key.to_string(), "articles.article");
    }

    #[test]
    fn test_model_key_parse() {
        let key: ModelKey = "posts.Post".parse().expect("valid key");
        assert_eq!(key, ModelKey::new("posts", "post"));

        assert!("posts".parse::<ModelKey>().is_err());
        assert!(".post".parse::<ModelKey>().is_err());
        assert!("a.b.c".parse::<ModelKey>().is_err());
    }

    #[test]
    fn test_perm_ref_strips_app_label() {
        let perm = PermRef::from("articles.change_article");
        assert_eq!(perm.codename(), "change_article");
        assert_eq!(perm.app_label(), Some("articles"));

        let bare = PermRef::from("change_article");
        assert_eq!(bare.codename(), "change_article");
        assert_eq!(bare.app_label(), None);
    }

    #[test]
    fn test_perm_ref_identity() {
        let permission = Permission {
            id: 7,
            content_type_id: 1,
            codename: "edit".into(),
            name: "Can edit".into(),
        };
        let perm = PermRef::from(&permission);
        assert_eq!(perm.codename(), "edit");
        assert_eq!(perm.app_label(), None);
    }
}
