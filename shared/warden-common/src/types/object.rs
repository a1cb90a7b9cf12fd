//! Target Object Types

use serde::{Deserialize, Serialize};

use super::content::ModelKey;

/// Anything a permission can be granted on.
///
/// Implementors report their model class and, once persisted, their
/// primary key rendered as text. An object without a primary key cannot
/// carry grants.
pub trait Target {
    fn model_key(&self) -> ModelKey;

    fn object_pk(&self) -> Option<String>;
}

impl<T: Target + ?Sized> Target for &T {
    fn model_key(&self) -> ModelKey {
        (**self).model_key()
    }

    fn object_pk(&self) -> Option<String> {
        (**self).object_pk()
    }
}

/// Plain reference to a target object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub model: ModelKey,
    pub pk: Option<String>,
}

impl ObjectRef {
    pub fn new(model: ModelKey, pk: impl ToString) -> Self {
        Self {
            model,
            pk: Some(pk.to_string()),
        }
    }

    /// An object that has not been saved yet.
    #[must_use]
    pub const fn unsaved(model: ModelKey) -> Self {
        Self { model, pk: None }
    }
}

impl Target for ObjectRef {
    fn model_key(&self) -> ModelKey {
        self.model.clone()
    }

    fn object_pk(&self) -> Option<String> {
        self.pk.clone()
    }
}
