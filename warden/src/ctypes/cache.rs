//! Content Type Cache
//!
//! Memoizes content type lookups using `DashMap` for lock-free concurrent
//! access. Entries are only ever added: content types and permission
//! identities do not change once migrated, so nothing is invalidated during
//! normal operation. [`ContentTypeCache::clear`] exists for tests.

use dashmap::DashMap;
use warden_common::{ContentType, ModelKey};

/// Thread-safe cache of resolved content types.
#[derive(Debug, Default)]
pub struct ContentTypeCache {
    by_model: DashMap<ModelKey, ContentType>,
    /// Keyed by `(app_label, codename)`.
    by_codename: DashMap<(String, String), ContentType>,
}

impl ContentTypeCache {
    /// Create a new empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model(&self, model: &ModelKey) -> Option<ContentType> {
        self.by_model.get(model).map(|entry| entry.value().clone())
    }

    pub fn insert_model(&self, model: ModelKey, content_type: ContentType) {
        self.by_model.entry(model).or_insert(content_type);
    }

    #[must_use]
    pub fn codename(&self, app_label: &str, codename: &str) -> Option<ContentType> {
        self.by_codename
            .get(&(app_label.to_string(), codename.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn insert_codename(&self, app_label: &str, codename: &str, content_type: ContentType) {
        self.by_codename
            .entry((app_label.to_string(), codename.to_string()))
            .or_insert(content_type);
    }

    /// Number of memoized entries across both maps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_model.len() + self.by_codename.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.by_model.clear();
        self.by_codename.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_type(id: i32) -> ContentType {
        ContentType {
            id,
            app_label: "articles".into(),
            model: "article".into(),
        }
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = ContentTypeCache::new();
        let key = ModelKey::new("articles", "article");
        cache.insert_model(key.clone(), content_type(1));
        cache.insert_model(key.clone(), content_type(2));
        assert_eq!(cache.model(&key).map(|ct| ct.id), Some(1));
    }

    #[test]
    fn test_clear_resets_both_maps() {
        let cache = ContentTypeCache::new();
        cache.insert_model(ModelKey::new("articles", "article"), content_type(1));
        cache.insert_codename("articles", "edit", content_type(1));
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.codename("articles", "edit").is_none());
    }
}
