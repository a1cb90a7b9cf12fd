//! Content type resolution.
//!
//! Normalizes "what kind of object is this" into a stable [`ContentType`].
//! The strategy is chosen at startup:
//! - [`RegistryResolver`]: ask the type registry for the model as given
//! - [`AliasResolver`]: map proxy/alias models onto their concrete model first
//!
//! Results are memoized in an injectable [`ContentTypeCache`].

pub mod cache;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use warden_common::{ContentType, ModelKey};

use crate::config::{Config, ResolverStrategy};
use crate::store::{Catalog, StorageResult};

pub use cache::ContentTypeCache;

/// Pluggable model -> content type strategy.
#[async_trait]
pub trait ResolveContentType: Send + Sync {
    async fn resolve(&self, catalog: &dyn Catalog, model: &ModelKey) -> StorageResult<ContentType>;
}

/// Default strategy: the registry's content type for the model itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryResolver;

#[async_trait]
impl ResolveContentType for RegistryResolver {
    async fn resolve(&self, catalog: &dyn Catalog, model: &ModelKey) -> StorageResult<ContentType> {
        catalog.content_type_for_model(model).await
    }
}

/// Resolves alias models to the content type of their concrete model.
#[derive(Debug, Clone, Default)]
pub struct AliasResolver {
    aliases: HashMap<ModelKey, ModelKey>,
}

impl AliasResolver {
    pub fn new(aliases: impl IntoIterator<Item = (ModelKey, ModelKey)>) -> Self {
        Self {
            aliases: aliases.into_iter().collect(),
        }
    }

    /// Follow alias links to the concrete model. Cycles stop at the first repeat.
    #[must_use]
    pub fn canonical<'a>(&'a self, model: &'a ModelKey) -> &'a ModelKey {
        let mut current = model;
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(next) if next != model => current = next,
                _ => break,
            }
        }
        current
    }
}

#[async_trait]
impl ResolveContentType for AliasResolver {
    async fn resolve(&self, catalog: &dyn Catalog, model: &ModelKey) -> StorageResult<ContentType> {
        catalog.content_type_for_model(self.canonical(model)).await
    }
}

/// Resolver used by the managers and checkers.
#[derive(Clone)]
pub struct ContentTypeResolver {
    strategy: Arc<dyn ResolveContentType>,
    catalog: Arc<dyn Catalog>,
    cache: Arc<ContentTypeCache>,
}

impl ContentTypeResolver {
    pub fn new(
        strategy: Arc<dyn ResolveContentType>,
        catalog: Arc<dyn Catalog>,
        cache: Arc<ContentTypeCache>,
    ) -> Self {
        Self {
            strategy,
            catalog,
            cache,
        }
    }

    /// Build the resolver selected by `config`.
    pub fn from_config(
        config: &Config,
        catalog: Arc<dyn Catalog>,
        cache: Arc<ContentTypeCache>,
    ) -> Self {
        let strategy: Arc<dyn ResolveContentType> = match config.resolver {
            ResolverStrategy::Registry => Arc::new(RegistryResolver),
            ResolverStrategy::Alias => {
                Arc::new(AliasResolver::new(config.model_aliases.iter().cloned()))
            }
        };
        Self::new(strategy, catalog, cache)
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ContentTypeCache> {
        &self.cache
    }

    /// Content type for a model class.
    pub async fn resolve(&self, model: &ModelKey) -> StorageResult<ContentType> {
        if let Some(hit) = self.cache.model(model) {
            return Ok(hit);
        }

        let content_type = self.strategy.resolve(self.catalog.as_ref(), model).await?;
        self.cache.insert_model(model.clone(), content_type.clone());
        Ok(content_type)
    }

    /// Content type that defines `codename` within `app_label`, memoized.
    ///
    /// Misses are not cached, so permissions defined later are still found.
    pub async fn resolve_cached(
        &self,
        app_label: &str,
        codename: &str,
    ) -> StorageResult<Option<ContentType>> {
        if let Some(hit) = self.cache.codename(app_label, codename) {
            return Ok(Some(hit));
        }

        let found = self
            .catalog
            .content_type_for_codename(app_label, codename)
            .await?;
        if let Some(content_type) = &found {
            self.cache
                .insert_codename(app_label, codename, content_type.clone());
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;

    fn article() -> ModelKey {
        ModelKey::new("articles", "article")
    }

    fn draft() -> ModelKey {
        ModelKey::new("articles", "draft")
    }

    #[test]
    fn test_alias_canonical_follows_chain() {
        let pinned = ModelKey::new("articles", "pinned");
        let resolver = AliasResolver::new([(pinned.clone(), draft()), (draft(), article())]);

        assert_eq!(resolver.canonical(&pinned), &article());
        assert_eq!(resolver.canonical(&article()), &article());
    }

    #[test]
    fn test_alias_canonical_survives_cycles() {
        let resolver = AliasResolver::new([(draft(), article()), (article(), draft())]);
        // Terminates rather than looping forever.
        let _ = resolver.canonical(&draft());
    }

    #[tokio::test]
    async fn test_alias_resolver_maps_to_concrete_type() {
        let backend = MemoryBackend::new();
        let resolver = ContentTypeResolver::new(
            Arc::new(AliasResolver::new([(draft(), article())])),
            Arc::new(backend.clone()),
            Arc::new(ContentTypeCache::new()),
        );

        let concrete = resolver.resolve(&article()).await.unwrap();
        let aliased = resolver.resolve(&draft()).await.unwrap();
        assert_eq!(concrete, aliased);
    }

    #[tokio::test]
    async fn test_registry_resolver_keeps_alias_distinct() {
        let backend = MemoryBackend::new();
        let resolver = ContentTypeResolver::new(
            Arc::new(RegistryResolver),
            Arc::new(backend.clone()),
            Arc::new(ContentTypeCache::new()),
        );

        let concrete = resolver.resolve(&article()).await.unwrap();
        let other = resolver.resolve(&draft()).await.unwrap();
        assert_ne!(concrete.id, other.id);
    }

    #[tokio::test]
    async fn test_resolve_cached_memoizes_hits_only() {
        let backend = MemoryBackend::new();
        let cache = Arc::new(ContentTypeCache::new());
        let resolver = ContentTypeResolver::new(
            Arc::new(RegistryResolver),
            Arc::new(backend.clone()),
            Arc::clone(&cache),
        );

        assert!(resolver
            .resolve_cached("articles", "edit")
            .await
            .unwrap()
            .is_none());
        assert!(cache.is_empty());

        backend.create_permission(&article(), "edit", "Can edit").await;
        let found = resolver
            .resolve_cached("articles", "edit")
            .await
            .unwrap()
            .expect("defined now");
        assert_eq!(found.model, "article");
        assert!(cache.codename("articles", "edit").is_some());
    }
}
