//! Object permission checker.
//!
//! An [`ObjectPermissionChecker`] answers permission questions for one
//! subject. For a user, the answer is the union of grants held directly and
//! grants held by any group the user belongs to. There is no precedence and
//! no deny rule: holding a permission through any source means holding it.
//!
//! Every lookup is memoized per checker. [`ObjectPermissionChecker::prefetch_perms`]
//! warms the memo for a whole batch of objects with one read per grant
//! table, after which checks on those objects touch no storage.
//!
//! Checks never fail for "no permission" cases: unsaved targets and unknown
//! codenames are simply not held. Only storage failures surface as errors.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use warden_common::{ContentType, PermRef, Subject, Target};

use crate::engine::Engine;
use crate::error::Result;
use crate::store::{GrantFilter, ObjectMatch, SubjectFilter};

/// Codenames held on one object, split by source.
#[derive(Debug, Clone, Default)]
struct Held {
    /// Grants whose subject is the checker's subject itself.
    direct: BTreeSet<String>,
    /// Grants reached through group membership (users only).
    via_groups: BTreeSet<String>,
}

impl Held {
    fn contains(&self, codename: &str) -> bool {
        self.direct.contains(codename) || self.via_groups.contains(codename)
    }

    fn all(&self) -> BTreeSet<String> {
        self.direct.union(&self.via_groups).cloned().collect()
    }
}

/// `(content type id, object pk)`
type CacheKey = (i32, String);

/// Per-subject permission checker with a prefetch cache.
pub struct ObjectPermissionChecker {
    subject: Subject,
    engine: Arc<Engine>,
    cache: HashMap<CacheKey, Held>,
}

impl ObjectPermissionChecker {
    pub(crate) fn new(subject: Subject, engine: Arc<Engine>) -> Self {
        Self {
            subject,
            engine,
            cache: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn subject(&self) -> Subject {
        self.subject
    }

    /// Whether the subject holds `perm` on `target`.
    ///
    /// `perm` is a codename, optionally qualified as `app_label.codename`.
    /// A qualified permission from another app is not held.
    #[tracing::instrument(skip(self, target), fields(subject = %self.subject))]
    pub async fn has_perm(&mut self, perm: &str, target: &(impl Target + Sync)) -> Result<bool> {
        let Some(pk) = target.object_pk() else {
            return Ok(false);
        };
        let perm = PermRef::from(perm);
        let content_type = self.engine.resolver.resolve(&target.model_key()).await?;

        if let Some(app_label) = perm.app_label() {
            if !self
                .app_label_matches(app_label, perm.codename(), &content_type)
                .await?
            {
                return Ok(false);
            }
        }

        let held = self.held(&content_type, pk).await?;
        Ok(held.contains(perm.codename()))
    }

    /// Every codename the subject holds on `target`, direct and inherited.
    pub async fn get_perms(&mut self, target: &(impl Target + Sync)) -> Result<BTreeSet<String>> {
        Ok(self.lookup(target).await?.map(|held| held.all()).unwrap_or_default())
    }

    /// Codenames granted to the subject itself. Empty for group checkers.
    pub async fn get_user_perms(
        &mut self,
        target: &(impl Target + Sync),
    ) -> Result<BTreeSet<String>> {
        if !matches!(self.subject, Subject::User(_)) {
            return Ok(BTreeSet::new());
        }
        Ok(self.lookup(target).await?.map(|held| held.direct).unwrap_or_default())
    }

    /// Codenames held through groups: the group's own grants for a group
    /// checker, or the grants of every group a user belongs to.
    pub async fn get_group_perms(
        &mut self,
        target: &(impl Target + Sync),
    ) -> Result<BTreeSet<String>> {
        let is_group = matches!(self.subject, Subject::Group(_));
        Ok(self
            .lookup(target)
            .await?
            .map(|held| if is_group { held.direct } else { held.via_groups })
            .unwrap_or_default())
    }

    /// Load grants for every persisted object in `targets` into the cache.
    ///
    /// Issues one read per grant table involved, regardless of how many
    /// objects are passed. Objects with no grants are cached as empty.
    #[tracing::instrument(skip(self, targets), fields(subject = %self.subject, count = targets.len()))]
    pub async fn prefetch_perms<T: Target + Sync>(&mut self, targets: &[T]) -> Result<()> {
        let mut by_model: HashMap<_, Vec<String>> = HashMap::new();
        for target in targets {
            if let Some(pk) = target.object_pk() {
                by_model.entry(target.model_key()).or_default().push(pk);
            }
        }

        for (model, mut pks) in by_model {
            let content_type = self.engine.resolver.resolve(&model).await?;
            pks.sort_unstable();
            pks.dedup();

            let mut fetched = self.fetch(&content_type, ObjectMatch::Any(pks.clone())).await?;
            for pk in pks {
                let held = fetched.remove(&pk).unwrap_or_default();
                self.cache.insert((content_type.id, pk), held);
            }
        }

        tracing::debug!(cached = self.cache.len(), "Prefetched object permissions");
        Ok(())
    }

    /// Forget everything cached so far.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    async fn lookup(&mut self, target: &(impl Target + Sync)) -> Result<Option<Held>> {
        let Some(pk) = target.object_pk() else {
            return Ok(None);
        };
        let content_type = self.engine.resolver.resolve(&target.model_key()).await?;
        self.held(&content_type, pk).await.map(Some)
    }

    async fn held(&mut self, content_type: &ContentType, pk: String) -> Result<Held> {
        let key = (content_type.id, pk);
        if let Some(held) = self.cache.get(&key) {
            return Ok(held.clone());
        }

        let mut fetched = self
            .fetch(content_type, ObjectMatch::One(key.1.clone()))
            .await?;
        let held = fetched.remove(&key.1).unwrap_or_default();
        self.cache.insert(key, held.clone());
        Ok(held)
    }

    /// Read grants for `objects` from storage, keyed by object pk.
    async fn fetch(
        &self,
        content_type: &ContentType,
        objects: ObjectMatch,
    ) -> Result<HashMap<String, Held>> {
        let model = content_type.model_key();
        let filter = |subject: SubjectFilter| GrantFilter {
            subject,
            permission: None,
            content_type_id: content_type.id,
            objects: objects.clone(),
        };

        let (direct, via_groups) = match self.subject {
            Subject::User(user_id) => {
                let own = filter(SubjectFilter::Exact(self.subject));
                let inherited = filter(SubjectFilter::GroupsOf(user_id));
                let users = self.engine.users.for_model(&model);
                let groups = self.engine.groups.for_model(&model);
                futures::try_join!(users.codenames(&own), groups.codenames(&inherited))?
            }
            Subject::Group(_) => {
                let own = filter(SubjectFilter::Exact(self.subject));
                let groups = self.engine.groups.for_model(&model);
                (groups.codenames(&own).await?, Vec::new())
            }
        };

        let mut out: HashMap<String, Held> = HashMap::new();
        for (pk, codename) in direct {
            out.entry(pk).or_default().direct.insert(codename);
        }
        for (pk, codename) in via_groups {
            out.entry(pk).or_default().via_groups.insert(codename);
        }
        Ok(out)
    }

    /// A qualified permission only applies if its app defines it for this type.
    ///
    /// When the codename is unknown or ambiguous within the app, fall back to
    /// comparing app labels.
    async fn app_label_matches(
        &self,
        app_label: &str,
        codename: &str,
        content_type: &ContentType,
    ) -> Result<bool> {
        let defined_on = self
            .engine
            .resolver
            .resolve_cached(app_label, codename)
            .await?;
        Ok(match defined_on {
            Some(defining) => defining.id == content_type.id,
            None => content_type.app_label == app_label,
        })
    }
}
