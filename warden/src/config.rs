//! Engine Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Context, Result};
use std::env;

use warden_common::ModelKey;

/// Default number of rows written per bulk insert statement.
pub const DEFAULT_BULK_BATCH_SIZE: usize = 500;

/// Which strategy turns a model into its content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverStrategy {
    /// Ask the type registry directly.
    #[default]
    Registry,
    /// Canonicalize aliased (proxy) models first, then ask the registry.
    Alias,
}

impl ResolverStrategy {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "registry" | "default" => Ok(Self::Registry),
            "alias" | "proxy" => Ok(Self::Alias),
            other => bail!("Unknown content type resolver '{other}'"),
        }
    }
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection URL. `None` selects the in-memory backend.
    pub database_url: Option<String>,

    /// Maximum pooled database connections (default: 10)
    pub db_max_connections: u32,

    /// Content type resolution strategy (default: registry)
    pub resolver: ResolverStrategy,

    /// Alias model -> concrete model, used by [`ResolverStrategy::Alias`]
    pub model_aliases: Vec<(ModelKey, ModelKey)>,

    /// Rows per bulk insert statement (default: 500)
    pub bulk_batch_size: usize,
}

/// Default maximum pooled database connections.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

impl Default for Config {
    /// The values `from_env` falls back to when nothing is set.
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            resolver: ResolverStrategy::default(),
            model_aliases: Vec::new(),
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honoured if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let resolver = match env::var("WARDEN_CONTENT_TYPE_RESOLVER") {
            Ok(value) => ResolverStrategy::parse(&value)?,
            Err(_) => ResolverStrategy::default(),
        };

        let model_aliases = match env::var("WARDEN_MODEL_ALIASES") {
            Ok(value) => parse_aliases(&value).context("WARDEN_MODEL_ALIASES is malformed")?,
            Err(_) => Vec::new(),
        };

        let bulk_batch_size = env::var("WARDEN_BULK_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|size: &usize| *size > 0)
            .unwrap_or(DEFAULT_BULK_BATCH_SIZE);

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            db_max_connections: env::var("WARDEN_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
            resolver,
            model_aliases,
            bulk_batch_size,
        })
    }

    /// In-memory configuration for tests.
    #[must_use]
    pub const fn default_for_test() -> Self {
        Self {
            database_url: None,
            db_max_connections: 2,
            resolver: ResolverStrategy::Registry,
            model_aliases: Vec::new(),
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
        }
    }

    /// Check if a database is configured.
    #[must_use]
    pub const fn has_database(&self) -> bool {
        self.database_url.is_some()
    }
}

/// Parse `app.proxy=app.concrete,app.other=app.concrete`.
fn parse_aliases(value: &str) -> Result<Vec<(ModelKey, ModelKey)>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> Result<(ModelKey, ModelKey)> {
            let (alias, concrete) = pair
                .split_once('=')
                .with_context(|| format!("alias '{pair}' is missing '='"))?;
            Ok((alias.parse()?, concrete.parse()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "WARDEN_DB_MAX_CONNECTIONS",
            "WARDEN_CONTENT_TYPE_RESOLVER",
            "WARDEN_MODEL_ALIASES",
            "WARDEN_BULK_BATCH_SIZE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_parse_aliases() {
        let aliases =
            parse_aliases("articles.draft=articles.article, posts.Pinned=posts.post").unwrap();
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases[0].0, ModelKey::new("articles", "draft"));
        assert_eq!(aliases[1].1, ModelKey::new("posts", "post"));

        assert!(parse_aliases("articles.draft").is_err());
        assert!(parse_aliases("draft=articles.article").is_err());
        assert!(parse_aliases("").unwrap().is_empty());
    }

    #[test]
    fn test_resolver_strategy_parse() {
        assert_eq!(
            ResolverStrategy::parse("Registry").unwrap(),
            ResolverStrategy::Registry
        );
        assert_eq!(
            ResolverStrategy::parse("proxy").unwrap(),
            ResolverStrategy::Alias
        );
        assert!(ResolverStrategy::parse("custom").is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert!(!config.has_database());
        assert_eq!(config.resolver, ResolverStrategy::Registry);
        assert_eq!(config.bulk_batch_size, DEFAULT_BULK_BATCH_SIZE);
        assert_eq!(config.db_max_connections, 10);
    }

    #[test]
    #[serial]
    fn test_default_matches_unset_env() {
        clear_env();
        let from_env = Config::from_env().unwrap();
        let default = Config::default();

        assert_eq!(default.database_url, from_env.database_url);
        assert_eq!(default.db_max_connections, from_env.db_max_connections);
        assert_eq!(default.resolver, from_env.resolver);
        assert_eq!(default.model_aliases, from_env.model_aliases);
        assert_eq!(default.bulk_batch_size, from_env.bulk_batch_size);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("WARDEN_CONTENT_TYPE_RESOLVER", "alias");
        env::set_var("WARDEN_MODEL_ALIASES", "articles.draft=articles.article");
        env::set_var("WARDEN_BULK_BATCH_SIZE", "0");

        let config = Config::from_env().unwrap();
        assert_eq!(config.resolver, ResolverStrategy::Alias);
        assert_eq!(config.model_aliases.len(), 1);
        // Zero is rejected and falls back to the default.
        assert_eq!(config.bulk_batch_size, DEFAULT_BULK_BATCH_SIZE);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_resolver() {
        clear_env();
        env::set_var("WARDEN_CONTENT_TYPE_RESOLVER", "magic");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
