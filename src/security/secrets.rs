//! Secret providers.
//!
//! # Responsibilities
//! - Resolve credentials by identifier (`get(id) -> value`)
//! - Seed from configuration or read from the environment
//!
//! # Design Decisions
//! - Lookups are lock-free for readers (`DashMap`)
//! - Missing secrets are `None`, never an empty string

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

/// Source of credentials consumed by authentication.
pub trait SecretProvider: Send + Sync + 'static {
    fn get(&self, id: &str) -> Option<String>;
}

impl<T: SecretProvider + ?Sized> SecretProvider for Arc<T> {
    fn get(&self, id: &str) -> Option<String> {
        (**self).get(id)
    }
}

/// In-memory secrets, typically seeded from the `[secrets]` config table.
#[derive(Clone, Default)]
pub struct StaticSecrets {
    inner: Arc<DashMap<String, String>>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(id.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<HashMap<String, String>> for StaticSecrets {
    fn from(map: HashMap<String, String>) -> Self {
        let secrets = Self::new();
        for (id, value) in map {
            secrets.insert(id, value);
        }
        secrets
    }
}

impl SecretProvider for StaticSecrets {
    fn get(&self, id: &str) -> Option<String> {
        self.inner.get(id).map(|r| r.value().clone())
    }
}

/// Secrets read from environment variables: `admin_token` with prefix
/// `RPC_` resolves `RPC_ADMIN_TOKEN`.
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id.to_ascii_uppercase())
    }
}

impl SecretProvider for EnvSecrets {
    fn get(&self, id: &str) -> Option<String> {
        std::env::var(self.var_name(id))
            .ok()
            .filter(|v| !v.is_empty())
    }
}

/// Tries each provider in order.
pub struct ChainedSecrets {
    providers: Vec<Arc<dyn SecretProvider>>,
}

impl ChainedSecrets {
    pub fn new(providers: Vec<Arc<dyn SecretProvider>>) -> Self {
        Self { providers }
    }
}

impl SecretProvider for ChainedSecrets {
    fn get(&self, id: &str) -> Option<String> {
        self.providers.iter().find_map(|p| p.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_secrets() {
        let secrets = StaticSecrets::from(HashMap::from([(
            "api_token".to_string(),
            "s3cret".to_string(),
        )]));
        assert_eq!(secrets.get("api_token").as_deref(), Some("s3cret"));
        assert!(secrets.get("missing").is_none());
        assert_eq!(secrets.len(), 1);
    }

    #[test]
    fn test_env_var_name() {
        let env = EnvSecrets::new("RPC_");
        assert_eq!(env.var_name("api_token"), "RPC_API_TOKEN");
        assert!(env.get("surely_not_set_anywhere_42").is_none());
    }

    #[test]
    fn test_chained_lookup_order() {
        let first = StaticSecrets::new();
        first.insert("a", "from-first");
        let second = StaticSecrets::new();
        second.insert("a", "from-second");
        second.insert("b", "only-second");

        let chained = ChainedSecrets::new(vec![Arc::new(first), Arc::new(second)]);
        assert_eq!(chained.get("a").as_deref(), Some("from-first"));
        assert_eq!(chained.get("b").as_deref(), Some("only-second"));
        assert!(chained.get("c").is_none());
    }
}
