//! Cache naming.

use serde::{Deserialize, Serialize};

/// Parts used to build cache names: `{prefix}-{name}-{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNameDetails {
    pub prefix: String,
    pub precache: String,
    pub runtime: String,
    /// Usually the registration scope.
    pub suffix: String,
}

impl Default for CacheNameDetails {
    fn default() -> Self {
        Self {
            prefix: "workbox".to_string(),
            precache: "precache-v2".to_string(),
            runtime: "runtime".to_string(),
            suffix: String::new(),
        }
    }
}

impl CacheNameDetails {
    /// Defaults with the given scope as suffix.
    pub fn for_scope(scope: impl Into<String>) -> Self {
        Self {
            suffix: scope.into(),
            ..Default::default()
        }
    }

    /// Join the non-empty parts around `name`.
    pub fn create(&self, name: &str) -> String {
        [self.prefix.as_str(), name, self.suffix.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn precache_name(&self) -> String {
        self.create(&self.precache)
    }

    pub fn runtime_name(&self) -> String {
        self.create(&self.runtime)
    }

    /// `user_name` if given, otherwise the precache name.
    pub fn precache_name_or(&self, user_name: Option<&str>) -> String {
        match user_name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.precache_name(),
        }
    }
}
