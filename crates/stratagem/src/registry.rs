//! Strategy catalog — which bypass strategies may be tried per protection type.
//!
//! ## File format
//!
//! The catalog can be loaded from a JSON object mapping protection types to
//! ordered strategy-name arrays. The reserved key `"default"` replaces the
//! fallback set used for protection types the catalog does not name:
//!
//! ```json
//! {
//!   "cloudflare": ["playwright_interactive", "selenium_stealth"],
//!   "default": ["selenium_stealth"]
//! }
//! ```
//!
//! List order is meaningful: the rule-based selector breaks score ties in
//! favor of earlier entries.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::types::{EngineError, EngineResult, Strategy};

/// Reserved catalog key naming the fallback set.
const DEFAULT_KEY: &str = "default";

/// Ordered strategy catalog with a fallback set for unknown protection types.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    catalog: HashMap<String, Vec<Strategy>>,
    default_set: Vec<Strategy>,
}

impl StrategyRegistry {
    /// An empty registry with no catalog entries and no fallback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in catalog, seeded from field experience with common
    /// protection mechanisms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_all(
            "cloudflare",
            [
                "playwright_interactive",
                "selenium_stealth",
                "requests_rotating_proxy",
            ],
        );
        registry.register_all(
            "ddos_guard",
            [
                "selenium_stealth",
                "playwright_interactive",
                "requests_rotating_proxy",
            ],
        );
        registry.register_all("recaptcha", ["playwright_interactive", "selenium_stealth"]);
        registry.register_all("ip_block", ["requests_rotating_proxy", "selenium_stealth"]);
        registry.set_default(
            ["selenium_stealth", "playwright_interactive", "requests_rotating_proxy"]
                .into_iter()
                .map(Strategy::from)
                .collect(),
        );

        registry
    }

    /// Load a catalog file. The file replaces the catalog; the built-in
    /// fallback set stays unless the file carries a `"default"` key.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let parsed: HashMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
            EngineError::Config(format!("invalid catalog file {}: {e}", path.display()))
        })?;

        let mut registry = Self::new();
        registry.default_set = Self::with_defaults().default_set;

        for (protection_type, names) in parsed {
            if names.is_empty() {
                warn!("catalog entry `{protection_type}` is empty, ignoring");
                continue;
            }
            let strategies: Vec<Strategy> = names.iter().map(|n| Strategy::from(n.as_str())).collect();
            if protection_type == DEFAULT_KEY {
                registry.set_default(strategies);
            } else {
                registry.catalog.insert(protection_type, strategies);
            }
        }

        debug!(
            "loaded strategy catalog from {} ({} protection types)",
            path.display(),
            registry.catalog.len()
        );
        Ok(registry)
    }

    /// Register a strategy for a protection type, preserving insertion order.
    /// Re-registering an already listed strategy is a no-op.
    pub fn register(&mut self, protection_type: &str, strategy: Strategy) {
        let entry = self.catalog.entry(protection_type.to_string()).or_default();
        if !entry.iter().any(|s| s.name() == strategy.name()) {
            entry.push(strategy);
        }
    }

    fn register_all<'a>(&mut self, protection_type: &str, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.register(protection_type, Strategy::from(name));
        }
    }

    /// Replace the fallback set used for unlisted protection types.
    pub fn set_default(&mut self, strategies: Vec<Strategy>) {
        self.default_set = strategies;
    }

    /// Ordered candidate strategies for a protection type.
    ///
    /// Unlisted types resolve to the fallback set; the error is only
    /// reachable when the fallback set is empty too.
    pub fn strategies_for(&self, protection_type: &str) -> EngineResult<&[Strategy]> {
        if let Some(strategies) = self.catalog.get(protection_type) {
            return Ok(strategies);
        }
        if !self.default_set.is_empty() {
            debug!("no catalog entry for `{protection_type}`, using the default set");
            return Ok(&self.default_set);
        }
        Err(EngineError::UnknownProtectionType(
            protection_type.to_string(),
        ))
    }

    /// Whether a strategy is a legal choice for a protection type, after
    /// fallback resolution.
    pub fn is_registered(&self, protection_type: &str, strategy_name: &str) -> bool {
        self.strategies_for(protection_type)
            .map(|set| set.iter().any(|s| s.name() == strategy_name))
            .unwrap_or(false)
    }

    /// Number of explicitly listed protection types.
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty() && self.default_set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_catalog_resolves_known_types() {
        let registry = StrategyRegistry::with_defaults();
        let strategies = registry.strategies_for("cloudflare").unwrap();
        assert_eq!(strategies[0].name(), "playwright_interactive");
        assert_eq!(strategies.len(), 3);
    }

    #[test]
    fn test_unknown_type_falls_back_to_default_set() {
        let registry = StrategyRegistry::with_defaults();
        let strategies = registry.strategies_for("never_heard_of_it").unwrap();
        assert_eq!(strategies[0].name(), "selenium_stealth");
    }

    #[test]
    fn test_empty_registry_errors() {
        let registry = StrategyRegistry::new();
        let err = registry.strategies_for("cloudflare").unwrap_err();
        assert!(matches!(err, EngineError::UnknownProtectionType(t) if t == "cloudflare"));
    }

    #[test]
    fn test_register_preserves_order_and_dedupes() {
        let mut registry = StrategyRegistry::new();
        registry.register("custom", Strategy::from("alpha"));
        registry.register("custom", Strategy::from("beta"));
        registry.register("custom", Strategy::from("alpha"));

        let strategies = registry.strategies_for("custom").unwrap();
        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[0].name(), "alpha");
        assert_eq!(strategies[1].name(), "beta");
    }

    #[test]
    fn test_is_registered_covers_fallback() {
        let registry = StrategyRegistry::with_defaults();
        assert!(registry.is_registered("cloudflare", "selenium_stealth"));
        assert!(!registry.is_registered("cloudflare", "made_up"));
        // Unlisted type resolves through the default set.
        assert!(registry.is_registered("mystery", "selenium_stealth"));
    }

    #[test]
    fn test_from_file_replaces_catalog_and_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strategies.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"akamai": ["playwright_interactive"], "default": ["requests_rotating_proxy"], "empty": []}}"#
        )
        .unwrap();

        let registry = StrategyRegistry::from_file(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.strategies_for("akamai").unwrap()[0].name(),
            "playwright_interactive"
        );
        // "cloudflare" is not in the file, so it resolves via the file's default set.
        assert_eq!(
            registry.strategies_for("cloudflare").unwrap()[0].name(),
            "requests_rotating_proxy"
        );
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("strategies.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            StrategyRegistry::from_file(&path),
            Err(EngineError::Config(_))
        ));
    }
}
