//! Query engine capability registry.
//!
//! Optional query engines (graph traversal, document wire dialects, ...)
//! register here by name and advertise availability. The core depends only
//! on this interface; an engine that was never registered is simply
//! unavailable, which is a normal configuration state.

use std::collections::HashMap;
use std::sync::Arc;

/// A named, optionally-available query engine.
pub trait QueryEngineCapability: Send + Sync {
    /// Stable engine name, e.g. "graph" or "document".
    fn name(&self) -> &str;

    /// Whether the engine can serve requests in this deployment.
    fn is_available(&self) -> bool;
}

/// Registry of query engines, keyed by name.
#[derive(Default)]
pub struct QueryEngineRegistry {
    engines: HashMap<String, Arc<dyn QueryEngineCapability>>,
}

impl QueryEngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine, replacing any previous entry with that name.
    pub fn register(&mut self, engine: Arc<dyn QueryEngineCapability>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    /// Look up an engine by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn QueryEngineCapability>> {
        self.engines.get(name)
    }

    /// Whether a named engine is registered and available.
    pub fn is_available(&self, name: &str) -> bool {
        self.engines
            .get(name)
            .map(|e| e.is_available())
            .unwrap_or(false)
    }

    /// Names of all available engines, sorted.
    pub fn available(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .engines
            .values()
            .filter(|e| e.is_available())
            .map(|e| e.name())
            .collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine {
        name: &'static str,
        available: bool,
    }

    impl QueryEngineCapability for FixedEngine {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }
    }

    #[test]
    fn test_absent_engine_is_unavailable() {
        let registry = QueryEngineRegistry::new();
        assert!(!registry.is_available("graph"));
        assert!(registry.get("graph").is_none());
    }

    #[test]
    fn test_registered_engines() {
        let mut registry = QueryEngineRegistry::new();
        registry.register(Arc::new(FixedEngine {
            name: "graph",
            available: true,
        }));
        registry.register(Arc::new(FixedEngine {
            name: "document",
            available: false,
        }));

        assert!(registry.is_available("graph"));
        assert!(!registry.is_available("document"));
        assert_eq!(registry.available(), vec!["graph"]);
    }
}
