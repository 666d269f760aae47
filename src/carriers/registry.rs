//! Carrier registry: carrier name → handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::carriers::handler::CarrierHandler;

/// Registry of carrier handlers.
///
/// Built once at startup and shared read-only for the rest of the run.
/// Lookups are case-insensitive.
pub struct CarrierRegistry {
    handlers: HashMap<String, Arc<dyn CarrierHandler>>,
}

impl CarrierRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own name. A later registration for the
    /// same carrier replaces the earlier one.
    pub fn register(&mut self, handler: Arc<dyn CarrierHandler>) {
        let key = normalize(handler.name());
        if self.handlers.insert(key.clone(), handler).is_some() {
            tracing::warn!(carrier = %key, "Replaced existing carrier handler");
        } else {
            tracing::debug!("Registered carrier: {}", key);
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, handler: Arc<dyn CarrierHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Look up the handler for `name`.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CarrierHandler>> {
        self.handlers.get(&normalize(name)).cloned()
    }

    /// Check if a handler exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&normalize(name))
    }

    /// Registered carrier names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CarrierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}
