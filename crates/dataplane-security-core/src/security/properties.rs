//! Process-scoped properties read by third-party clients.
//!
//! Security modules write properties such as `zookeeper.sasl.clientconfig`
//! here instead of mutating global state directly. Production code shares
//! [`PropertyStore::global`]; tests create private stores so install and
//! uninstall cycles can run concurrently.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// Concurrent key/value store of ambient properties.
#[derive(Debug, Default)]
pub struct PropertyStore {
    values: DashMap<String, String>,
}

impl PropertyStore {
    /// Create an empty, private store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The store shared by the whole process.
    #[must_use]
    pub fn global() -> Arc<PropertyStore> {
        static GLOBAL: OnceLock<Arc<PropertyStore>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(PropertyStore::new())))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// Set a property, returning its previous value.
    pub fn set(&self, key: &str, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.to_string(), value.into())
    }

    /// Remove a property, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.remove(key).map(|(_, v)| v)
    }

    /// Put a property back to a previously captured state; `None` unsets it.
    pub fn restore(&self, key: &str, prior: Option<String>) {
        match prior {
            Some(value) => {
                self.set(key, value);
            }
            None => {
                self.remove(key);
            }
        }
    }
}
