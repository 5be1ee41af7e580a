//! Boundary to the durable key-value store.
//!
//! The engine never assumes a write has completed until the returned future
//! resolves. In-memory stores stay authoritative for the session; a failed
//! write is retried by the next save.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Namespaces owned by the engine. Callers may use any other namespace
/// (e.g. for type definitions); the engine never touches those.
pub mod namespaces {
    pub const TERRAIN_CURRENT: &str = "terrain-current";
    pub const ENVIRONMENT_CURRENT: &str = "environment-current";
    pub const UNDO_LOG: &str = "undo-log";
    pub const REDO_LOG: &str = "redo-log";
}

/// Keys used inside the engine's namespaces.
pub mod keys {
    /// Live state, written through after every committed gesture.
    pub const CURRENT: &str = "current";
    /// Consolidation base state.
    pub const BASE: &str = "base";
    /// A history stack, most-recent-first.
    pub const STACK: &str = "stack";
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write to {namespace}/{key} rejected: {message}")]
    Rejected {
        namespace: String,
        key: String,
        message: String,
    },

    #[error("Stored value at {namespace}/{key} is malformed: {source}")]
    Malformed {
        namespace: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Value could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Namespaced async key-value durable store.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, PersistenceError>;
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), PersistenceError>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<(), PersistenceError>;
    async fn clear(&self, namespace: &str) -> Result<(), PersistenceError>;
}

/// Read and decode a typed value.
pub async fn load<T, G>(gateway: &G, namespace: &str, key: &str) -> Result<Option<T>, PersistenceError>
where
    T: serde::de::DeserializeOwned,
    G: PersistenceGateway + ?Sized,
{
    match gateway.get(namespace, key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| PersistenceError::Malformed {
                namespace: namespace.to_string(),
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a typed value.
pub async fn store<T, G>(gateway: &G, namespace: &str, key: &str, value: &T) -> Result<(), PersistenceError>
where
    T: serde::Serialize + ?Sized,
    G: PersistenceGateway + ?Sized,
{
    let value = serde_json::to_value(value)?;
    gateway.put(namespace, key, value).await
}

/// In-process gateway. Writes can be made to fail to exercise recovery
/// paths.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    data: Mutex<HashMap<String, HashMap<String, Value>>>,
    fail_writes: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every `put`, `delete` and `clear` is rejected.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, namespace: &str, key: &str) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Rejected {
                namespace: namespace.to_string(),
                key: key.to_string(),
                message: "writes disabled".to_string(),
            });
        }
        Ok(())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Value>>>, PersistenceError>
    {
        self.data
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))
    }

    /// Keys stored under a namespace, sorted.
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let Ok(data) = self.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let data = self.lock()?;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.check_writable(namespace, key)?;
        let mut data = self.lock()?;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), PersistenceError> {
        self.check_writable(namespace, key)?;
        let mut data = self.lock()?;
        if let Some(ns) = data.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), PersistenceError> {
        self.check_writable(namespace, "*")?;
        let mut data = self.lock()?;
        data.remove(namespace);
        Ok(())
    }
}
