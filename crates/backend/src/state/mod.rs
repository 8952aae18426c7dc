//! Durable actor state
//!
//! Every actor persists one JSON document under its address key. Stores are
//! shared by all actors of a node; an actor only ever touches its own key.

mod file;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use file::FileStateStore;

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("state I/O failed for '{key}': {source}")]
  Io {
    key: String,
    #[source]
    source: std::io::Error,
  },
  #[error("state for '{key}' is not valid: {source}")]
  Serde {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
  async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

  async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

  async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl dyn StateStore {
  /// Load and deserialize the state stored under `key`
  pub async fn load_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
    match self.load(key).await? {
      Some(value) => serde_json::from_value(value).map(Some).map_err(|source| StoreError::Serde {
        key: key.to_string(),
        source,
      }),
      None => Ok(None),
    }
  }

  pub async fn save_as<T: Serialize + Sync>(&self, key: &str, state: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(state).map_err(|source| StoreError::Serde {
      key: key.to_string(),
      source,
    })?;
    self.save(key, value).await
  }
}

/// Non-durable store, for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStateStore {
  entries: DashMap<String, serde_json::Value>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
    keys.sort();
    keys
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
    Ok(self.entries.get(key).map(|v| v.value().clone()))
  }

  async fn save(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
    self.entries.insert(key.to_string(), value);
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), StoreError> {
    self.entries.remove(key);
    Ok(())
  }
}
