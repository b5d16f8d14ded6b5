//! Key-value store
//!
//! The in-memory map the transaction log protects. The replay driver and
//! the service talk to it through [`KeyValueStore`], so other stores can be
//! plugged in.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::error::{Result, TlogError};

/// Operations the replay driver and service need from a store
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite `key`
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Current value of `key`, or [`TlogError::KeyNotFound`]
    fn get(&self, key: &str) -> Result<String>;

    /// Remove `key`; removing an absent key succeeds
    fn delete(&self, key: &str) -> Result<()>;
}

/// HashMap behind a RwLock: many concurrent readers, one writer at a time
#[derive(Default)]
pub struct MemStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Sorted copy of the current contents
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl KeyValueStore for MemStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<String> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or(TlogError::KeyNotFound)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
