//! # In-Memory Store
//!
//! Keep string values by key behind a single read/write lock. Values are the
//! exact text clients sent; only `merge` looks inside them.
//!
//! ## Design Principles
//!
//! 1. **Opaque Values**: `get`, `insert` and `delete` never parse the stored text.
//! 2. **Shallow Merge**: `merge` overlays top-level fields of one JSON object
//!    onto another and rejects anything that is not an object.
//! 3. **Short Critical Sections**: Parsing happens before the write lock is
//!    taken where possible.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors reported back to clients as the response `error` text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Missing value")]
    MissingValue,
    #[error("Merge requires JSON object values")]
    NotAnObject,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe key/value map used by the development server.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored text for `key`.
    pub fn get(&self, key: &str) -> StoreResult<String> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Inserts or replaces `key`.
    pub fn insert(&self, key: &str, value: String) {
        self.entries.write().insert(key.to_string(), value);
    }

    /// Merges the top-level fields of `patch` into the object stored at `key`.
    ///
    /// Fields present in `patch` win; every other stored field is kept.
    pub fn merge(&self, key: &str, patch: &str) -> StoreResult<()> {
        let patch = parse_object(patch)?;

        let mut entries = self.entries.write();
        let stored = entries.get_mut(key).ok_or(StoreError::NotFound)?;
        let mut merged = parse_object(stored)?;
        merged.extend(patch);
        *stored = Value::Object(merged).to_string();
        Ok(())
    }

    /// Removes `key`.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn parse_object(text: &str) -> StoreResult<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(StoreError::NotAnObject),
    }
}
