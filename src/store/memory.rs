//! In-memory backend with a character quota

use super::{char_len, KeyValueStore, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    capacity_chars: usize,
}

impl MemoryStore {
    pub fn new(capacity_chars: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity_chars,
        }
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.lock()?;
        let used: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| char_len(k) + char_len(v))
            .sum();
        let needed = char_len(key) + char_len(value);
        let available = self.capacity_chars.saturating_sub(used);
        if needed > available {
            return Err(StoreError::QuotaExceeded { needed, available });
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
