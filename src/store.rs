//! Persistent store adapter
//!
//! A capacity-bounded synchronous key-value store. Callers never see backend
//! errors: `save` reports `bool`, `load` treats anything unreadable as absent.

mod keys;
mod memory;
mod sqlite;

pub use keys::StoreKey;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const CAPACITY_WARNING: &str =
    "저장 공간이 부족하여 첨부 파일 원본을 저장하지 못했습니다. 대화 내용은 유지되지만 새로고침 후 일부 첨부 파일을 다시 업로드해야 할 수 있습니다.";
pub const SAVE_FAILED_WARNING: &str =
    "저장 공간이 가득 차 최근 변경 사항을 저장하지 못했습니다. 이전에 저장된 대화는 그대로 유지됩니다.";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage quota exceeded: {needed} chars needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Raw string key-value backend with a capacity measured in characters
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Fails with `QuotaExceeded` without touching the previous value
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key)
    }
}

/// Character count used for quota accounting
pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Typed JSON adapter over a key-value backend
pub struct DurableStore {
    backend: Arc<dyn KeyValueStore>,
    warnings: Mutex<Vec<String>>,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Serialize and write in one step. Returns false on any failure.
    pub fn save<T: Serialize + ?Sized>(&self, key: &StoreKey, value: &T) -> bool {
        match self.try_save(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Store write failed");
                false
            }
        }
    }

    fn try_save<T: Serialize + ?Sized>(&self, key: &StoreKey, value: &T) -> StoreResult<()> {
        let serialized = serde_json::to_string(value)?;
        self.backend.set(&key.to_string(), &serialized)
    }

    /// Full write first; on a capacity failure, build the degraded form and
    /// retry once. If that also fails, queue one warning and leave the last
    /// successful write in place.
    pub fn save_degradable<T, F>(&self, key: &StoreKey, value: &T, degrade: F) -> bool
    where
        T: Serialize,
        F: FnOnce(&T) -> T,
    {
        match self.try_save(key, value) {
            Ok(()) => return true,
            Err(StoreError::QuotaExceeded { needed, available }) => {
                tracing::warn!(key = %key, needed, available, "Store full, retrying without attachment payloads");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Store write failed");
                self.warn(SAVE_FAILED_WARNING);
                return false;
            }
        }

        let degraded = degrade(value);
        match self.try_save(key, &degraded) {
            Ok(()) => {
                self.warn(CAPACITY_WARNING);
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Degraded store write failed, keeping last successful write");
                self.warn(SAVE_FAILED_WARNING);
                false
            }
        }
    }

    /// Read and deserialize. Missing, unreadable and malformed values all
    /// come back as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &StoreKey) -> Option<T> {
        let raw = match self.backend.get(&key.to_string()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Store read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Malformed stored value, treating as absent");
                None
            }
        }
    }

    pub fn remove(&self, key: &StoreKey) -> bool {
        match self.backend.remove(&key.to_string()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Store remove failed");
                false
            }
        }
    }

    /// Queue a user-visible warning unless an identical one is pending
    pub fn warn(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            if !warnings.iter().any(|w| w == message) {
                warnings.push(message.to_string());
            }
        }
    }

    /// Drain pending warnings
    pub fn take_warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }
}
