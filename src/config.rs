//! Process configuration read from the environment

use crate::llm::DEFAULT_BASE_URL;

/// Browser local-storage quota the durable store emulates, in characters
pub const DEFAULT_STORE_CAPACITY: usize = 5_000_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub port: u16,
    pub store_capacity: usize,
    pub model: String,
    pub base_url: String,
    /// Fallback credential; a key saved through settings wins
    pub openai_api_key: Option<String>,
    pub user: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = lookup("PROMPTCRAFT_DB_PATH").unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.promptcraft/store.db")
        });

        let port = lookup("PROMPTCRAFT_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let store_capacity = lookup("PROMPTCRAFT_STORE_CAPACITY")
            .and_then(|c| c.parse().ok())
            .unwrap_or(DEFAULT_STORE_CAPACITY);

        Self {
            db_path,
            port,
            store_capacity,
            model: lookup("PROMPTCRAFT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            openai_api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            user: lookup("PROMPTCRAFT_USER")
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| "local".to_string()),
        }
    }
}
