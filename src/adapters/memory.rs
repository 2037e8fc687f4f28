//! Process-local adapter implementations: an in-memory storage for tests,
//! plus env/toast/auth defaults for shells that do not need them.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{AuthHandle, Env, Storage, Toast};

/// In-memory key/value storage. Tests and headless runs use this in
/// place of localStorage / mini-program storage.
#[derive(Default)]
pub struct MemoryStorage {
    // NOTE: Using std::sync::Mutex since lock is never held across .await.
    items: Mutex<HashMap<String, String>>,
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().ok()?.get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        if let Ok(mut items) = self.items.lock() {
            items.insert(key.to_string(), value.to_string());
        }
    }

    fn remove_item(&self, key: &str) {
        if let Ok(mut items) = self.items.lock() {
            items.remove(key);
        }
    }
}

/// Env adapter reading `.env`/process environment.
#[derive(Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        let _ = dotenvy::dotenv();
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Toast that only logs. Shells without a notification surface use this.
#[derive(Default)]
pub struct NoopToast;

impl Toast for NoopToast {
    fn info(&self, message: &str, _duration_ms: u64) {
        log::info!("toast: {}", message);
    }
}

/// Auth handle for shells without a re-login flow.
#[derive(Default)]
pub struct NoopAuth;

#[async_trait::async_trait]
impl AuthHandle for NoopAuth {
    async fn sign_in_anonymously(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::default();
        assert_eq!(storage.get_item("k"), None);
        storage.set_item("k", "v");
        assert_eq!(storage.get_item("k"), Some("v".to_string()));
        storage.remove_item("k");
        assert_eq!(storage.get_item("k"), None);
    }
}
