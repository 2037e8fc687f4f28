//! Current-user lookups over storage-backed local state.
//!
//! "Logged in" means: a stored identity exists, its name is not the
//! `anonymous` sentinel, and a non-empty access token is present.

use crate::adapters::Storage;

pub const USER_INFO_STORAGE_KEY: &str = "userInfo";
pub const CREDENTIALS_STORAGE_KEY: &str = "credentials";

const ANONYMOUS_NAME: &str = "anonymous";

fn user_info(storage: &dyn Storage) -> Option<serde_json::Value> {
    let raw = storage.get_item(USER_INFO_STORAGE_KEY)?;
    serde_json::from_str(&raw).ok()
}

pub fn current_username(storage: &dyn Storage) -> Option<String> {
    user_info(storage)?
        .pointer("/content/name")?
        .as_str()
        .map(|s| s.to_string())
}

pub fn current_user_id(storage: &dyn Storage) -> Option<String> {
    user_info(storage)?
        .pointer("/content/uid")?
        .as_str()
        .map(|s| s.to_string())
}

pub fn current_token(storage: &dyn Storage) -> Option<String> {
    let raw = storage.get_item(CREDENTIALS_STORAGE_KEY)?;
    let credentials: serde_json::Value = serde_json::from_str(&raw).ok()?;
    credentials
        .get("access_token")?
        .as_str()
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

pub fn is_logged_in(storage: &dyn Storage) -> bool {
    match current_username(storage) {
        Some(name) if name != ANONYMOUS_NAME => current_token(storage).is_some(),
        _ => false,
    }
}
