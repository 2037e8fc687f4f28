//! Shared configuration loading for the chat core.
//!
//! Tuning constants (typewriter cadence, reveal step, cache TTLs) are
//! deliberately configurable; the defaults are the values the product
//! shipped with.

use std::time::Duration;

use crate::adapters::Env;

const DEFAULT_BASE_URL: &str = "https://inner-book.top";

/// Endpoint configuration for the chat backend.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl ChatConfig {
    /// Load from the env adapter.
    ///
    /// Reads `CHAT_BASE_URL` (fallback: `SERVER_URL`).
    pub fn load(env: &dyn Env) -> Self {
        let base_url = env
            .get("CHAT_BASE_URL")
            .or_else(|| env.get("SERVER_URL"))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            base_url: normalize_base_url(&base_url),
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat", self.base_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}/chat/health", self.base_url)
    }
}

fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Typewriter pacing. `step = min(ceil(remaining / catch_up_divisor) + 1, max_step)`
/// characters are revealed per tick, so a large backlog catches up fast
/// while a near-empty one reveals roughly one character per tick.
#[derive(Debug, Clone, Copy)]
pub struct TypewriterConfig {
    pub tick_interval: Duration,
    pub catch_up_divisor: usize,
    pub max_step: usize,
}

impl Default for TypewriterConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(15),
            catch_up_divisor: 10,
            max_step: 5,
        }
    }
}

impl TypewriterConfig {
    /// Reads `TYPEWRITER_TICK_MS`, `TYPEWRITER_CATCH_UP_DIVISOR`,
    /// `TYPEWRITER_MAX_STEP`.
    pub fn load(env: &dyn Env) -> Self {
        Self {
            tick_interval: Duration::from_millis(
                env_u64(env, "TYPEWRITER_TICK_MS", 15).clamp(1, 1_000),
            ),
            catch_up_divisor: env_usize(env, "TYPEWRITER_CATCH_UP_DIVISOR", 10).clamp(1, 1_000),
            max_step: env_usize(env, "TYPEWRITER_MAX_STEP", 5).clamp(1, 100),
        }
    }
}

pub(crate) fn env_u64(env: &dyn Env, key: &str, default: u64) -> u64 {
    env.get(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_usize(env: &dyn Env, key: &str, default: usize) -> usize {
    env.get(key)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapEnv(std::collections::HashMap<String, String>);

    impl Env for MapEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
    }

    fn map_env(pairs: &[(&str, &str)]) -> MapEnv {
        MapEnv(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("https://a.example/"), "https://a.example");
        assert_eq!(
            normalize_base_url("  https://a.example  "),
            "https://a.example"
        );
    }

    #[test]
    fn test_chat_config_defaults() {
        let config = ChatConfig::load(&map_env(&[]));
        assert_eq!(config.chat_url(), "https://inner-book.top/chat");
        assert_eq!(config.health_url(), "https://inner-book.top/chat/health");
    }

    #[test]
    fn test_chat_config_server_url_fallback() {
        let config = ChatConfig::load(&map_env(&[("SERVER_URL", "http://localhost:80/")]));
        assert_eq!(config.chat_url(), "http://localhost:80/chat");
    }

    #[test]
    fn test_typewriter_config_clamps() {
        let config = TypewriterConfig::load(&map_env(&[
            ("TYPEWRITER_TICK_MS", "0"),
            ("TYPEWRITER_MAX_STEP", "garbage"),
        ]));
        assert_eq!(config.tick_interval, Duration::from_millis(1));
        assert_eq!(config.max_step, 5);
        assert_eq!(config.catch_up_divisor, 10);
    }
}
