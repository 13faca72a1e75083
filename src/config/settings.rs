use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub history: HistoryConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub services: ServicesConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Upper bound on the number of turns in any history view
    pub max_turns: usize,
    pub cache_ttl_seconds: u64,
    /// Applied to every individual store and cache call
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file, or ":memory:"
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub url: String,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub rag_url: String,
    pub llm_url: String,
    pub llm_model: String,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    pub max_similar_docs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Variable names used by earlier deployments, applied after everything else.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("HISTORY_MAX", "history.max_turns"),
    ("REDIS_TTL_SECONDS", "history.cache_ttl_seconds"),
    ("REDIS_URL", "cache.url"),
    ("SQLITE_PATH", "store.path"),
    ("RAG_SERVICE_URL", "services.rag_url"),
    ("LLM_SERVICE_URL", "services.llm_url"),
    ("LLM_MODEL", "services.llm_model"),
    ("REQUEST_TIMEOUT_SECONDS", "services.request_timeout_seconds"),
];

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());

        let mut builder = Self::defaults(Config::builder())?
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, env::var(var).ok())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Built-in defaults only, ignoring files and the environment.
    pub fn defaults_only() -> Result<Self, ConfigError> {
        Self::defaults(Config::builder())?.build()?.try_deserialize()
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("history.max_turns", 10)?
            .set_default("history.cache_ttl_seconds", 3600)?
            .set_default("history.operation_timeout_ms", 2000)?
            .set_default("store.path", "data/history.db")?
            .set_default("cache.backend", "redis")?
            .set_default("cache.url", "redis://:redis@127.0.0.1:6379/0")?
            .set_default("cache.key_prefix", "chat-history")?
            .set_default("services.rag_url", "http://localhost:8001")?
            .set_default("services.llm_url", "http://localhost:8888")?
            .set_default("services.llm_model", "mock-llm")?
            .set_default("services.request_timeout_seconds", 15)?
            .set_default("services.max_retries", 3)?
            .set_default("services.max_similar_docs", 3)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("logging.level", "info")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.history.max_turns == 0 {
            return Err(ConfigError::Message(
                "history.max_turns must be at least 1".to_string(),
            ));
        }
        if self.history.cache_ttl_seconds == 0 {
            return Err(ConfigError::Message(
                "history.cache_ttl_seconds must be at least 1".to_string(),
            ));
        }
        if self.history.operation_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "history.operation_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn llm_api_key() -> Option<String> {
        env::var("LLM_API_KEY").ok().filter(|key| !key.trim().is_empty())
    }
}

impl HistoryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl ServicesConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}
