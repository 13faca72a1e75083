mod settings;

pub use settings::{
    CacheBackend, CacheConfig, HistoryConfig, LoggingConfig, ServerConfig, ServicesConfig,
    Settings, StoreConfig,
};
