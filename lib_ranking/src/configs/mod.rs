//! Service configuration.

pub mod settings;

pub use settings::{
    ConfigError, KafkaSettings, LeaderboardSettings, PostgresSettings, RedisSettings,
    ServerSettings, Settings, SyncSettings,
};
