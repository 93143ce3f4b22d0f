//! YAML configuration with environment placeholder expansion.
//!
//! The file is read as a whole, `${VAR}` / `${VAR:default}` placeholders are
//! substituted from the process environment, and the result is deserialized
//! section by section. Every field has a default, so a missing file or an
//! empty document yields a fully usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config file: {0}")]
    Parse(#[from] serde_yml::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub postgres: PostgresSettings,
    pub kafka: KafkaSettings,
    pub sync: SyncSettings,
    pub leaderboard: LeaderboardSettings,
}

impl Settings {
    /// Load settings from a YAML file, expanding `${VAR:default}` first.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let expanded = expand_placeholders(&raw);
        Ok(serde_yml::from_str(&expanded)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    #[serde(deserialize_with = "de_duration")]
    pub read_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub write_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub idle_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub addr: String,
    pub password: String,
    pub db: i64,
    /// Accepted for parity with pooled clients; the multiplexed connection
    /// manager does not use them.
    pub pool_size: u32,
    pub min_idle_conns: u32,
    #[serde(deserialize_with = "de_duration")]
    pub dial_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub read_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub write_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: String::new(),
            db: 0,
            pool_size: 100,
            min_idle_conns: 10,
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
        }
    }
}

impl RedisSettings {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub min_connections: u32,
    #[serde(deserialize_with = "de_duration")]
    pub max_conn_lifetime: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub max_conn_idle_time: Duration,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "leaderboard".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 50,
            min_connections: 5,
            max_conn_lifetime: Duration::from_secs(3600),
            max_conn_idle_time: Duration::from_secs(1800),
        }
    }
}

impl PostgresSettings {
    pub fn connection_string(&self) -> String {
        let ssl_mode = if self.ssl_mode.is_empty() {
            "disable"
        } else {
            &self.ssl_mode
        };
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, ssl_mode
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub enabled: bool,
    pub batch_size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub batch_timeout: Duration,
    pub retry_attempts: u32,
    #[serde(deserialize_with = "de_duration")]
    pub retry_delay: Duration,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "leaderboard-scores".to_string(),
            group_id: "leaderboard-consumer".to_string(),
            enabled: true,
            batch_size: 100,
            batch_timeout: Duration::from_secs(1),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    #[serde(deserialize_with = "de_duration")]
    pub interval: Duration,
    pub batch_size: usize,
    pub enabled: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            batch_size: 1000,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaderboardSettings {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for LeaderboardSettings {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

/// Substitute `${VAR}` and `${VAR:default}` with values from the process
/// environment. An unset variable without a default expands to the empty
/// string. Malformed placeholders are left untouched.
pub fn expand_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) => {
                let token = &tail[..end];
                let (name, default) = match token.split_once(':') {
                    Some((n, d)) => (n, Some(d)),
                    None => (token, None),
                };
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(default.unwrap_or("")),
                }
                rest = &tail[end + 1..];
            }
            None => {
                // No closing brace: keep the remainder verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Deserialize a duration given either as integer seconds or as a suffixed
/// string (`500ms`, `10s`, `30m`, `1h`).
fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {text:?}"))?;
    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let settings: Settings = serde_yml::from_str("{}").unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.redis.addr, "localhost:6379");
        assert_eq!(settings.postgres.port, 5432);
        assert_eq!(settings.kafka.topic, "leaderboard-scores");
        assert_eq!(settings.kafka.group_id, "leaderboard-consumer");
        assert_eq!(settings.sync.interval, Duration::from_secs(1800));
        assert_eq!(settings.sync.batch_size, 1000);
        assert_eq!(settings.leaderboard.default_limit, 100);
        assert_eq!(settings.leaderboard.max_limit, 1000);
    }

    #[test]
    fn sections_override_defaults() {
        let yaml = r#"
server:
  port: 9000
  read_timeout: 2s
kafka:
  brokers: ["k1:9092", "k2:9092"]
  batch_timeout: 500ms
  enabled: false
sync:
  interval: 5m
"#;
        let settings: Settings = serde_yml::from_str(yaml).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.read_timeout, Duration::from_secs(2));
        // Untouched fields inside a present section keep their defaults.
        assert_eq!(settings.server.write_timeout, Duration::from_secs(10));
        assert_eq!(settings.kafka.brokers.len(), 2);
        assert_eq!(settings.kafka.batch_timeout, Duration::from_millis(500));
        assert!(!settings.kafka.enabled);
        assert_eq!(settings.sync.interval, Duration::from_secs(300));
    }

    #[test]
    fn duration_accepts_bare_seconds() {
        let yaml = "server:\n  idle_timeout: 120\n";
        let settings: Settings = serde_yml::from_str(yaml).unwrap();
        assert_eq!(settings.server.idle_timeout, Duration::from_secs(120));
    }

    #[test]
    fn placeholder_expansion() {
        std::env::set_var("RANKING_TEST_HOST", "db.internal");
        let expanded = expand_placeholders(
            "host: ${RANKING_TEST_HOST}\nport: ${RANKING_TEST_UNSET:5433}\nuser: ${RANKING_TEST_MISSING}\n",
        );
        assert_eq!(expanded, "host: db.internal\nport: 5433\nuser: \n");
    }

    #[test]
    fn placeholder_without_brace_is_kept() {
        assert_eq!(expand_placeholders("addr: ${OOPS"), "addr: ${OOPS");
        assert_eq!(expand_placeholders("plain text"), "plain text");
    }

    #[test]
    fn connection_strings() {
        let pg = PostgresSettings {
            user: "svc".into(),
            password: "pw".into(),
            host: "db".into(),
            port: 5432,
            database: "scores".into(),
            ssl_mode: String::new(),
            ..Default::default()
        };
        assert_eq!(
            pg.connection_string(),
            "postgres://svc:pw@db:5432/scores?sslmode=disable"
        );

        let redis = RedisSettings {
            addr: "cache:6379".into(),
            db: 2,
            ..Default::default()
        };
        assert_eq!(redis.url(), "redis://cache:6379/2");

        let redis_auth = RedisSettings {
            password: "secret".into(),
            ..Default::default()
        };
        assert_eq!(redis_auth.url(), "redis://:secret@localhost:6379/0");
    }
}
