//! Host configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use event_store::SubscriptionSettings;
use projections::DEFAULT_MAX_CONFLICT_RETRIES;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}`")),
        }
    }
}

/// Host configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `PROJECTION_GROUP`: subscription group name (default: `"wallet-projection"`)
/// - `PROJECTION_WORKERS`: competing consumers in the group (default: `4`)
/// - `DATABASE_URL`: PostgreSQL event log and read store; a private in-memory log when unset
/// - `METRICS_ADDR`: Prometheus listener (default: `"0.0.0.0:9000"`)
/// - `MAX_CONFLICT_RETRIES`: conditional-write retries per event (default: `3`)
/// - `MAX_DELIVERY_RETRIES`: redeliveries before an event is parked (default: `10`)
/// - `POLL_INTERVAL_MS`: idle subscription poll interval (default: `250`)
/// - `ACK_TIMEOUT_SECS`: lease on an unsettled delivery (default: `30`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub group: String,
    pub workers: usize,
    pub database_url: Option<String>,
    pub metrics_addr: String,
    pub max_conflict_retries: u32,
    pub max_delivery_retries: u32,
    pub poll_interval: Duration,
    pub ack_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            group: lookup("PROJECTION_GROUP")
                .filter(|g| !g.is_empty())
                .unwrap_or(defaults.group),
            workers: parse_var::<usize>(&lookup, "PROJECTION_WORKERS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.workers),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            metrics_addr: lookup("METRICS_ADDR").unwrap_or(defaults.metrics_addr),
            max_conflict_retries: parse_var(&lookup, "MAX_CONFLICT_RETRIES")
                .unwrap_or(defaults.max_conflict_retries),
            max_delivery_retries: parse_var(&lookup, "MAX_DELIVERY_RETRIES")
                .unwrap_or(defaults.max_delivery_retries),
            poll_interval: parse_var::<u64>(&lookup, "POLL_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            ack_timeout: parse_var::<u64>(&lookup, "ACK_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.ack_timeout),
        }
    }

    /// Settings every worker joins its subscription group with.
    pub fn subscription_settings(&self) -> SubscriptionSettings {
        SubscriptionSettings {
            max_retries: self.max_delivery_retries,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            group: "wallet-projection".to_string(),
            workers: 4,
            database_url: None,
            metrics_addr: "0.0.0.0:9000".to_string(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            max_delivery_retries: SubscriptionSettings::default().max_retries,
            poll_interval: Duration::from_millis(250),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.group, "wallet-projection");
        assert_eq!(config.workers, 4);
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.max_delivery_retries, 10);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.ack_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        assert_eq!(Config::from_lookup(lookup(&[])), Config::default());
    }

    #[test]
    fn test_reads_every_key() {
        let config = Config::from_lookup(lookup(&[
            ("RUST_LOG", "debug,sqlx=warn"),
            ("LOG_FORMAT", "JSON"),
            ("PROJECTION_GROUP", "wallets-v2"),
            ("PROJECTION_WORKERS", "8"),
            ("DATABASE_URL", "postgres://localhost/wallets"),
            ("METRICS_ADDR", "127.0.0.1:9100"),
            ("MAX_CONFLICT_RETRIES", "5"),
            ("MAX_DELIVERY_RETRIES", "2"),
            ("POLL_INTERVAL_MS", "50"),
            ("ACK_TIMEOUT_SECS", "5"),
        ]));

        assert_eq!(config.log_level, "debug,sqlx=warn");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.group, "wallets-v2");
        assert_eq!(config.workers, 8);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/wallets"));
        assert_eq!(config.metrics_addr, "127.0.0.1:9100");
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.subscription_settings().max_retries, 2);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.ack_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("LOG_FORMAT", "xml"),
            ("PROJECTION_WORKERS", "0"),
            ("MAX_CONFLICT_RETRIES", "lots"),
            ("DATABASE_URL", ""),
            ("POLL_INTERVAL_MS", "0"),
            ("ACK_TIMEOUT_SECS", "-1"),
        ]));

        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.database_url, None);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.ack_timeout, Duration::from_secs(30));
    }
}
