use crate::mqtt::WorkerConfig;
use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_topic: String,
    pub mqtt_client_id: String,
    pub mqtt_reconnect_attempts: u32,
    pub channel_capacity: usize,
    pub shutdown_timeout_secs: u64,
    pub http_addr: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset or blank keys take their
    /// default; set but malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = get("DATABASE_URL").context("DATABASE_URL is required")?;

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("LOG_FORMAT must be \"text\" or \"json\", got {:?}", other),
        };

        let config = Self {
            database_url,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 20)?,
            mqtt_broker: get("MQTT_BROKER").unwrap_or_else(|| "localhost".to_string()),
            mqtt_port: parse_or(&get, "MQTT_PORT", 1883)?,
            mqtt_keepalive_secs: parse_or(&get, "MQTT_KEEPALIVE_SECS", 60)?,
            mqtt_topic: get("MQTT_TOPIC").unwrap_or_else(|| "factory/+/sensors".to_string()),
            mqtt_client_id: get("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("ingestor-{}", uuid::Uuid::new_v4())),
            mqtt_reconnect_attempts: parse_or(&get, "MQTT_RECONNECT_ATTEMPTS", 5)?,
            channel_capacity: parse_or(&get, "CHANNEL_CAPACITY", 1024)?,
            shutdown_timeout_secs: parse_or(&get, "SHUTDOWN_TIMEOUT_SECS", 5)?,
            http_addr: get("HTTP_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            log_format,
        };

        if config.channel_capacity == 0 {
            bail!("CHANNEL_CAPACITY must be greater than zero");
        }
        if config.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than zero");
        }

        Ok(config)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            broker: self.mqtt_broker.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            topic: self.mqtt_topic.clone(),
            keep_alive: self.mqtt_keepalive(),
            channel_capacity: self.channel_capacity,
            reconnect_attempts: self.mqtt_reconnect_attempts,
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    /// Database URL without credentials, for logging.
    pub fn redacted_database_url(&self) -> &str {
        self.database_url
            .rsplit_once('@')
            .map(|(_, host)| host)
            .unwrap_or("***")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://iot:pass@db:5432/iotdb")]).unwrap();

        assert_eq!(config.mqtt_broker, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.mqtt_topic, "factory/+/sensors");
        assert_eq!(config.mqtt_keepalive(), Duration::from_secs(60));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.mqtt_reconnect_attempts, 5);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.mqtt_client_id.starts_with("ingestor-"));
        assert_eq!(config.redacted_database_url(), "db:5432/iotdb");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/iot"),
            ("MQTT_BROKER", "broker.plant.local"),
            ("MQTT_PORT", "8883"),
            ("MQTT_TOPIC", "plant/#"),
            ("MQTT_CLIENT_ID", "ingestor-a"),
            ("LOG_FORMAT", "json"),
            ("SHUTDOWN_TIMEOUT_SECS", " 2 "),
        ])
        .unwrap();

        let worker = config.worker_config();
        assert_eq!(worker.broker, "broker.plant.local");
        assert_eq!(worker.port, 8883);
        assert_eq!(worker.topic, "plant/#");
        assert_eq!(worker.client_id, "ingestor-a");
        assert_eq!(worker.shutdown_timeout, Duration::from_secs(2));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.redacted_database_url(), "***");
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config(&[]).is_err());
        assert!(config(&[("DATABASE_URL", "postgres://x"), ("MQTT_PORT", "abc")]).is_err());
        assert!(config(&[("DATABASE_URL", "postgres://x"), ("LOG_FORMAT", "xml")]).is_err());
        assert!(config(&[("DATABASE_URL", "postgres://x"), ("CHANNEL_CAPACITY", "0")]).is_err());
    }
}
