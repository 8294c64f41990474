use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::models::alert::DEFAULT_VALIDITY_MINUTES;

/// Ceiling for minute-valued settings (one hundred years).
const MAX_CONFIGURED_MINUTES: i64 = 100 * 365 * 24 * 60;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Json,
    Protobuf,
}

impl FromStr for PayloadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "protobuf" | "proto" => Ok(PayloadFormat::Protobuf),
            other => Err(format!("unknown payload format '{}'", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_enabled: bool,
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub kafka_payload_format: PayloadFormat,
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub alert_default_validity_minutes: i64,
    pub alert_purge_interval_secs: u64,
    pub alert_purge_retention_minutes: i64,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or unparsable values fall
    /// back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<i64>().ok());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };

        let kafka_enabled = flag("KAFKA_ENABLED", true);
        let kafka_bootstrap_servers = string("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        let kafka_topic = string("KAFKA_TOPIC", "bus-positions");
        let kafka_group_id = string("KAFKA_GROUP_ID", "transit-alerts-consumer");
        let kafka_auto_offset_reset = string("KAFKA_AUTO_OFFSET_RESET", "latest");
        let kafka_sasl_mechanism = string("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256");
        let kafka_username = lookup("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = lookup("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol = string("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT");
        let kafka_max_retries = parsed("KAFKA_MAX_RETRIES")
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(5);
        let kafka_circuit_breaker_cooldown = parsed("KAFKA_CIRCUIT_BREAKER_COOLDOWN")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(300);
        let kafka_payload_format = lookup("KAFKA_PAYLOAD_FORMAT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(PayloadFormat::Json);

        let db_host = string("DB_HOST", "localhost");
        let db_port = string("DB_PORT", "5432");
        let db_name = string("DB_DATABASE", "transit");
        let db_user = string("DB_USER", "transit");
        let db_pwd = string("DB_PWD", "transit");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );
        let db_max_connections = parsed("DB_MAX_CONNECTIONS")
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(50);
        let run_migrations = flag("RUN_MIGRATIONS", false);

        let alert_default_validity_minutes = parsed("ALERT_DEFAULT_VALIDITY_MINUTES")
            .filter(|v| (1..=MAX_CONFIGURED_MINUTES).contains(v))
            .unwrap_or(DEFAULT_VALIDITY_MINUTES);
        let alert_purge_interval_secs = parsed("ALERT_PURGE_INTERVAL_SECS")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(300);
        let alert_purge_retention_minutes = parsed("ALERT_PURGE_RETENTION_MINUTES")
            .filter(|v| (0..=MAX_CONFIGURED_MINUTES).contains(v))
            .unwrap_or(0);

        let log_level = string("LOG_LEVEL", "info");

        Ok(Self {
            kafka_enabled,
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            kafka_payload_format,
            database_url,
            db_max_connections,
            run_migrations,
            alert_default_validity_minutes,
            alert_purge_interval_secs,
            alert_purge_retention_minutes,
            log_level,
        })
    }

    pub fn purge_retention(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.alert_purge_retention_minutes)
            .unwrap_or_else(chrono::Duration::zero)
    }
}
