//! Configuration loading and validation.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub directory_sync: DirectorySyncConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub node_id: u16,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
    #[serde(default = "default_client_addr")]
    pub client_addr: std::net::SocketAddr,
    #[serde(default = "default_gateway_addr")]
    pub gateway_addr: std::net::SocketAddr,
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_client_addr() -> std::net::SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_gateway_addr() -> std::net::SocketAddr {
    "0.0.0.0:8081".parse().unwrap()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string for normal pooled queries.
    pub primary_url: String,
    /// Connection string for the read-replica used to hydrate caches.
    /// Falls back to `primary_url` when absent.
    pub replica_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// `host:port` of the primary, for the tailer's raw replication
    /// connection — it speaks the wire protocol directly over TCP rather
    /// than through the pooled sqlx connection.
    #[serde(default = "default_replication_addr")]
    pub replication_addr: String,
}

fn default_replication_addr() -> String {
    "127.0.0.1:5432".to_string()
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_slot_name")]
    pub slot_name: String,
    #[serde(default = "default_publication_name")]
    pub publication_name: String,
    #[serde(default = "default_alert_threshold_ms")]
    pub alert_threshold_ms: u64,
    #[serde(default = "default_change_log_retention_days")]
    pub change_log_retention_days: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            slot_name: default_slot_name(),
            publication_name: default_publication_name(),
            alert_threshold_ms: default_alert_threshold_ms(),
            change_log_retention_days: default_change_log_retention_days(),
        }
    }
}

fn default_slot_name() -> String {
    "meridian_tailer".to_string()
}

fn default_publication_name() -> String {
    "meridian_pub".to_string()
}

fn default_alert_threshold_ms() -> u64 {
    5_000
}

fn default_change_log_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Symmetric key used to sign/verify opaque gateway reply refs (HMAC-SHA256).
    pub ref_signing_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { ref_signing_key: String::new() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "default_relay_presence_debounce_ms")]
    pub relay_presence_debounce_ms: u64,
    #[serde(default = "default_cache_prune_interval_secs")]
    pub cache_prune_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            relay_presence_debounce_ms: default_relay_presence_debounce_ms(),
            cache_prune_interval_secs: default_cache_prune_interval_secs(),
        }
    }
}

fn default_relay_presence_debounce_ms() -> u64 {
    1_000
}

fn default_cache_prune_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DirectorySyncConfig {
    #[serde(default)]
    pub providers: Vec<DirectoryProviderConfig>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_unauthorized_notify_max_per_day")]
    pub unauthorized_notify_max_per_day: u32,
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_unauthorized_notify_max_per_day() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryProviderConfig {
    pub provider_id: String,
    pub adapter: String,
    pub client_id: String,
    pub client_secret: String,
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relays_per_client")]
    pub relays_per_client: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { relays_per_client: default_relays_per_client() }
    }
}

fn default_relays_per_client() -> usize {
    2
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 0 }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("security.ref_signing_key must be at least 32 bytes")]
    WeakRefSigningKey,
    #[error("database.primary_url is required")]
    MissingPrimaryUrl,
    #[error("replication.slot_name must be a valid postgres identifier")]
    InvalidSlotName,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.security.ref_signing_key.as_bytes().len() < 32 {
        errors.push(ValidationError::WeakRefSigningKey);
    }
    if config.database.primary_url.is_empty() {
        errors.push(ValidationError::MissingPrimaryUrl);
    }
    if !is_valid_pg_identifier(&config.replication.slot_name) {
        errors.push(ValidationError::InvalidSlotName);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_valid_pg_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.chars().next().is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Resolve the config path from CLI arguments: `-c <path>` / `--config <path>`
/// / a bare path, falling back to `config.toml`.
pub fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);
    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {flag}");
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation_rejects_uppercase_and_empty() {
        assert!(is_valid_pg_identifier("meridian_tailer"));
        assert!(!is_valid_pg_identifier("Meridian"));
        assert!(!is_valid_pg_identifier(""));
    }

    #[test]
    fn validate_flags_weak_signing_key() {
        let config = Config {
            server: ServerConfig { node_id: 1, log_format: LogFormat::Pretty, client_addr: default_client_addr(), gateway_addr: default_gateway_addr() },
            database: DatabaseConfig {
                primary_url: "postgres://localhost/meridian".into(),
                replica_url: None,
                max_connections: 10,
                replication_addr: default_replication_addr(),
            },
            replication: ReplicationConfig::default(),
            security: SecurityConfig { ref_signing_key: "short".into() },
            presence: PresenceConfig::default(),
            directory_sync: DirectorySyncConfig::default(),
            relay: RelayConfig::default(),
            metrics: MetricsConfig::default(),
        };
        let errors = validate(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::WeakRefSigningKey));
    }
}
