//! Exporter Configuration
//!
//! All settings are loaded from environment variables for 12-factor compliance.
//! Configuration is read once at startup; any malformed value is fatal.
//!
//! ## HTTP
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | HOST | 0.0.0.0 | Bind host |
//! | PORT | 3000 | Bind port |
//! | LOG_FORMAT | text | `text` or `json` |
//!
//! ## Metrics and keyspace
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | PROM_PREFIX | bull | Metric name prefix |
//! | BULL_PREFIX | bull | Queue key prefix |
//! | BULL_QUEUES | - | Explicit queue list (skips SCAN) |
//! | COMPLETED_WINDOW_SECONDS | - | Windowed completed-count widths |
//!
//! ## Redis
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | REDIS_HOST | 127.0.0.1 | Direct host |
//! | REDIS_PORT | 6379 | Direct port |
//! | REDIS_DB | 0:default | `index:label` pairs |
//! | REDIS_USERNAME | - | ACL username |
//! | REDIS_PASSWORD | - | Password |
//! | REDIS_TLS | false | Enable TLS |
//! | REDIS_CA | - | Base64 PEM CA bundle (implies TLS) |
//! | REDIS_COMMAND_TIMEOUT_MS | 5000 | Connect/command timeout |
//! | REDIS_RECONNECT_INTERVAL_MS | 1000 | Reconnect supervisor period |
//!
//! ## Sentinel
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | REDIS_SENTINEL_ENABLED | false | Route through Sentinel |
//! | REDIS_SENTINEL_HOSTS | - | `host:port` list |
//! | REDIS_NAMESPACE | - | Master name |
//! | REDIS_SENTINEL_PASSWORD | - | Sentinel password |
//! | REDIS_SENTINEL_TLS | false | TLS towards Sentinels |
//! | REDIS_SENTINEL_CA | - | Base64 PEM CA for Sentinels |

use std::collections::HashSet;
use std::io::BufReader;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PREFIX: &str = "bull";
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_REDIS_DB: &str = "0:default";
const DEFAULT_SENTINEL_PORT: u16 = 26379;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

// TigerStyle: Explicit limits with _MAX suffix
const DATABASES_MAX: usize = 64;
const COMPLETED_WINDOWS_MAX: usize = 8;

/// Configuration errors. All of them abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{var} is required when {when}")]
    Missing {
        var: &'static str,
        when: &'static str,
    },
    #[error("{var}: duplicate {what} {value:?}")]
    Duplicate {
        var: &'static str,
        what: &'static str,
        value: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// A logical database to collect from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    /// Numeric index used to address the keyspace partition
    pub index: u32,
    /// Value of the `db` label in rendered samples
    pub label: String,
}

impl Database {
    pub fn new(index: u32, label: impl Into<String>) -> Self {
        Database {
            index,
            label: label.into(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// TLS material for a store or Sentinel connection.
///
/// An empty `root_ca_pem` means the bundled web PKI roots are trusted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub root_ca_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("custom_ca", &self.root_ca_pem.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelNode {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SentinelConfig {
    pub nodes: Vec<SentinelNode>,
    /// Name of the monitored master
    pub master_name: String,
    pub password: Option<String>,
    pub tls: Option<TlsSettings>,
}

impl std::fmt::Debug for SentinelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelConfig")
            .field("nodes", &self.nodes)
            .field("master_name", &self.master_name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .finish()
    }
}

/// Where the store lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisTarget {
    Direct { host: String, port: u16 },
    Sentinel(SentinelConfig),
}

#[derive(Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub target: RedisTarget,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsSettings>,
    /// Bound on connecting and on every store call
    pub command_timeout: Duration,
    /// How often the supervisor retries a lost connection
    pub reconnect_interval: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("command_timeout", &self.command_timeout)
            .field("reconnect_interval", &self.reconnect_interval)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            target: RedisTarget::Direct {
                host: DEFAULT_REDIS_HOST.to_string(),
                port: DEFAULT_REDIS_PORT,
            },
            username: None,
            password: None,
            tls: None,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }
}

/// Complete exporter configuration
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub host: String,
    pub port: u16,
    /// Prefix of every emitted metric name
    pub metric_prefix: String,
    /// Prefix of queue keys in the keyspace
    pub key_prefix: String,
    /// Explicit queue names; `None` means discover with SCAN
    pub queues: Option<Vec<String>>,
    /// Databases in collection and rendering order
    pub databases: Vec<Database>,
    /// Widths (seconds) of the windowed completed-count metrics
    pub completed_windows: Vec<u64>,
    pub redis: RedisConfig,
    pub log_format: LogFormat,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            metric_prefix: DEFAULT_PREFIX.to_string(),
            key_prefix: DEFAULT_PREFIX.to_string(),
            queues: None,
            databases: vec![Database::new(0, "default")],
            completed_windows: Vec::new(),
            redis: RedisConfig::default(),
            log_format: LogFormat::Text,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let metric_prefix = var("PROM_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        validate_metric_prefix(&metric_prefix)?;

        let databases = parse_databases(
            &var("REDIS_DB").unwrap_or_else(|| DEFAULT_REDIS_DB.to_string()),
        )?;

        let completed_windows = match var("COMPLETED_WINDOW_SECONDS") {
            Some(raw) => parse_windows(&raw)?,
            None => Vec::new(),
        };

        let redis = RedisConfig {
            target: parse_target(&var)?,
            username: var("REDIS_USERNAME"),
            password: var("REDIS_PASSWORD"),
            tls: tls_settings(
                "REDIS_CA",
                parse_flag(var("REDIS_TLS")),
                var("REDIS_CA").as_deref(),
            )?,
            command_timeout: Duration::from_millis(parse_number(
                "REDIS_COMMAND_TIMEOUT_MS",
                var("REDIS_COMMAND_TIMEOUT_MS"),
                DEFAULT_COMMAND_TIMEOUT_MS,
            )?),
            reconnect_interval: Duration::from_millis(parse_number(
                "REDIS_RECONNECT_INTERVAL_MS",
                var("REDIS_RECONNECT_INTERVAL_MS"),
                DEFAULT_RECONNECT_INTERVAL_MS,
            )?),
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::invalid("LOG_FORMAT", other, "expected text or json"))
            }
        };

        Ok(ExporterConfig {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_number("PORT", var("PORT"), DEFAULT_PORT)?,
            metric_prefix,
            key_prefix: var("BULL_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            queues: var("BULL_QUEUES").and_then(|raw| parse_queue_list(&raw)),
            databases,
            completed_windows,
            redis,
            log_format,
        })
    }
}

fn parse_flag(value: Option<String>) -> bool {
    value.map(|v| v == "true" || v == "1").unwrap_or(false)
}

fn parse_number<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn validate_metric_prefix(prefix: &str) -> Result<(), ConfigError> {
    let mut chars = prefix.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':');
    if !first_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':') {
        return Err(ConfigError::invalid(
            "PROM_PREFIX",
            prefix,
            "not a valid metric name prefix",
        ));
    }
    Ok(())
}

/// Parse `REDIS_DB` (format: "0:default,1:alt")
pub fn parse_databases(raw: &str) -> Result<Vec<Database>, ConfigError> {
    let mut databases = Vec::new();
    let mut seen_indices = HashSet::new();
    let mut seen_labels = HashSet::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (index, label) = entry
            .split_once(':')
            .ok_or_else(|| ConfigError::invalid("REDIS_DB", entry, "expected index:label"))?;
        let index: u32 = index
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid("REDIS_DB", entry, "index is not a number"))?;
        let label = label.trim();
        if label.is_empty() {
            return Err(ConfigError::invalid("REDIS_DB", entry, "empty label"));
        }
        if !seen_indices.insert(index) {
            return Err(ConfigError::Duplicate {
                var: "REDIS_DB",
                what: "index",
                value: index.to_string(),
            });
        }
        if !seen_labels.insert(label.to_string()) {
            return Err(ConfigError::Duplicate {
                var: "REDIS_DB",
                what: "label",
                value: label.to_string(),
            });
        }
        databases.push(Database::new(index, label));
    }

    if databases.is_empty() {
        return Err(ConfigError::invalid("REDIS_DB", raw, "no databases configured"));
    }
    if databases.len() > DATABASES_MAX {
        return Err(ConfigError::invalid(
            "REDIS_DB",
            raw,
            format!("at most {} databases", DATABASES_MAX),
        ));
    }
    Ok(databases)
}

/// Parse `BULL_QUEUES`; blank entries are dropped, duplicates keep first position.
fn parse_queue_list(raw: &str) -> Option<Vec<String>> {
    let mut seen = HashSet::new();
    let queues: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty() && seen.insert(*name))
        .map(String::from)
        .collect();
    if queues.is_empty() {
        None
    } else {
        Some(queues)
    }
}

fn parse_windows(raw: &str) -> Result<Vec<u64>, ConfigError> {
    let mut windows = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let secs: u64 = entry.parse().map_err(|_| {
            ConfigError::invalid("COMPLETED_WINDOW_SECONDS", entry, "not a number of seconds")
        })?;
        if secs == 0 {
            return Err(ConfigError::invalid(
                "COMPLETED_WINDOW_SECONDS",
                entry,
                "window must be positive",
            ));
        }
        if windows.contains(&secs) {
            return Err(ConfigError::Duplicate {
                var: "COMPLETED_WINDOW_SECONDS",
                what: "window",
                value: entry.to_string(),
            });
        }
        windows.push(secs);
    }
    if windows.len() > COMPLETED_WINDOWS_MAX {
        return Err(ConfigError::invalid(
            "COMPLETED_WINDOW_SECONDS",
            raw,
            format!("at most {} windows", COMPLETED_WINDOWS_MAX),
        ));
    }
    Ok(windows)
}

fn parse_target<F>(var: &F) -> Result<RedisTarget, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !parse_flag(var("REDIS_SENTINEL_ENABLED")) {
        return Ok(RedisTarget::Direct {
            host: var("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            port: parse_number("REDIS_PORT", var("REDIS_PORT"), DEFAULT_REDIS_PORT)?,
        });
    }

    const WHEN: &str = "REDIS_SENTINEL_ENABLED=true";
    let hosts = var("REDIS_SENTINEL_HOSTS").ok_or(ConfigError::Missing {
        var: "REDIS_SENTINEL_HOSTS",
        when: WHEN,
    })?;
    let master_name = var("REDIS_NAMESPACE").ok_or(ConfigError::Missing {
        var: "REDIS_NAMESPACE",
        when: WHEN,
    })?;

    Ok(RedisTarget::Sentinel(SentinelConfig {
        nodes: parse_sentinel_nodes(&hosts)?,
        master_name,
        password: var("REDIS_SENTINEL_PASSWORD"),
        tls: tls_settings(
            "REDIS_SENTINEL_CA",
            parse_flag(var("REDIS_SENTINEL_TLS")),
            var("REDIS_SENTINEL_CA").as_deref(),
        )?,
    }))
}

fn parse_sentinel_nodes(raw: &str) -> Result<Vec<SentinelNode>, ConfigError> {
    let nodes = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            // rsplit keeps bracketed IPv6 hosts intact
            let (host, port) = match entry.rsplit_once(':') {
                Some((host, port)) if !host.ends_with(':') => {
                    let port = port.parse().map_err(|_| {
                        ConfigError::invalid("REDIS_SENTINEL_HOSTS", entry, "invalid port")
                    })?;
                    (host, port)
                }
                _ => (entry, DEFAULT_SENTINEL_PORT),
            };
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if host.is_empty() {
                return Err(ConfigError::invalid("REDIS_SENTINEL_HOSTS", entry, "empty host"));
            }
            Ok(SentinelNode {
                host: host.to_string(),
                port,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if nodes.is_empty() {
        return Err(ConfigError::invalid("REDIS_SENTINEL_HOSTS", raw, "no sentinel nodes"));
    }
    Ok(nodes)
}

/// TLS is on when the flag is set or CA material is supplied.
fn tls_settings(
    ca_var: &'static str,
    enabled: bool,
    ca_base64: Option<&str>,
) -> Result<Option<TlsSettings>, ConfigError> {
    match ca_base64 {
        Some(encoded) => Ok(Some(TlsSettings {
            root_ca_pem: Some(decode_ca(ca_var, encoded)?),
        })),
        None if enabled => Ok(Some(TlsSettings::default())),
        None => Ok(None),
    }
}

/// Decode base64 CA material and check it holds at least one PEM certificate.
fn decode_ca(var: &'static str, encoded: &str) -> Result<Vec<u8>, ConfigError> {
    let pem = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigError::invalid(var, "<base64>", e.to_string()))?;

    let mut reader = BufReader::new(pem.as_slice());
    let mut count = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert.map_err(|e| ConfigError::invalid(var, "<pem>", e.to_string()))?;
        count += 1;
    }
    if count == 0 {
        return Err(ConfigError::invalid(var, "<pem>", "no certificates found"));
    }
    Ok(pem)
}
