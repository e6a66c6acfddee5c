//! Configuration management for lanscout.
//!
//! This module provides the configuration system for every component:
//! - Loading from YAML files
//! - Environment variable overrides (`LANSCOUT__SECTION__FIELD`)
//! - Per-service override URLs read once at startup (`LANSCOUT_<SERVICE>_URL`)
//! - Validation of all settings

use crate::error::{ConfigError, Result};
use crate::types::{parse_http_url, ServiceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```
/// use lanscout_core::config::AppConfig;
///
/// let config = AppConfig::from_yaml("discovery:\n  batch_size: 20\n").unwrap();
/// assert_eq!(config.discovery.batch_size, 20);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-service ports, health paths and override URLs
    #[serde(default)]
    pub services: ServicesConfig,

    /// Discovery engine settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Endpoint registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Network monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Update channel settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Offline queue settings
    #[serde(default)]
    pub offline: OfflineConfig,

    /// Persistent storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate: the YAML file, then
    /// `LANSCOUT__SECTION__FIELD` environment overrides.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("LANSCOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Applies the per-service `LANSCOUT_<SERVICE>_URL` variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies per-service overrides from an arbitrary lookup. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for kind in ServiceKind::ALL {
            if let Some(value) = lookup(kind.env_var()) {
                let value = value.trim();
                if !value.is_empty() {
                    self.services.get_mut(kind).override_url =
                        Some(value.trim_end_matches('/').to_string());
                }
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.services.validate()?;
        self.discovery.validate()?;
        self.monitor.validate()?;
        self.channel.validate()?;
        self.offline.validate()?;
        self.logging.parse_level()?;
        Ok(())
    }
}

/// Per-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Port the service listens on
    pub port: u16,

    /// Path probed to decide reachability
    pub health_path: String,

    /// Explicit URL that short-circuits discovery
    #[serde(default)]
    pub override_url: Option<String>,
}

impl ServiceConfig {
    fn new(port: u16, health_path: &str) -> Self {
        Self {
            port,
            health_path: health_path.to_string(),
            override_url: None,
        }
    }
}

/// Settings for all four logical services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_llm")]
    pub llm: ServiceConfig,

    #[serde(default = "default_transcription")]
    pub transcription: ServiceConfig,

    #[serde(default = "default_speech_synthesis")]
    pub speech_synthesis: ServiceConfig,

    #[serde(default = "default_backend")]
    pub backend: ServiceConfig,
}

fn default_llm() -> ServiceConfig {
    ServiceConfig::new(11434, "/api/tags")
}

fn default_transcription() -> ServiceConfig {
    ServiceConfig::new(9000, "/health")
}

fn default_speech_synthesis() -> ServiceConfig {
    ServiceConfig::new(5002, "/health")
}

fn default_backend() -> ServiceConfig {
    ServiceConfig::new(3001, "/health")
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            llm: default_llm(),
            transcription: default_transcription(),
            speech_synthesis: default_speech_synthesis(),
            backend: default_backend(),
        }
    }
}

impl ServicesConfig {
    pub fn get(&self, kind: ServiceKind) -> &ServiceConfig {
        match kind {
            ServiceKind::Llm => &self.llm,
            ServiceKind::Transcription => &self.transcription,
            ServiceKind::SpeechSynthesis => &self.speech_synthesis,
            ServiceKind::Backend => &self.backend,
        }
    }

    pub fn get_mut(&mut self, kind: ServiceKind) -> &mut ServiceConfig {
        match kind {
            ServiceKind::Llm => &mut self.llm,
            ServiceKind::Transcription => &mut self.transcription,
            ServiceKind::SpeechSynthesis => &mut self.speech_synthesis,
            ServiceKind::Backend => &mut self.backend,
        }
    }

    fn validate(&self) -> Result<()> {
        for kind in ServiceKind::ALL {
            let service = self.get(kind);
            let field = |name: &str| format!("services.{}.{}", kind.as_str().replace('-', "_"), name);

            if service.port == 0 {
                return Err(ConfigError::invalid_value(field("port"), "cannot be 0").into());
            }
            if !service.health_path.starts_with('/') {
                return Err(ConfigError::invalid_value(field("health_path"), "must start with '/'").into());
            }
            if let Some(ref url) = service.override_url {
                if let Err(reason) = parse_http_url(url) {
                    return Err(ConfigError::invalid_value(field("override_url"), reason).into());
                }
            }
        }
        Ok(())
    }
}

/// Discovery engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Enable network probing (overrides still apply when disabled)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timeout for loopback and gateway probes (milliseconds)
    #[serde(default = "default_priority_timeout")]
    pub priority_timeout_ms: u64,

    /// Timeout for each subnet sweep probe (milliseconds)
    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_ms: u64,

    /// Number of sweep probes in flight at once
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a successful discovery is reused (seconds)
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Loopback forms probed first
    #[serde(default = "default_loopback_hosts")]
    pub loopback_hosts: Vec<String>,

    /// Router addresses tried when the device address is unknown
    #[serde(default = "default_fallback_gateways")]
    pub fallback_gateways: Vec<Ipv4Addr>,

    /// Fixed device address (auto-detected when unset)
    #[serde(default)]
    pub device_address: Option<Ipv4Addr>,

    /// Sweep the whole /24 after the priority set fails
    #[serde(default = "default_true")]
    pub subnet_sweep: bool,
}

fn default_true() -> bool {
    true
}

fn default_priority_timeout() -> u64 {
    3000
}

fn default_sweep_timeout() -> u64 {
    1500
}

fn default_batch_size() -> usize {
    10
}

fn default_cache_ttl() -> u64 {
    300 // 5 minutes
}

fn default_loopback_hosts() -> Vec<String> {
    vec![
        "127.0.0.1".to_string(),
        "localhost".to_string(),
        // Host loopback as seen from an Android emulator
        "10.0.2.2".to_string(),
    ]
}

fn default_fallback_gateways() -> Vec<Ipv4Addr> {
    vec![
        Ipv4Addr::new(192, 168, 1, 1),
        Ipv4Addr::new(192, 168, 0, 1),
        Ipv4Addr::new(10, 0, 0, 1),
    ]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority_timeout_ms: default_priority_timeout(),
            sweep_timeout_ms: default_sweep_timeout(),
            batch_size: default_batch_size(),
            cache_ttl_secs: default_cache_ttl(),
            loopback_hosts: default_loopback_hosts(),
            fallback_gateways: default_fallback_gateways(),
            device_address: None,
            subnet_sweep: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn priority_timeout(&self) -> Duration {
        Duration::from_millis(self.priority_timeout_ms)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("discovery.batch_size", "cannot be 0").into());
        }
        if self.priority_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("discovery.priority_timeout_ms", "cannot be 0").into());
        }
        if self.sweep_timeout_ms == 0 {
            return Err(ConfigError::invalid_value("discovery.sweep_timeout_ms", "cannot be 0").into());
        }
        Ok(())
    }
}

/// Endpoint registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Minimum spacing between two refresh cycles (seconds)
    #[serde(default = "default_refresh_interval")]
    pub refresh_min_interval_secs: u64,
}

fn default_refresh_interval() -> u64 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_min_interval_secs: default_refresh_interval(),
        }
    }
}

impl RegistryConfig {
    pub fn refresh_min_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_min_interval_secs)
    }
}

/// Network monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Notifications closer than this to the last processed one are dropped
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    /// Stability window after a short outage
    #[serde(default = "default_short_stability")]
    pub short_stability_ms: u64,

    /// Stability window after a long outage
    #[serde(default = "default_recovery_stability")]
    pub recovery_stability_ms: u64,

    /// Outages at least this long count as long and force an endpoint refresh
    #[serde(default = "default_long_outage")]
    pub long_outage_ms: u64,

    /// Transport types that cannot be trusted and are coerced
    #[serde(default = "default_ambiguous_transports")]
    pub ambiguous_transports: Vec<String>,

    /// Classification used in place of an ambiguous transport
    #[serde(default = "default_coerced_transport")]
    pub coerced_transport: String,
}

fn default_debounce() -> u64 {
    5000
}

fn default_short_stability() -> u64 {
    2000
}

fn default_recovery_stability() -> u64 {
    10_000
}

fn default_long_outage() -> u64 {
    10_000
}

fn default_ambiguous_transports() -> Vec<String> {
    vec![
        "unknown".to_string(),
        "other".to_string(),
        "none".to_string(),
        String::new(),
    ]
}

fn default_coerced_transport() -> String {
    "wifi".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
            short_stability_ms: default_short_stability(),
            recovery_stability_ms: default_recovery_stability(),
            long_outage_ms: default_long_outage(),
            ambiguous_transports: default_ambiguous_transports(),
            coerced_transport: default_coerced_transport(),
        }
    }
}

impl MonitorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn short_stability(&self) -> Duration {
        Duration::from_millis(self.short_stability_ms)
    }

    pub fn recovery_stability(&self) -> Duration {
        Duration::from_millis(self.recovery_stability_ms)
    }

    pub fn long_outage(&self) -> Duration {
        Duration::from_millis(self.long_outage_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.coerced_transport.trim().is_empty() {
            return Err(ConfigError::invalid_value("monitor.coerced_transport", "cannot be empty").into());
        }
        Ok(())
    }
}

/// Update channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_drain")]
    pub drain_interval_secs: u64,

    /// Inbound queue bound; oldest entries are dropped beyond it
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_attempts")]
    pub max_reconnect_attempts: u32,

    /// Extra wait before a reconnect, after which connectivity is re-checked
    #[serde(default = "default_stability_delay")]
    pub stability_delay_secs: u64,

    #[serde(default = "default_first_backoff")]
    pub first_backoff_secs: u64,

    #[serde(default = "default_second_backoff")]
    pub second_backoff_secs: u64,

    /// Delay for attempt 3, doubled per later attempt
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_updates_path")]
    pub updates_path: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_heartbeat() -> u64 {
    30
}

fn default_drain() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    5
}

fn default_stability_delay() -> u64 {
    3
}

fn default_first_backoff() -> u64 {
    3
}

fn default_second_backoff() -> u64 {
    8
}

fn default_base_backoff() -> u64 {
    16
}

fn default_max_backoff() -> u64 {
    60
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_updates_path() -> String {
    "/api/updates".to_string()
}

fn default_request_timeout() -> u64 {
    5000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat(),
            drain_interval_secs: default_drain(),
            queue_capacity: default_queue_capacity(),
            max_reconnect_attempts: default_max_attempts(),
            stability_delay_secs: default_stability_delay(),
            first_backoff_secs: default_first_backoff(),
            second_backoff_secs: default_second_backoff(),
            base_backoff_secs: default_base_backoff(),
            max_backoff_secs: default_max_backoff(),
            health_path: default_health_path(),
            updates_path: default_updates_path(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ChannelConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn stability_delay(&self) -> Duration {
        Duration::from_secs(self.stability_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid_value("channel.queue_capacity", "cannot be 0").into());
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::invalid_value("channel.max_reconnect_attempts", "cannot be 0").into());
        }
        if self.heartbeat_interval_secs == 0 || self.drain_interval_secs == 0 {
            return Err(ConfigError::invalid_value("channel", "heartbeat and drain intervals cannot be 0").into());
        }
        if self.max_backoff_secs < self.first_backoff_secs {
            return Err(ConfigError::invalid_value(
                "channel.max_backoff_secs",
                "must be at least first_backoff_secs",
            )
            .into());
        }
        Ok(())
    }
}

/// Offline queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Attempts before an action is discarded
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Store key holding the serialized queue
    #[serde(default = "default_storage_key")]
    pub storage_key: String,

    /// Backend path that replayed actions are posted to
    #[serde(default = "default_action_path")]
    pub action_path: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_storage_key() -> String {
    "offline_queue".to_string()
}

fn default_action_path() -> String {
    "/api/actions".to_string()
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            storage_key: default_storage_key(),
            action_path: default_action_path(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl OfflineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(ConfigError::invalid_value("offline.max_retries", "cannot be 0").into());
        }
        if self.storage_key.is_empty() {
            return Err(ConfigError::invalid_value("offline.storage_key", "cannot be empty").into());
        }
        Ok(())
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: StorageBackend,

    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: default_data_dir(),
        }
    }
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory storage (volatile)
    #[default]
    Memory,
    /// One file per key under the data directory
    File,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,

    /// Whether to include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Whether to include file/line info
    #[serde(default)]
    pub file_line: bool,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            timestamps: true,
            file_line: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }

    /// Builds an env-filter directive string such as `info,lanscout_discovery=debug`.
    pub fn filter_directives(&self) -> String {
        let mut modules: Vec<_> = self.module_levels.iter().collect();
        modules.sort();

        let mut directives = vec![self.level.to_lowercase()];
        directives.extend(modules.into_iter().map(|(module, level)| format!("{}={}", module, level)));
        directives.join(",")
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
}
