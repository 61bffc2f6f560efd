//! Configuration management for beacon.

use crate::error::{BeaconError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Router controller (UniFi OS) settings.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Route 53 zone and record settings.
    #[serde(default)]
    pub route53: Route53Config,

    /// NextDNS linked IP settings.
    #[serde(default)]
    pub nextdns: NextDnsConfig,

    /// Reconciliation schedule.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Router controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the controller, e.g. "https://192.168.1.1".
    #[serde(default)]
    pub api_base_url: String,
    /// Controller username (or environment variable name if prefixed with $).
    #[serde(default)]
    pub username: String,
    /// Controller password (or environment variable name if prefixed with $).
    #[serde(default)]
    pub password: String,
    /// Per-call timeout in seconds (default: 10).
    #[serde(default = "default_client_timeout")]
    pub api_client_timeout_secs: u64,
    /// Accept the controller's certificate without verification (default: false).
    ///
    /// Only the controller client honours this; every other client verifies TLS.
    #[serde(default)]
    pub trust_self_signed_certificate: bool,
}

/// Route 53 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route53Config {
    /// AWS region (default: us-east-1).
    #[serde(default = "default_region")]
    pub region: String,
    /// Access key; empty means the default AWS credential chain.
    #[serde(default)]
    pub access_key: String,
    /// Secret key; empty means the default AWS credential chain.
    #[serde(default)]
    pub secret_key: String,
    /// Hosted zone ID.
    #[serde(default)]
    pub hosted_zone_id: String,
    /// Name of the record set to keep in sync, e.g. "home.example.com.".
    #[serde(default)]
    pub resource_record_upsert_name: String,
    /// TTL written with every upsert (default: 60).
    #[serde(default = "default_upsert_ttl")]
    pub resource_record_upsert_ttl_secs: u32,
    /// Per-operation timeout in seconds (default: 30).
    #[serde(default = "default_route53_timeout")]
    pub api_client_timeout_secs: u64,
}

/// NextDNS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextDnsConfig {
    /// Whether to push the uplink IP to NextDNS after a Route 53 update.
    #[serde(default)]
    pub update_linked_ip_enabled: bool,
    /// Profile-specific "link IP" URL (or environment variable name if prefixed with $).
    #[serde(default)]
    pub api_linked_ip_url: String,
    /// Per-call timeout in seconds (default: 10).
    #[serde(default = "default_client_timeout")]
    pub api_client_timeout_secs: u64,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cron expression with a leading seconds field (default: every 5 minutes).
    #[serde(default = "default_cron_expression")]
    pub cron_expression: String,
    /// Maximum number of ticks allowed to run at once (default: 1).
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    /// When true, stopping the scheduler does not wait for running ticks.
    #[serde(default = "default_true")]
    pub use_daemons: bool,
}

fn default_true() -> bool {
    true
}

fn default_client_timeout() -> u64 {
    10
}

fn default_route53_timeout() -> u64 {
    30
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_upsert_ttl() -> u32 {
    60
}

fn default_cron_expression() -> String {
    "0 */5 * * * *".to_string()
}

fn default_thread_pool_size() -> usize {
    1
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            username: String::new(),
            password: String::new(),
            api_client_timeout_secs: default_client_timeout(),
            trust_self_signed_certificate: false,
        }
    }
}

impl Default for Route53Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            access_key: String::new(),
            secret_key: String::new(),
            hosted_zone_id: String::new(),
            resource_record_upsert_name: String::new(),
            resource_record_upsert_ttl_secs: default_upsert_ttl(),
            api_client_timeout_secs: default_route53_timeout(),
        }
    }
}

impl Default for NextDnsConfig {
    fn default() -> Self {
        Self {
            update_linked_ip_enabled: false,
            api_linked_ip_url: String::new(),
            api_client_timeout_secs: default_client_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: default_cron_expression(),
            thread_pool_size: default_thread_pool_size(),
            use_daemons: true,
        }
    }
}

impl ControllerConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api_client_timeout_secs)
    }
}

impl Route53Config {
    /// Per-operation timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api_client_timeout_secs)
    }
}

impl NextDnsConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api_client_timeout_secs)
    }
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| BeaconError::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("beacon").join("config.toml"))
    }

    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// A missing file yields the default configuration, which does not pass
    /// [`Config::validate`].
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.resolve_env();
        Ok(config)
    }

    /// Replace `$VAR` references in secret-bearing fields with their values.
    ///
    /// Unset variables in the Route 53 keys resolve to empty, which selects
    /// the default AWS credential chain.
    fn resolve_env(&mut self) {
        for value in [
            &mut self.controller.api_base_url,
            &mut self.controller.username,
            &mut self.controller.password,
            &mut self.nextdns.api_linked_ip_url,
        ] {
            *value = resolve_env(value);
        }

        for value in [&mut self.route53.access_key, &mut self.route53.secret_key] {
            *value = resolve_env_or_empty(value);
        }
    }

    /// Check that every setting the daemon needs is present and well formed.
    pub fn validate(&self) -> Result<()> {
        validate_url("controller.api_base_url", &self.controller.api_base_url)?;
        require("controller.username", &self.controller.username)?;
        require("controller.password", &self.controller.password)?;
        require_resolved("controller.username", &self.controller.username)?;
        require_resolved("controller.password", &self.controller.password)?;
        require_positive("controller.api_client_timeout_secs", self.controller.api_client_timeout_secs)?;

        require("route53.region", &self.route53.region)?;
        require("route53.hosted_zone_id", &self.route53.hosted_zone_id)?;
        require(
            "route53.resource_record_upsert_name",
            &self.route53.resource_record_upsert_name,
        )?;
        require_positive(
            "route53.resource_record_upsert_ttl_secs",
            u64::from(self.route53.resource_record_upsert_ttl_secs),
        )?;
        require_positive("route53.api_client_timeout_secs", self.route53.api_client_timeout_secs)?;
        require_resolved("route53.access_key", &self.route53.access_key)?;
        require_resolved("route53.secret_key", &self.route53.secret_key)?;
        if self.route53.access_key.is_empty() != self.route53.secret_key.is_empty() {
            return Err(BeaconError::Config(
                "route53.access_key and route53.secret_key must be set together".to_string(),
            ));
        }

        if self.nextdns.update_linked_ip_enabled {
            validate_url("nextdns.api_linked_ip_url", &self.nextdns.api_linked_ip_url)?;
            require_positive("nextdns.api_client_timeout_secs", self.nextdns.api_client_timeout_secs)?;
        }

        cron::Schedule::from_str(&self.scheduler.cron_expression)?;
        if self.scheduler.thread_pool_size == 0 {
            return Err(BeaconError::Config(
                "scheduler.thread_pool_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate example configuration.
    pub fn example() -> Self {
        Self {
            controller: ControllerConfig {
                api_base_url: "https://192.168.1.1".to_string(),
                username: "$BEACON_CONTROLLER_USERNAME".to_string(),
                password: "$BEACON_CONTROLLER_PASSWORD".to_string(),
                trust_self_signed_certificate: true,
                ..ControllerConfig::default()
            },
            route53: Route53Config {
                access_key: "$AWS_ACCESS_KEY_ID".to_string(),
                secret_key: "$AWS_SECRET_ACCESS_KEY".to_string(),
                hosted_zone_id: "your-hosted-zone-id".to_string(),
                resource_record_upsert_name: "home.example.com.".to_string(),
                ..Route53Config::default()
            },
            nextdns: NextDnsConfig {
                update_linked_ip_enabled: false,
                api_linked_ip_url: "$BEACON_NEXTDNS_LINKED_IP_URL".to_string(),
                ..NextDnsConfig::default()
            },
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn require(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BeaconError::Config(format!("{} is required", key)));
    }
    Ok(())
}

fn require_positive(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(BeaconError::Config(format!("{} must be greater than 0", key)));
    }
    Ok(())
}

/// Reject values still holding an unresolved `$VAR` reference.
fn require_resolved(key: &str, value: &str) -> Result<()> {
    if let Some(var_name) = value.strip_prefix('$') {
        return Err(BeaconError::Config(format!(
            "{} refers to environment variable {}, which is not set",
            key, var_name
        )));
    }
    Ok(())
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    require(key, value)?;
    require_resolved(key, value)?;
    if !value.starts_with("https://") && !value.starts_with("http://") {
        return Err(BeaconError::Config(format!(
            "{} must use an http or https scheme, got: {}",
            key, value
        )));
    }
    Ok(())
}

/// Resolve environment variable references (values starting with $).
pub(crate) fn resolve_env(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix('$') {
        std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!("Environment variable {} not set", var_name);
            value.to_string()
        })
    } else {
        value.to_string()
    }
}

/// Like [`resolve_env`], but an unset variable yields an empty string.
fn resolve_env_or_empty(value: &str) -> String {
    match value.strip_prefix('$') {
        Some(var_name) => std::env::var(var_name).unwrap_or_else(|_| {
            tracing::warn!("Environment variable {} not set, leaving value empty", var_name);
            String::new()
        }),
        None => value.to_string(),
    }
}
