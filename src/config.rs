use crate::error::{LagwatchError, Result};
use crate::storage::status::PartitionState;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Settings for the offset storage engine and the request gateway in front of it.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Number of observations retained per partition.
    #[serde(default = "default_intervals")]
    pub intervals: usize,
    /// Commits closer together than this replace the newest observation instead of appending.
    #[serde(with = "humantime_serde", default = "default_min_distance")]
    pub min_distance: Duration,
    /// Silence after the newest commit that marks a lagging partition as stopped. Zero disables.
    #[serde(with = "humantime_serde", default = "default_stop_threshold")]
    pub stop_threshold: Duration,
    /// How long callers wait for the engine to answer a query.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "default_whitelist")]
    pub group_whitelist: Vec<String>,
    #[serde(default)]
    pub group_blacklist: Vec<String>,
    #[serde(default = "default_whitelist")]
    pub topic_whitelist: Vec<String>,
    #[serde(default = "default_topic_blacklist")]
    pub topic_blacklist: Vec<String>,
}

/// Configuration for leader election among redundant instances.
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinationConfig {
    /// Lock provider. `memory` runs a process-local lock (single instance).
    #[serde(default)]
    pub provider: CoordinationProvider,
    /// Name of the global leadership lock.
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
    /// Session lifetime; losing the session loses leadership.
    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub session_timeout: Duration,
    /// Renewal grace period. Must be shorter than `session_timeout`.
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    #[allow(dead_code)] // Used by kubernetes feature
    pub grace_period: Duration,
    /// Identity of this instance. Defaults to HOSTNAME or POD_NAME env var.
    pub identity: Option<String>,
    /// Namespace for the Lease resource. Supports env var substitution.
    #[serde(default = "default_namespace")]
    #[allow(dead_code)] // Used by kubernetes feature
    pub namespace: String,
    #[serde(with = "humantime_serde", default = "default_retry_backoff_min")]
    pub retry_backoff_min: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_backoff_max")]
    pub retry_backoff_max: Duration,
    /// How often a follower retries the lock even without a release event.
    #[serde(with = "humantime_serde", default = "default_follower_recheck")]
    pub follower_recheck: Duration,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationProvider {
    #[default]
    Memory,
    Kubernetes,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(with = "humantime_serde", default = "default_metrics_interval")]
    pub interval: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(with = "humantime_serde", default = "default_notify_interval")]
    pub interval: Duration,
    /// Reminder period for a group that stays at or above threshold.
    #[serde(with = "humantime_serde", default = "default_renotify_interval")]
    pub renotify_interval: Duration,
    #[serde(default)]
    pub log: LogNotifierConfig,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogNotifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_threshold")]
    pub threshold: PartitionState,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_threshold")]
    pub threshold: PartitionState,
    #[serde(with = "humantime_serde", default = "default_webhook_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    pub name: String,
    pub bootstrap_servers: String,
    #[serde(default = "default_offsets_topic")]
    pub offsets_topic: String,
    #[serde(with = "humantime_serde", default = "default_broker_offsets_interval")]
    pub broker_offsets_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_kafka_timeout")]
    pub kafka_timeout: Duration,
    #[serde(default)]
    pub consumer_properties: HashMap<String, String>,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_intervals() -> usize {
    10
}

fn default_min_distance() -> Duration {
    Duration::from_secs(1)
}

fn default_stop_threshold() -> Duration {
    Duration::from_secs(600)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_whitelist() -> Vec<String> {
    vec![".*".to_string()]
}

fn default_topic_blacklist() -> Vec<String> {
    vec!["__.*".to_string()]
}

fn default_lock_path() -> String {
    "/lagwatch/notifier".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_retry_backoff_min() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_backoff_max() -> Duration {
    Duration::from_secs(30)
}

fn default_follower_recheck() -> Duration {
    Duration::from_secs(30)
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_notify_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_renotify_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> PartitionState {
    PartitionState::Warn
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_offsets_topic() -> String {
    "__consumer_offsets".to_string()
}

fn default_broker_offsets_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_kafka_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            intervals: default_intervals(),
            min_distance: default_min_distance(),
            stop_threshold: default_stop_threshold(),
            request_timeout: default_request_timeout(),
            group_whitelist: default_whitelist(),
            group_blacklist: Vec::new(),
            topic_whitelist: default_whitelist(),
            topic_blacklist: default_topic_blacklist(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            provider: CoordinationProvider::Memory,
            lock_path: default_lock_path(),
            session_timeout: default_session_timeout(),
            grace_period: default_grace_period(),
            identity: None,
            namespace: default_namespace(),
            retry_backoff_min: default_retry_backoff_min(),
            retry_backoff_max: default_retry_backoff_max(),
            follower_recheck: default_follower_recheck(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval: default_metrics_interval(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            interval: default_notify_interval(),
            renotify_interval: default_renotify_interval(),
            log: LogNotifierConfig::default(),
            webhooks: Vec::new(),
        }
    }
}

impl Default for LogNotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Config> {
        let config_path = path.unwrap_or("lagwatch.toml");

        if !Path::new(config_path).exists() {
            return Err(LagwatchError::Config(format!(
                "Configuration file not found: {config_path}"
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let content = Self::substitute_env_vars(&content);

        let config: Config = toml::from_str(&content)
            .map_err(|e| LagwatchError::Config(format!("TOML parse error: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn substitute_env_vars(content: &str) -> String {
        // ${VAR}, ${?VAR} and ${VAR:-default}; unset variables without a default become ""
        let re = Regex::new(r"\$\{\??([^}:-]+)(?::-([^}]*))?\}").unwrap();
        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            return Err(LagwatchError::Config(
                "At least one cluster must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for cluster in &self.clusters {
            cluster.validate()?;
            if !names.insert(cluster.name.as_str()) {
                return Err(LagwatchError::Config(format!(
                    "Cluster '{}' is configured more than once",
                    cluster.name
                )));
            }
        }

        self.storage.validate()?;
        self.coordination.validate()?;

        if self.metrics.interval.is_zero() {
            return Err(LagwatchError::Config(
                "metrics.interval must be greater than 0".to_string(),
            ));
        }
        self.notify.validate()?;

        Ok(())
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters.iter().map(|c| c.name.clone()).collect()
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.intervals < 2 {
            return Err(LagwatchError::Config(
                "storage.intervals must be at least 2".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(LagwatchError::Config(
                "storage.request_timeout must be greater than 0".to_string(),
            ));
        }
        self.compile_filters()?;
        Ok(())
    }

    pub fn compile_filters(&self) -> Result<CompiledFilters> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()
        };

        Ok(CompiledFilters {
            group_whitelist: compile(&self.group_whitelist)?,
            group_blacklist: compile(&self.group_blacklist)?,
            topic_whitelist: compile(&self.topic_whitelist)?,
            topic_blacklist: compile(&self.topic_blacklist)?,
        })
    }
}

impl CoordinationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock_path.is_empty() {
            return Err(LagwatchError::Config(
                "coordination.lock_path cannot be empty".to_string(),
            ));
        }
        if self.retry_backoff_min.is_zero() || self.retry_backoff_min > self.retry_backoff_max {
            return Err(LagwatchError::Config(
                "coordination.retry_backoff_min must be > 0 and <= retry_backoff_max".to_string(),
            ));
        }
        if self.follower_recheck.is_zero() {
            return Err(LagwatchError::Config(
                "coordination.follower_recheck must be greater than 0".to_string(),
            ));
        }
        if self.provider == CoordinationProvider::Kubernetes
            && self.session_timeout <= self.grace_period
        {
            return Err(LagwatchError::Config(
                "coordination.session_timeout must be greater than grace_period".to_string(),
            ));
        }
        Ok(())
    }
}

impl NotifyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(LagwatchError::Config(
                "notify.interval must be greater than 0".to_string(),
            ));
        }
        for webhook in &self.webhooks {
            if webhook.url.is_empty() {
                return Err(LagwatchError::Config(format!(
                    "Webhook '{}': url cannot be empty",
                    webhook.name
                )));
            }
        }
        Ok(())
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(LagwatchError::Config(
                "Cluster name cannot be empty".to_string(),
            ));
        }

        if self.bootstrap_servers.is_empty() {
            return Err(LagwatchError::Config(format!(
                "Cluster '{}': bootstrap_servers cannot be empty",
                self.name
            )));
        }

        if self.broker_offsets_interval.is_zero() {
            return Err(LagwatchError::Config(format!(
                "Cluster '{}': broker_offsets_interval must be greater than 0",
                self.name
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFilters {
    pub group_whitelist: Vec<Regex>,
    pub group_blacklist: Vec<Regex>,
    pub topic_whitelist: Vec<Regex>,
    pub topic_blacklist: Vec<Regex>,
}

impl CompiledFilters {
    pub fn matches_group(&self, group: &str) -> bool {
        let matches_whitelist = self.group_whitelist.iter().any(|r| r.is_match(group));
        let matches_blacklist = self.group_blacklist.iter().any(|r| r.is_match(group));
        matches_whitelist && !matches_blacklist
    }

    pub fn matches_topic(&self, topic: &str) -> bool {
        let matches_whitelist = self.topic_whitelist.iter().any(|r| r.is_match(topic));
        let matches_blacklist = self.topic_blacklist.iter().any(|r| r.is_match(topic));
        matches_whitelist && !matches_blacklist
    }
}
