//! Controller configuration loaded from a mounted YAML file.

use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main alerting controller configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlertingConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub alertmanager: AlertmanagerSettings,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub intervals: IntervalConfig,

    #[serde(default)]
    pub precan: PrecanConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Cluster ID; also the namespace holding cluster-scoped policies
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Human readable name put into pushed alerts
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl ClusterConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Where Alertmanager runs and how to talk to it
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertmanagerSettings {
    #[serde(default = "default_alertmanager_namespace")]
    pub namespace: String,

    #[serde(rename = "serviceName", default = "default_service_name")]
    pub service_name: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Fixed base URL, bypasses service lookup when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Secret holding `config.yml` and `notification.tmpl`
    #[serde(rename = "secretName", default = "default_secret_name")]
    pub secret_name: String,

    #[serde(rename = "requestTimeoutSeconds", default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    #[serde(rename = "silenceHours", default = "default_silence_hours")]
    pub silence_hours: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Namespace for cluster rule objects and prefix of project monitor namespaces
    #[serde(default = "default_monitoring_namespace")]
    pub namespace: String,

    /// Namespace label holding the project ID
    #[serde(rename = "projectLabel", default = "default_project_label")]
    pub project_label: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntervalConfig {
    #[serde(rename = "stateSyncSeconds", default = "default_state_sync")]
    pub state_sync_seconds: u64,

    #[serde(rename = "watcherSeconds", default = "default_watcher")]
    pub watcher_seconds: u64,

    #[serde(rename = "requeueSeconds", default = "default_requeue")]
    pub requeue_seconds: u64,

    #[serde(rename = "deployProbeSeconds", default = "default_deploy_probe")]
    pub deploy_probe_seconds: u64,
}

impl IntervalConfig {
    pub fn state_sync(&self) -> Duration {
        Duration::from_secs(self.state_sync_seconds)
    }

    pub fn watcher(&self) -> Duration {
        Duration::from_secs(self.watcher_seconds)
    }

    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_seconds)
    }

    pub fn deploy_probe(&self) -> Duration {
        Duration::from_secs(self.deploy_probe_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrecanConfig {
    #[serde(default = "default_precan_enabled")]
    pub enabled: bool,
}

fn default_cluster_name() -> String {
    "local".to_string()
}

fn default_alertmanager_namespace() -> String {
    "platform-alerting".to_string()
}

fn default_service_name() -> String {
    "alertmanager-operated".to_string()
}

fn default_port() -> u16 {
    9093
}

fn default_secret_name() -> String {
    "alertmanager-platform-alerting".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_silence_hours() -> i64 {
    24
}

fn default_monitoring_namespace() -> String {
    "platform-monitoring".to_string()
}

fn default_project_label() -> String {
    "platform.5dlabs.io/project-id".to_string()
}

fn default_state_sync() -> u64 {
    10
}

fn default_watcher() -> u64 {
    30
}

fn default_requeue() -> u64 {
    30
}

fn default_deploy_probe() -> u64 {
    15
}

fn default_precan_enabled() -> bool {
    true
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            name: default_cluster_name(),
            display_name: None,
        }
    }
}

impl Default for AlertmanagerSettings {
    fn default() -> Self {
        AlertmanagerSettings {
            namespace: default_alertmanager_namespace(),
            service_name: default_service_name(),
            port: default_port(),
            endpoint: None,
            secret_name: default_secret_name(),
            request_timeout_seconds: default_request_timeout(),
            silence_hours: default_silence_hours(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            namespace: default_monitoring_namespace(),
            project_label: default_project_label(),
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        IntervalConfig {
            state_sync_seconds: default_state_sync(),
            watcher_seconds: default_watcher(),
            requeue_seconds: default_requeue(),
            deploy_probe_seconds: default_deploy_probe(),
        }
    }
}

impl Default for PrecanConfig {
    fn default() -> Self {
        PrecanConfig {
            enabled: default_precan_enabled(),
        }
    }
}

impl AlertingConfig {
    /// Load configuration from mounted YAML file
    pub fn from_mounted_file(config_path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config file {config_path}: {e}")))?;

        let config: AlertingConfig = serde_yaml::from_str(&config_str)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.name.trim().is_empty() {
            return Err(Error::Config("cluster.name must not be empty".to_string()));
        }
        if self.monitoring.namespace.trim().is_empty() {
            return Err(Error::Config(
                "monitoring.namespace must not be empty".to_string(),
            ));
        }
        if self.alertmanager.secret_name.trim().is_empty() {
            return Err(Error::Config(
                "alertmanager.secretName must not be empty".to_string(),
            ));
        }
        let intervals = [
            ("stateSyncSeconds", self.intervals.state_sync_seconds),
            ("watcherSeconds", self.intervals.watcher_seconds),
            ("requeueSeconds", self.intervals.requeue_seconds),
            ("deployProbeSeconds", self.intervals.deploy_probe_seconds),
            (
                "requestTimeoutSeconds",
                self.alertmanager.request_timeout_seconds,
            ),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.alertmanager.silence_hours <= 0 {
            return Err(Error::Config(
                "alertmanager.silenceHours must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
