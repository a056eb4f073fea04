//! Shared error type, alert state and correlation key helpers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Label carrying the `GroupID` on every compiled rule, route and pushed alert.
pub const LABEL_GROUP_ID: &str = "group_id";
/// Label carrying the `RuleID`.
pub const LABEL_RULE_ID: &str = "rule_id";
pub const LABEL_ALERT_TYPE: &str = "alert_type";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Alertmanager returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stale resource version for {0}")]
    Conflict(String),

    #[error("Object is missing a name or namespace")]
    MissingObjectKey,

    #[error("Finalizer error: {0}")]
    Finalizer(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Map a kube API error, turning 409 responses into [`Error::Conflict`].
    pub(crate) fn from_kube(err: kube::Error, what: impl Into<String>) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(what.into()),
            other => Error::Kube(other),
        }
    }
}

/// Alert state stored in `status.state` of groups and rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Active,
    Inactive,
    Alerting,
    Muted,
}

impl AlertState {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertState::Active => "active",
            AlertState::Inactive => "inactive",
            AlertState::Alerting => "alerting",
            AlertState::Muted => "muted",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `GroupID = <namespace>:<name>`
pub fn group_id(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

/// Deterministic `RuleID` used for metric rules.
pub fn metric_rule_id(group_id: &str, rule_name: &str) -> String {
    format!("{group_id}-{rule_name}")
}

/// Reference stored in a recipient's `notifierName`.
pub fn notifier_ref(cluster: &str, name: &str) -> String {
    format!("{cluster}:{name}")
}

/// Namespace holding the rule objects of one project.
pub fn project_monitor_namespace(monitoring_namespace: &str, project_id: &str) -> String {
    format!("{monitoring_namespace}-{project_id}")
}

/// Name of the persisted `PrometheusRule` for a group.
pub fn rule_object_name(group_id: &str) -> String {
    group_id.replace(':', "-")
}

/// Split a `<first>:<second>` reference. Returns `None` when the separator is missing
/// or either side is empty.
pub fn split_ref(reference: &str) -> Option<(&str, &str)> {
    let (first, second) = reference.split_once(':')?;
    if first.is_empty() || second.is_empty() {
        return None;
    }
    Some((first, second))
}
