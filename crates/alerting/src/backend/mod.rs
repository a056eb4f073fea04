//! Delivery backend (Alertmanager) seam.

pub mod alertmanager;
pub mod deploy;

pub use alertmanager::{AlertmanagerClient, Endpoint};
pub use deploy::DeploymentFlag;

use crate::types::{AlertState, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert as reported by `GET /api/v2/alerts`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAlert {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub status: AlertStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    /// `active`, `suppressed` or `unprocessed`
    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub silenced_by: Vec<String>,

    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

impl ActiveAlert {
    pub fn is_suppressed(&self) -> bool {
        self.status.state == "suppressed"
    }
}

/// Operations the syncers and watchers need from the delivery backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    async fn list_alerts(&self) -> Result<Vec<ActiveAlert>>;

    /// Silence every alert whose `label` equals `value`.
    async fn add_silence(&self, label: &str, value: &str) -> Result<()>;

    /// Expire the silences created for `label=value`.
    async fn remove_silence(&self, label: &str, value: &str) -> Result<()>;

    async fn push_alert(&self, labels: &BTreeMap<String, String>) -> Result<()>;
}

/// State of a group or rule as seen by the backend.
///
/// No alert carrying `label=value` means `active`; if every such alert is
/// suppressed the object is `muted`, otherwise it is `alerting`.
pub fn external_state(alerts: &[ActiveAlert], label: &str, value: &str) -> AlertState {
    let mut matched = alerts
        .iter()
        .filter(|a| a.labels.get(label).is_some_and(|v| v == value))
        .peekable();

    if matched.peek().is_none() {
        return AlertState::Active;
    }
    if matched.all(ActiveAlert::is_suppressed) {
        AlertState::Muted
    } else {
        AlertState::Alerting
    }
}
