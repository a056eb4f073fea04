//! `Notifier` Custom Resource Definition

use crate::types::notifier_ref;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct PagerdutyConfig {
    #[serde(rename = "serviceKey")]
    pub service_key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct WebhookConfig {
    pub url: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SlackConfig {
    /// Incoming webhook URL
    pub url: String,

    #[serde(rename = "defaultRecipient")]
    pub default_recipient: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub tls: bool,

    pub sender: String,

    #[serde(rename = "defaultRecipient")]
    pub default_recipient: String,
}

/// Delivery channel of a notifier.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum NotifierConfig {
    Pagerduty(PagerdutyConfig),
    Webhook(WebhookConfig),
    Slack(SlackConfig),
    Smtp(SmtpConfig),
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "alerting.platform", version = "v1", kind = "Notifier")]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct NotifierSpec {
    #[serde(rename = "clusterName")]
    pub cluster_name: String,

    #[serde(rename = "displayName", default)]
    pub display_name: String,

    pub config: NotifierConfig,
}

impl Notifier {
    /// Reference used by recipients, `<cluster>:<name>`.
    pub fn reference(&self) -> String {
        notifier_ref(&self.spec.cluster_name, &self.name_any())
    }
}
