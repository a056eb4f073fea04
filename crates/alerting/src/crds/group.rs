//! `AlertGroup` Custom Resource Definition

use super::{PolicyScope, Timing};
use crate::types::{group_id, AlertState};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One delivery target of a group.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct Recipient {
    /// Notifier reference, `<cluster>:<notifier name>`
    #[serde(rename = "notifierName")]
    pub notifier_name: String,

    /// Replaces the notifier's default key, URL, channel or address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recipient: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "alerting.platform", version = "v1", kind = "AlertGroup")]
#[kube(namespaced)]
#[kube(status = "AlertGroupStatus")]
#[kube(printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct AlertGroupSpec {
    #[serde(rename = "clusterName")]
    pub cluster_name: String,

    #[serde(default)]
    pub scope: PolicyScope,

    #[serde(rename = "displayName", default)]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub recipients: Vec<Recipient>,

    #[serde(default)]
    pub timing: Timing,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct AlertGroupStatus {
    #[serde(default)]
    pub state: AlertState,
}

impl AlertGroup {
    /// `<namespace>:<name>`
    pub fn group_id(&self) -> String {
        group_id(&self.namespace().unwrap_or_default(), &self.name_any())
    }

    pub fn state(&self) -> AlertState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
