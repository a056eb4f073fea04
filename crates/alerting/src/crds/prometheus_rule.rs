//! Minimal `PrometheusRule` (monitoring.coreos.com/v1) binding
//!
//! Only the fields written by the config syncer are modelled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label marking rule objects owned by the alerting controller.
pub const RULE_SOURCE_LABEL: &str = "source";
pub const RULE_SOURCE_VALUE: &str = "alerting";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "monitoring.coreos.com", version = "v1", kind = "PrometheusRule")]
#[kube(namespaced)]
pub struct PrometheusRuleSpec {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RuleGroup {
    pub name: String,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct Rule {
    pub alert: String,
    pub expr: String,

    #[serde(rename = "for", default, skip_serializing_if = "String::is_empty")]
    pub for_: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}
