//! `AlertRule` Custom Resource Definition
//!
//! Every rule carries exactly one condition. Metric conditions are compiled
//! into `PrometheusRule` objects; every other kind is evaluated by a watcher.

use super::{PolicyScope, Timing};
use crate::types::AlertState;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    #[default]
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
}

impl Comparison {
    /// PromQL operator for this comparison.
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessOrEqual => "<=",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Equal => "equal",
            Comparison::NotEqual => "not-equal",
            Comparison::GreaterThan => "greater-than",
            Comparison::LessThan => "less-than",
            Comparison::GreaterOrEqual => "greater-or-equal",
            Comparison::LessOrEqual => "less-or-equal",
        }
    }
}

/// Resource kind a metric expression is scoped to.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Cluster,
    Node,
    Workload,
    Pod,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Node => "node",
            ResourceKind::Workload => "workload",
            ResourceKind::Pod => "pod",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MetricTarget {
    #[serde(rename = "resourceKind", default)]
    pub resource_kind: ResourceKind,

    /// Name prefix of the node, pod or workload
    #[serde(rename = "nameSelector", default, skip_serializing_if = "Option::is_none")]
    pub name_selector: Option<String>,

    #[serde(rename = "labelSelector", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selector: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct MetricRule {
    /// PromQL template; `${cluster_name}`, `${namespace}`, `${instance}`,
    /// `${pod_name}` and `${node_name}` are substituted at compile time
    pub expression: String,

    pub comparison: Comparison,

    #[serde(rename = "thresholdValue")]
    pub threshold_value: f64,

    /// Prometheus `for` duration, e.g. `3m`
    pub duration: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<MetricTarget>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct EventRule {
    /// `Normal` or `Warning`
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// Kind of the involved object, e.g. `Pod`
    #[serde(rename = "resourceKind")]
    pub resource_kind: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct SystemServiceRule {
    /// Prefix matched against component status names
    #[serde(rename = "componentPrefix")]
    pub component_prefix: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct WorkloadRule {
    /// `<kind>:<namespace>:<name>`
    #[serde(rename = "workloadId", default, skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,

    /// Minimum share of desired replicas that must be available; 0 disables the check
    #[serde(rename = "availablePercentage")]
    pub available_percentage: u32,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum PodCondition {
    NotRunning,
    NotScheduled,
    RestartCount,
}

fn default_restart_times() -> u32 {
    3
}

fn default_restart_interval() -> u64 {
    300
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct PodRule {
    /// `<namespace>:<pod name>`
    #[serde(rename = "podName")]
    pub pod_name: String,

    pub condition: PodCondition,

    #[serde(rename = "restartTimes", default = "default_restart_times")]
    pub restart_times: u32,

    #[serde(rename = "restartIntervalSeconds", default = "default_restart_interval")]
    pub restart_interval_seconds: u64,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum NodeCondition {
    NotReady,
    Mem,
    Cpu,
}

impl NodeCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeCondition::NotReady => "not-ready",
            NodeCondition::Mem => "mem",
            NodeCondition::Cpu => "cpu",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct NodeRule {
    #[serde(rename = "nodeName", default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,

    pub condition: NodeCondition,

    /// Percent of allocatable memory requested
    #[serde(rename = "memThreshold", default)]
    pub mem_threshold: u32,

    /// Percent of allocatable CPU requested
    #[serde(rename = "cpuThreshold", default)]
    pub cpu_threshold: u32,
}

/// Condition of a rule; exactly one kind per rule.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RuleCondition {
    Metric(MetricRule),
    Event(EventRule),
    SystemService(SystemServiceRule),
    Workload(WorkloadRule),
    Pod(PodRule),
    Node(NodeRule),
}

impl RuleCondition {
    /// Value of the `alert_type` label for alerts raised by this condition.
    pub fn alert_type(&self) -> &'static str {
        match self {
            RuleCondition::Metric(_) => "metric",
            RuleCondition::Event(_) => "event",
            RuleCondition::SystemService(_) => "systemService",
            RuleCondition::Workload(_) => "workload",
            RuleCondition::Pod(_) => "pod",
            RuleCondition::Node(_) => "node",
        }
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "alerting.platform", version = "v1", kind = "AlertRule")]
#[kube(namespaced)]
#[kube(status = "AlertRuleStatus")]
#[kube(printcolumn = r#"{"name":"Group","type":"string","jsonPath":".spec.groupId"}"#)]
#[kube(printcolumn = r#"{"name":"Severity","type":"string","jsonPath":".spec.severity"}"#)]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct AlertRuleSpec {
    #[serde(rename = "clusterName")]
    pub cluster_name: String,

    #[serde(default)]
    pub scope: PolicyScope,

    /// `GroupID` of the owning group
    #[serde(rename = "groupId")]
    pub group_id: String,

    #[serde(rename = "displayName", default)]
    pub display_name: String,

    #[serde(default)]
    pub severity: Severity,

    /// Overrides the group's timing for this rule's route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,

    pub condition: RuleCondition,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct AlertRuleStatus {
    #[serde(default)]
    pub state: AlertState,
}

impl AlertRule {
    pub fn state(&self) -> AlertState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn is_inactive(&self) -> bool {
        self.state() == AlertState::Inactive
    }

    /// Display name, falling back to the object name.
    pub fn alert_name(&self) -> String {
        if self.spec.display_name.is_empty() {
            kube::ResourceExt::name_any(self)
        } else {
            self.spec.display_name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_symbols() {
        let cases = [
            ("equal", "=="),
            ("not-equal", "!="),
            ("greater-than", ">"),
            ("less-than", "<"),
            ("greater-or-equal", ">="),
            ("less-or-equal", "<="),
        ];
        for (name, symbol) in cases {
            let cmp: Comparison = serde_json::from_value(serde_json::json!(name)).unwrap();
            assert_eq!(cmp.symbol(), symbol);
            assert_eq!(cmp.as_str(), name);
        }
    }

    #[test]
    fn condition_is_a_single_tagged_variant() {
        let spec: AlertRuleSpec = serde_json::from_value(serde_json::json!({
            "clusterName": "c-1",
            "groupId": "c-1:etcd-alert",
            "severity": "critical",
            "condition": {
                "pod": {
                    "podName": "default:web-0",
                    "condition": "restart-count",
                    "restartTimes": 3,
                    "restartIntervalSeconds": 60
                }
            }
        }))
        .unwrap();
        assert_eq!(spec.severity, Severity::Critical);
        match spec.condition {
            RuleCondition::Pod(pod) => {
                assert_eq!(pod.condition, PodCondition::RestartCount);
                assert_eq!(pod.restart_times, 3);
                assert_eq!(pod.restart_interval_seconds, 60);
            }
            other => panic!("unexpected condition {other:?}"),
        }
    }

    #[test]
    fn two_conditions_are_rejected() {
        let result = serde_json::from_value::<AlertRuleSpec>(serde_json::json!({
            "clusterName": "c-1",
            "groupId": "c-1:g",
            "condition": {
                "event": {"eventType": "Warning", "resourceKind": "Pod"},
                "systemService": {"componentPrefix": "etcd"}
            }
        }));
        assert!(result.is_err());
    }
}
