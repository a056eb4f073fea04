//! In-memory stores and backend shared by the integration tests.

#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

use alerting::backend::{ActiveAlert, AlertStatus, DeliveryBackend};
use alerting::crds::{
    AlertGroup, AlertGroupSpec, AlertGroupStatus, AlertRule, AlertRuleSpec, AlertRuleStatus,
    Comparison, MetricRule, Notifier, NotifierConfig, NotifierSpec, PolicyScope, PrometheusRule,
    Recipient, RuleCondition, Severity, SlackConfig, Timing,
};
use alerting::store::{ClusterResources, ConfigStore, PolicyStore, Workload, WorkloadId};
use alerting::types::group_id;
use alerting::{AlertState, Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ComponentStatus, Node, Pod};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const CLUSTER: &str = "c-1";
pub const MONITORING_NAMESPACE: &str = "platform-monitoring";

// =============================================================================
// Builders
// =============================================================================

pub fn group(name: &str, recipients: Vec<Recipient>) -> AlertGroup {
    let mut group = AlertGroup::new(
        name,
        AlertGroupSpec {
            cluster_name: CLUSTER.to_string(),
            scope: PolicyScope::Cluster,
            display_name: name.to_string(),
            description: String::new(),
            recipients,
            timing: Timing::default(),
        },
    );
    group.metadata.namespace = Some(CLUSTER.to_string());
    group.metadata.resource_version = Some("1".to_string());
    group
}

pub fn with_group_state(mut group: AlertGroup, state: AlertState) -> AlertGroup {
    group.status = Some(AlertGroupStatus { state });
    group
}

pub fn rule(name: &str, group_name: &str, condition: RuleCondition) -> AlertRule {
    let mut rule = AlertRule::new(
        name,
        AlertRuleSpec {
            cluster_name: CLUSTER.to_string(),
            scope: PolicyScope::Cluster,
            group_id: group_id(CLUSTER, group_name),
            display_name: String::new(),
            severity: Severity::Critical,
            timing: None,
            condition,
        },
    );
    rule.metadata.namespace = Some(CLUSTER.to_string());
    rule.metadata.resource_version = Some("1".to_string());
    rule
}

pub fn with_rule_state(mut rule: AlertRule, state: AlertState) -> AlertRule {
    rule.status = Some(AlertRuleStatus { state });
    rule
}

pub fn metric(expression: &str, comparison: Comparison, threshold_value: f64) -> RuleCondition {
    RuleCondition::Metric(MetricRule {
        expression: expression.to_string(),
        comparison,
        threshold_value,
        duration: "3m".to_string(),
        target: None,
    })
}

pub fn slack_notifier(name: &str) -> Notifier {
    let mut notifier = Notifier::new(
        name,
        NotifierSpec {
            cluster_name: CLUSTER.to_string(),
            display_name: name.to_string(),
            config: NotifierConfig::Slack(SlackConfig {
                url: "https://hooks.slack.com/services/T000/B000/XXXX".to_string(),
                default_recipient: "#alerts".to_string(),
            }),
        },
    );
    notifier.metadata.namespace = Some(CLUSTER.to_string());
    notifier
}

pub fn recipient(notifier: &str) -> Recipient {
    Recipient {
        notifier_name: format!("{CLUSTER}:{notifier}"),
        recipient: String::new(),
    }
}

pub fn firing(label: &str, value: &str, state: &str) -> ActiveAlert {
    ActiveAlert {
        labels: BTreeMap::from([(label.to_string(), value.to_string())]),
        status: AlertStatus {
            state: state.to_string(),
            ..Default::default()
        },
        fingerprint: None,
    }
}

// =============================================================================
// Policy store
// =============================================================================

#[derive(Default)]
pub struct FakePolicyStore {
    pub groups: Mutex<Vec<AlertGroup>>,
    pub rules: Mutex<Vec<AlertRule>>,
    pub notifiers: Mutex<Vec<Notifier>>,
    /// `(object name, state)` per status write
    pub state_writes: Mutex<Vec<(String, AlertState)>>,
    pub deleted_rules: Mutex<Vec<String>>,
}

impl FakePolicyStore {
    pub fn new(groups: Vec<AlertGroup>, rules: Vec<AlertRule>, notifiers: Vec<Notifier>) -> Self {
        Self {
            groups: Mutex::new(groups),
            rules: Mutex::new(rules),
            notifiers: Mutex::new(notifiers),
            ..Default::default()
        }
    }

    pub fn state_writes(&self) -> Vec<(String, AlertState)> {
        self.state_writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyStore for FakePolicyStore {
    async fn list_groups(&self) -> Result<Vec<AlertGroup>> {
        Ok(self.groups.lock().unwrap().clone())
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn list_notifiers(&self) -> Result<Vec<Notifier>> {
        Ok(self.notifiers.lock().unwrap().clone())
    }

    async fn update_group_state(&self, group: &AlertGroup, state: AlertState) -> Result<()> {
        let mut groups = self.groups.lock().unwrap();
        let stored = groups
            .iter_mut()
            .find(|g| g.name_any() == group.name_any())
            .ok_or_else(|| Error::Conflict(group.name_any()))?;
        stored.status = Some(AlertGroupStatus { state });
        self.state_writes
            .lock()
            .unwrap()
            .push((group.name_any(), state));
        Ok(())
    }

    async fn update_rule_state(&self, rule: &AlertRule, state: AlertState) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        let stored = rules
            .iter_mut()
            .find(|r| r.name_any() == rule.name_any())
            .ok_or_else(|| Error::Conflict(rule.name_any()))?;
        stored.status = Some(AlertRuleStatus { state });
        self.state_writes
            .lock()
            .unwrap()
            .push((rule.name_any(), state));
        Ok(())
    }

    async fn delete_rule(&self, _namespace: &str, name: &str) -> Result<()> {
        self.rules.lock().unwrap().retain(|r| r.name_any() != name);
        self.deleted_rules.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn delete_group_rules(&self, group_id: &str) -> Result<usize> {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|r| r.spec.group_id != group_id);
        Ok(before - rules.len())
    }

    async fn create_group(&self, group: &AlertGroup) -> Result<()> {
        let mut groups = self.groups.lock().unwrap();
        if !groups.iter().any(|g| g.name_any() == group.name_any()) {
            groups.push(group.clone());
        }
        Ok(())
    }

    async fn create_rule(&self, rule: &AlertRule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        if !rules.iter().any(|r| r.name_any() == rule.name_any()) {
            rules.push(rule.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Config store
// =============================================================================

#[derive(Default)]
pub struct FakeConfigStore {
    pub objects: Mutex<BTreeMap<(String, String), PrometheusRule>>,
    pub config: Mutex<Option<String>>,
    pub namespaces: Mutex<Vec<String>>,
    pub config_writes: Mutex<usize>,
}

impl FakeConfigStore {
    pub fn config(&self) -> Option<String> {
        self.config.lock().unwrap().clone()
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<PrometheusRule> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

fn object_key(rule: &PrometheusRule) -> (String, String) {
    (rule.namespace().unwrap_or_default(), rule.name_any())
}

#[async_trait]
impl ConfigStore for FakeConfigStore {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let mut namespaces = self.namespaces.lock().unwrap();
        if !namespaces.iter().any(|n| n == name) {
            namespaces.push(name.to_string());
        }
        Ok(())
    }

    async fn get_rule_object(&self, namespace: &str, name: &str) -> Result<Option<PrometheusRule>> {
        Ok(self.object(namespace, name))
    }

    async fn create_rule_object(&self, rule: &PrometheusRule) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(object_key(rule), rule.clone());
        Ok(())
    }

    async fn replace_rule_object(&self, rule: &PrometheusRule) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(object_key(rule), rule.clone());
        Ok(())
    }

    async fn list_rule_objects(&self) -> Result<Vec<PrometheusRule>> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn delete_rule_object(&self, namespace: &str, name: &str) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn current_config(&self) -> Result<Option<String>> {
        Ok(self.config())
    }

    async fn write_config(&self, config_yaml: &str, _template: &str) -> Result<()> {
        *self.config.lock().unwrap() = Some(config_yaml.to_string());
        *self.config_writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn config_exists(&self) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// Cluster resources
// =============================================================================

/// A cluster with no pods, nodes or workloads.
#[derive(Default)]
pub struct EmptyCluster;

#[async_trait]
impl ClusterResources for EmptyCluster {
    async fn get_pod(&self, _namespace: &str, _name: &str) -> Result<Option<Pod>> {
        Ok(None)
    }

    async fn list_pods(&self, _labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        Ok(Vec::new())
    }

    async fn list_pods_on_node(&self, _node_name: &str) -> Result<Vec<Pod>> {
        Ok(Vec::new())
    }

    async fn get_node(&self, _name: &str) -> Result<Option<Node>> {
        Ok(None)
    }

    async fn list_nodes(&self, _labels: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        Ok(Vec::new())
    }

    async fn list_component_statuses(&self) -> Result<Vec<ComponentStatus>> {
        Ok(Vec::new())
    }

    async fn project_namespaces(&self, _project_id: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_workload(&self, _id: &WorkloadId) -> Result<Option<Workload>> {
        Ok(None)
    }

    async fn list_workloads(
        &self,
        _namespace: &str,
        _labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// Delivery backend
// =============================================================================

#[derive(Default)]
pub struct FakeBackend {
    pub alerts: Mutex<Vec<ActiveAlert>>,
    pub silences_added: Mutex<Vec<(String, String)>>,
    pub silences_removed: Mutex<Vec<(String, String)>>,
    pub pushed: Mutex<Vec<BTreeMap<String, String>>>,
}

impl FakeBackend {
    pub fn with_alerts(alerts: Vec<ActiveAlert>) -> Self {
        Self {
            alerts: Mutex::new(alerts),
            ..Default::default()
        }
    }

    pub fn added(&self) -> usize {
        self.silences_added.lock().unwrap().len()
    }

    pub fn removed(&self) -> usize {
        self.silences_removed.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryBackend for FakeBackend {
    async fn list_alerts(&self) -> Result<Vec<ActiveAlert>> {
        Ok(self.alerts.lock().unwrap().clone())
    }

    async fn add_silence(&self, label: &str, value: &str) -> Result<()> {
        self.silences_added
            .lock()
            .unwrap()
            .push((label.to_string(), value.to_string()));
        Ok(())
    }

    async fn remove_silence(&self, label: &str, value: &str) -> Result<()> {
        self.silences_removed
            .lock()
            .unwrap()
            .push((label.to_string(), value.to_string()));
        Ok(())
    }

    async fn push_alert(&self, labels: &BTreeMap<String, String>) -> Result<()> {
        self.pushed.lock().unwrap().push(labels.clone());
        Ok(())
    }
}
