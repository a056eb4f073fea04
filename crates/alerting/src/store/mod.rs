//! Storage seams used by the syncers and watchers.
//!
//! The traits are implemented against the Kubernetes API in this module's
//! submodules and by in-memory fakes in tests.

pub mod cluster;
pub mod config_store;
pub mod policy;

pub use cluster::{KubeClusterResources, Workload, WorkloadId, WorkloadKind};
pub use config_store::KubeConfigStore;
pub use policy::KubePolicyStore;

use crate::crds::{AlertGroup, AlertRule, Notifier, PrometheusRule};
use crate::types::{AlertState, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ComponentStatus, Node, Pod};
use std::collections::BTreeMap;

/// Versioned access to the alert policy objects of one cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Groups of this cluster, cluster and project scoped.
    async fn list_groups(&self) -> Result<Vec<AlertGroup>>;

    async fn list_rules(&self) -> Result<Vec<AlertRule>>;

    async fn list_notifiers(&self) -> Result<Vec<Notifier>>;

    /// Write `status.state`, guarded by the group's resource version.
    async fn update_group_state(&self, group: &AlertGroup, state: AlertState) -> Result<()>;

    async fn update_rule_state(&self, rule: &AlertRule, state: AlertState) -> Result<()>;

    async fn delete_rule(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete every rule of a group, returning how many were removed.
    async fn delete_group_rules(&self, group_id: &str) -> Result<usize>;

    /// Create a group; an existing object with the same name is left alone.
    async fn create_group(&self, group: &AlertGroup) -> Result<()>;

    async fn create_rule(&self, rule: &AlertRule) -> Result<()>;
}

/// Persisted compiler output: rule objects and the Alertmanager config secret.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    async fn get_rule_object(&self, namespace: &str, name: &str) -> Result<Option<PrometheusRule>>;

    async fn create_rule_object(&self, rule: &PrometheusRule) -> Result<()>;

    /// Replace an existing object; `rule` carries the resource version read earlier.
    async fn replace_rule_object(&self, rule: &PrometheusRule) -> Result<()>;

    /// Rule objects labelled as owned by the alerting controller.
    async fn list_rule_objects(&self) -> Result<Vec<PrometheusRule>>;

    async fn delete_rule_object(&self, namespace: &str, name: &str) -> Result<()>;

    /// Current `config.yml`. A missing secret is an error, a missing key is `None`.
    async fn current_config(&self) -> Result<Option<String>>;

    async fn write_config(&self, config_yaml: &str, template: &str) -> Result<()>;

    /// Whether the config secret exists at all.
    async fn config_exists(&self) -> Result<bool>;
}

/// Read access to the live cluster objects the watchers evaluate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterResources: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// Pods across all namespaces matching the label selector.
    async fn list_pods(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>>;

    /// Non-terminated pods scheduled on a node.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    async fn list_nodes(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Node>>;

    async fn list_component_statuses(&self) -> Result<Vec<ComponentStatus>>;

    /// Names of the namespaces belonging to a project.
    async fn project_namespaces(&self, project_id: &str) -> Result<Vec<String>>;

    async fn get_workload(&self, id: &WorkloadId) -> Result<Option<Workload>>;

    /// Workloads matching the labels; an empty namespace lists every namespace.
    async fn list_workloads(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>>;
}

/// Render a label map as a `key=value,...` selector string.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
