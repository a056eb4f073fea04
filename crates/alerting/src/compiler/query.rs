//! Placeholder values for metric expressions, one builder per resource kind.

use crate::crds::{MetricTarget, ResourceKind};
use crate::store::ClusterResources;
use crate::types::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub type Placeholders = BTreeMap<&'static str, String>;

pub const CLUSTER_NAME: &str = "cluster_name";
pub const NAMESPACE: &str = "namespace";
pub const INSTANCE: &str = "instance";
pub const POD_NAME: &str = "pod_name";
pub const NODE_NAME: &str = "node_name";

const MATCH_ALL: &str = ".*";

/// Produces the placeholder values that narrow an expression to its target.
#[async_trait]
pub trait QueryConditionBuilder: Send + Sync {
    async fn placeholders(
        &self,
        target: &MetricTarget,
        resources: &dyn ClusterResources,
    ) -> Result<Placeholders>;
}

/// Whole-cluster expressions match every instance.
pub struct ClusterQuery;

#[async_trait]
impl QueryConditionBuilder for ClusterQuery {
    async fn placeholders(&self, _: &MetricTarget, _: &dyn ClusterResources) -> Result<Placeholders> {
        Ok(Placeholders::new())
    }
}

pub struct NodeQuery;

#[async_trait]
impl QueryConditionBuilder for NodeQuery {
    async fn placeholders(
        &self,
        target: &MetricTarget,
        resources: &dyn ClusterResources,
    ) -> Result<Placeholders> {
        let (instance, node_name) = match &target.name_selector {
            Some(name) if !name.is_empty() => (format!("{name}.*"), format!("{name}.*")),
            _ => {
                let nodes = resources.list_nodes(&target.label_selector).await?;
                let instances: Vec<String> =
                    nodes.iter().map(|n| format!("{}.*", endpoint_address(n))).collect();
                let names: Vec<String> = nodes.iter().map(|o| o.name_any()).collect();
                (alternation(&instances), alternation(&names))
            }
        };
        Ok(Placeholders::from([(INSTANCE, instance), (NODE_NAME, node_name)]))
    }
}

/// Pod and workload expressions are keyed on pod names.
pub struct PodQuery;

#[async_trait]
impl QueryConditionBuilder for PodQuery {
    async fn placeholders(
        &self,
        target: &MetricTarget,
        resources: &dyn ClusterResources,
    ) -> Result<Placeholders> {
        let pod_name = match &target.name_selector {
            Some(name) if !name.is_empty() => format!("{name}.*"),
            _ => {
                let pods = resources.list_pods(&target.label_selector).await?;
                let names: Vec<String> = pods.iter().map(|o| o.name_any()).collect();
                alternation(&names)
            }
        };
        Ok(Placeholders::from([(POD_NAME, pod_name)]))
    }
}

fn alternation(items: &[String]) -> String {
    format!("({})", items.join("|"))
}

/// InternalIP, then ExternalIP, then the node name.
fn endpoint_address(node: &Node) -> String {
    let addresses = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .cloned()
        .unwrap_or_default();
    ["InternalIP", "ExternalIP"]
        .iter()
        .find_map(|kind| {
            addresses
                .iter()
                .find(|a| a.type_ == *kind)
                .map(|a| a.address.clone())
        })
        .unwrap_or_else(|| node.name_any())
}

/// Strategy table from resource kind to builder.
#[derive(Clone)]
pub struct QueryConditions {
    builders: HashMap<ResourceKind, Arc<dyn QueryConditionBuilder>>,
}

impl Default for QueryConditions {
    fn default() -> Self {
        let pods: Arc<dyn QueryConditionBuilder> = Arc::new(PodQuery);
        let mut builders: HashMap<ResourceKind, Arc<dyn QueryConditionBuilder>> = HashMap::new();
        builders.insert(ResourceKind::Cluster, Arc::new(ClusterQuery));
        builders.insert(ResourceKind::Node, Arc::new(NodeQuery));
        builders.insert(ResourceKind::Workload, pods.clone());
        builders.insert(ResourceKind::Pod, pods);
        Self { builders }
    }
}

impl QueryConditions {
    pub fn register(&mut self, kind: ResourceKind, builder: Arc<dyn QueryConditionBuilder>) {
        self.builders.insert(kind, builder);
    }

    /// Placeholder values for a target, starting from match-all defaults.
    pub async fn resolve(
        &self,
        cluster_name: &str,
        target: &MetricTarget,
        resources: &dyn ClusterResources,
    ) -> Result<Placeholders> {
        let mut values = Placeholders::from([
            (CLUSTER_NAME, cluster_name.to_string()),
            (NAMESPACE, MATCH_ALL.to_string()),
            (INSTANCE, MATCH_ALL.to_string()),
            (POD_NAME, MATCH_ALL.to_string()),
            (NODE_NAME, MATCH_ALL.to_string()),
        ]);
        if let Some(builder) = self.builders.get(&target.resource_kind) {
            values.extend(builder.placeholders(target, resources).await?);
        }
        Ok(values)
    }
}
