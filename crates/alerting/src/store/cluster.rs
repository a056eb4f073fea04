//! [`ClusterResources`] over the core and apps APIs, plus the workload
//! abstraction used by the workload watcher.

use super::{label_selector, ClusterResources};
use crate::types::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ComponentStatus, Namespace, Node, Pod};
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
    Job,
    CronJob,
}

impl WorkloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::DaemonSet => "daemonset",
            WorkloadKind::ReplicaSet => "replicaset",
            WorkloadKind::Job => "job",
            WorkloadKind::CronJob => "cronjob",
        }
    }

    /// Run-to-completion kinds have no steady replica count.
    pub fn is_batch(self) -> bool {
        matches!(self, WorkloadKind::Job | WorkloadKind::CronJob)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(WorkloadKind::Deployment),
            "statefulset" => Ok(WorkloadKind::StatefulSet),
            "daemonset" => Ok(WorkloadKind::DaemonSet),
            "replicaset" => Ok(WorkloadKind::ReplicaSet),
            "job" => Ok(WorkloadKind::Job),
            "cronjob" => Ok(WorkloadKind::CronJob),
            other => Err(Error::Config(format!("unknown workload kind '{other}'"))),
        }
    }
}

/// `<kind>:<namespace>:<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadId {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl FromStr for WorkloadId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(namespace), Some(name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(WorkloadId {
                    kind: kind.parse()?,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::Config(format!("invalid workload ID '{s}'"))),
        }
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.namespace, self.name)
    }
}

/// Replica view shared by every workload kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub desired_replicas: i32,
    pub available_replicas: i32,
}

impl Workload {
    fn from_deployment(d: &Deployment) -> Self {
        Workload {
            kind: WorkloadKind::Deployment,
            namespace: d.namespace().unwrap_or_default(),
            name: d.name_any(),
            desired_replicas: d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            available_replicas: d
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0),
        }
    }

    fn from_stateful_set(s: &StatefulSet) -> Self {
        Workload {
            kind: WorkloadKind::StatefulSet,
            namespace: s.namespace().unwrap_or_default(),
            name: s.name_any(),
            desired_replicas: s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            available_replicas: s
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0),
        }
    }

    fn from_daemon_set(d: &DaemonSet) -> Self {
        let status = d.status.as_ref();
        Workload {
            kind: WorkloadKind::DaemonSet,
            namespace: d.namespace().unwrap_or_default(),
            name: d.name_any(),
            desired_replicas: status.map_or(0, |s| s.desired_number_scheduled),
            available_replicas: status.and_then(|s| s.number_available).unwrap_or(0),
        }
    }

    fn from_replica_set(r: &ReplicaSet) -> Self {
        Workload {
            kind: WorkloadKind::ReplicaSet,
            namespace: r.namespace().unwrap_or_default(),
            name: r.name_any(),
            desired_replicas: r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            available_replicas: r
                .status
                .as_ref()
                .and_then(|s| s.available_replicas)
                .unwrap_or(0),
        }
    }

    fn batch(kind: WorkloadKind, namespace: String, name: String) -> Self {
        Workload {
            kind,
            namespace,
            name,
            desired_replicas: 0,
            available_replicas: 0,
        }
    }
}

#[derive(Clone)]
pub struct KubeClusterResources {
    client: Client,
    project_label: String,
}

impl KubeClusterResources {
    pub fn new(client: Client, project_label: impl Into<String>) -> Self {
        Self {
            client,
            project_label: project_label.into(),
        }
    }
}

fn list_params(labels: &BTreeMap<String, String>) -> ListParams {
    if labels.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&label_selector(labels))
    }
}

/// Namespaced API, or every namespace when `namespace` is empty.
fn workload_api<K>(client: Client, namespace: &str) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

#[async_trait]
impl ClusterResources for KubeClusterResources {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&list_params(labels)).await?.items)
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!(
            "spec.nodeName={node_name},status.phase!=Succeeded,status.phase!=Failed"
        ));
        Ok(api.list(&params).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_nodes(&self, labels: &BTreeMap<String, String>) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&list_params(labels)).await?.items)
    }

    async fn list_component_statuses(&self) -> Result<Vec<ComponentStatus>> {
        let api: Api<ComponentStatus> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn project_namespaces(&self, project_id: &str) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{}={project_id}", self.project_label));
        Ok(api
            .list(&params)
            .await?
            .items
            .iter()
            .map(|ns| ns.name_any())
            .collect())
    }

    async fn get_workload(&self, id: &WorkloadId) -> Result<Option<Workload>> {
        let client = self.client.clone();
        let ns = id.namespace.as_str();
        let name = id.name.as_str();
        let workload = match id.kind {
            WorkloadKind::Deployment => Api::<Deployment>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|d| Workload::from_deployment(&d)),
            WorkloadKind::StatefulSet => Api::<StatefulSet>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|s| Workload::from_stateful_set(&s)),
            WorkloadKind::DaemonSet => Api::<DaemonSet>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|d| Workload::from_daemon_set(&d)),
            WorkloadKind::ReplicaSet => Api::<ReplicaSet>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|r| Workload::from_replica_set(&r)),
            WorkloadKind::Job => Api::<Job>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|j| Workload::batch(WorkloadKind::Job, j.namespace().unwrap_or_default(), j.name_any())),
            WorkloadKind::CronJob => Api::<CronJob>::namespaced(client, ns)
                .get_opt(name)
                .await?
                .map(|c| Workload::batch(WorkloadKind::CronJob, c.namespace().unwrap_or_default(), c.name_any())),
        };
        Ok(workload)
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>> {
        let params = list_params(labels);
        let mut workloads = Vec::new();

        let deployments: Api<Deployment> = workload_api(self.client.clone(), namespace);
        workloads.extend(deployments.list(&params).await?.items.iter().map(Workload::from_deployment));

        let stateful_sets: Api<StatefulSet> = workload_api(self.client.clone(), namespace);
        workloads.extend(stateful_sets.list(&params).await?.items.iter().map(Workload::from_stateful_set));

        let daemon_sets: Api<DaemonSet> = workload_api(self.client.clone(), namespace);
        workloads.extend(daemon_sets.list(&params).await?.items.iter().map(Workload::from_daemon_set));

        // replica sets owned by a deployment are covered by the deployment
        let replica_sets: Api<ReplicaSet> = workload_api(self.client.clone(), namespace);
        workloads.extend(
            replica_sets
                .list(&params)
                .await?
                .items
                .iter()
                .filter(|r| r.owner_references().is_empty())
                .map(Workload::from_replica_set),
        );

        Ok(workloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workload_ids() {
        let id: WorkloadId = "deployment:shop:web".parse().unwrap();
        assert_eq!(id.kind, WorkloadKind::Deployment);
        assert_eq!(id.namespace, "shop");
        assert_eq!(id.name, "web");
        assert_eq!(id.to_string(), "deployment:shop:web");

        let id: WorkloadId = "CronJob:ops:backup".parse().unwrap();
        assert!(id.kind.is_batch());
    }

    #[test]
    fn rejects_malformed_workload_ids() {
        assert!("deployment:shop".parse::<WorkloadId>().is_err());
        assert!("pet:shop:web".parse::<WorkloadId>().is_err());
        assert!("deployment::web".parse::<WorkloadId>().is_err());
    }

    #[test]
    fn deployment_defaults_to_one_desired_replica() {
        let mut d = Deployment::default();
        d.metadata.name = Some("web".to_string());
        d.metadata.namespace = Some("shop".to_string());
        let w = Workload::from_deployment(&d);
        assert_eq!(w.desired_replicas, 1);
        assert_eq!(w.available_replicas, 0);
        assert_eq!(w.kind, WorkloadKind::Deployment);
    }
}
