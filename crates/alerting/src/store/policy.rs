//! [`PolicyStore`] backed by the alerting custom resources.

use super::PolicyStore;
use crate::crds::{AlertGroup, AlertRule, Notifier};
use crate::types::{AlertState, Error, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct KubePolicyStore {
    client: Client,
    cluster_name: String,
}

impl KubePolicyStore {
    pub fn new(client: Client, cluster_name: impl Into<String>) -> Self {
        Self {
            client,
            cluster_name: cluster_name.into(),
        }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn key<K: ResourceExt>(obj: &K) -> Result<(String, String)> {
        let namespace = obj.namespace().ok_or(Error::MissingObjectKey)?;
        Ok((namespace, obj.name_any()))
    }
}

/// Merge patch writing `status.state` with the observed resource version.
fn state_patch(resource_version: Option<String>, state: AlertState) -> serde_json::Value {
    json!({
        "metadata": { "resourceVersion": resource_version },
        "status": { "state": state }
    })
}

#[async_trait]
impl PolicyStore for KubePolicyStore {
    async fn list_groups(&self) -> Result<Vec<AlertGroup>> {
        let api: Api<AlertGroup> = Api::all(self.client.clone());
        let groups = api.list(&ListParams::default()).await?;
        Ok(groups
            .items
            .into_iter()
            .filter(|g| g.spec.cluster_name == self.cluster_name)
            .collect())
    }

    async fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let api: Api<AlertRule> = Api::all(self.client.clone());
        let rules = api.list(&ListParams::default()).await?;
        Ok(rules
            .items
            .into_iter()
            .filter(|r| r.spec.cluster_name == self.cluster_name)
            .collect())
    }

    async fn list_notifiers(&self) -> Result<Vec<Notifier>> {
        let api: Api<Notifier> = Api::all(self.client.clone());
        let notifiers = api.list(&ListParams::default()).await?;
        Ok(notifiers
            .items
            .into_iter()
            .filter(|n| n.spec.cluster_name == self.cluster_name)
            .collect())
    }

    #[instrument(skip(self, group), fields(group = %group.name_any(), state = %state))]
    async fn update_group_state(&self, group: &AlertGroup, state: AlertState) -> Result<()> {
        let (namespace, name) = Self::key(group)?;
        let api: Api<AlertGroup> = self.namespaced(&namespace);
        let patch = state_patch(group.resource_version(), state);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, format!("AlertGroup {namespace}/{name}")))?;
        debug!("Updated AlertGroup state");
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule = %rule.name_any(), state = %state))]
    async fn update_rule_state(&self, rule: &AlertRule, state: AlertState) -> Result<()> {
        let (namespace, name) = Self::key(rule)?;
        let api: Api<AlertRule> = self.namespaced(&namespace);
        let patch = state_patch(rule.resource_version(), state);
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, format!("AlertRule {namespace}/{name}")))?;
        debug!("Updated AlertRule state");
        Ok(())
    }

    async fn delete_rule(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<AlertRule> = self.namespaced(namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace, name, "Deleted AlertRule");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_group_rules(&self, group_id: &str) -> Result<usize> {
        // groupId lives in the spec, so field selectors cannot be used here
        let mut deleted = 0;
        for rule in self.list_rules().await? {
            if rule.spec.group_id != group_id {
                continue;
            }
            let (namespace, name) = Self::key(&rule)?;
            self.delete_rule(&namespace, &name).await?;
            deleted += 1;
        }
        info!(deleted, "Deleted rules of removed AlertGroup");
        Ok(deleted)
    }

    async fn create_group(&self, group: &AlertGroup) -> Result<()> {
        let (namespace, name) = Self::key(group)?;
        let api: Api<AlertGroup> = self.namespaced(&namespace);
        match api.create(&PostParams::default(), group).await {
            Ok(_) => {
                info!(namespace = %namespace, name = %name, "Created AlertGroup");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(namespace = %namespace, name = %name, "AlertGroup already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_rule(&self, rule: &AlertRule) -> Result<()> {
        let (namespace, name) = Self::key(rule)?;
        let api: Api<AlertRule> = self.namespaced(&namespace);
        match api.create(&PostParams::default(), rule).await {
            Ok(_) => {
                info!(namespace = %namespace, name = %name, "Created AlertRule");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(namespace = %namespace, name = %name, "AlertRule already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
