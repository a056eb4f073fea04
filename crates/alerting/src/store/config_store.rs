//! [`ConfigStore`] writing `PrometheusRule` objects and the Alertmanager secret.

use super::ConfigStore;
use crate::crds::{PrometheusRule, RULE_SOURCE_LABEL, RULE_SOURCE_VALUE};
use crate::types::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

/// Key of the serialized Alertmanager configuration in the secret.
pub const CONFIG_KEY: &str = "config.yml";
/// Key of the notification template in the secret.
pub const TEMPLATE_KEY: &str = "notification.tmpl";

#[derive(Clone)]
pub struct KubeConfigStore {
    client: Client,
    secret_namespace: String,
    secret_name: String,
}

impl KubeConfigStore {
    pub fn new(
        client: Client,
        secret_namespace: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            secret_namespace: secret_namespace.into(),
            secret_name: secret_name.into(),
        }
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.secret_namespace)
    }

    fn rules(&self, namespace: &str) -> Api<PrometheusRule> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ConfigStore for KubeConfigStore {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = name, "Created project monitor namespace");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_rule_object(&self, namespace: &str, name: &str) -> Result<Option<PrometheusRule>> {
        Ok(self.rules(namespace).get_opt(name).await?)
    }

    async fn create_rule_object(&self, rule: &PrometheusRule) -> Result<()> {
        let namespace = rule.namespace().ok_or(Error::MissingObjectKey)?;
        match self.rules(&namespace).create(&PostParams::default(), rule).await {
            Ok(_) => {
                info!(namespace = %namespace, name = %rule.name_any(), "Created PrometheusRule");
                Ok(())
            }
            // created by a concurrent pass; the next pass replaces it
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_rule_object(&self, rule: &PrometheusRule) -> Result<()> {
        let namespace = rule.namespace().ok_or(Error::MissingObjectKey)?;
        let name = rule.name_any();
        self.rules(&namespace)
            .replace(&name, &PostParams::default(), rule)
            .await
            .map_err(|e| Error::from_kube(e, format!("PrometheusRule {namespace}/{name}")))?;
        info!(namespace = %namespace, name = %name, "Updated PrometheusRule");
        Ok(())
    }

    async fn list_rule_objects(&self) -> Result<Vec<PrometheusRule>> {
        let api: Api<PrometheusRule> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&format!("{RULE_SOURCE_LABEL}={RULE_SOURCE_VALUE}"));
        Ok(api.list(&params).await?.items)
    }

    async fn delete_rule_object(&self, namespace: &str, name: &str) -> Result<()> {
        match self.rules(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace, name, "Deleted stale PrometheusRule");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn current_config(&self) -> Result<Option<String>> {
        let secret = self.secrets().get(&self.secret_name).await?;
        Ok(secret
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_KEY))
            .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned()))
    }

    async fn write_config(&self, config_yaml: &str, template: &str) -> Result<()> {
        let api = self.secrets();
        let mut secret = api.get(&self.secret_name).await?;
        let data = secret.data.get_or_insert_with(Default::default);
        data.insert(
            CONFIG_KEY.to_string(),
            ByteString(config_yaml.as_bytes().to_vec()),
        );
        data.insert(
            TEMPLATE_KEY.to_string(),
            ByteString(template.as_bytes().to_vec()),
        );
        api.replace(&self.secret_name, &PostParams::default(), &secret)
            .await
            .map_err(|e| Error::from_kube(e, format!("Secret {}", self.secret_name)))?;
        info!(secret = %self.secret_name, "Updated Alertmanager configuration");
        Ok(())
    }

    async fn config_exists(&self) -> Result<bool> {
        let exists = self.secrets().get_opt(&self.secret_name).await?.is_some();
        debug!(secret = %self.secret_name, exists, "Checked Alertmanager config secret");
        Ok(exists)
    }
}
