//! Writes compiled output to `PrometheusRule` objects and the Alertmanager
//! config secret. Every pass recompiles from a fresh listing and only writes
//! what changed, so running it twice in a row performs no writes the second
//! time.

use crate::backend::DeploymentFlag;
use crate::compiler::template::NOTIFICATION_TEMPLATE;
use crate::compiler::{CompiledMetricRuleGroup, PolicySnapshot, RuleCompiler};
use crate::rule_ids::RuleIdRegistry;
use crate::store::{ClusterResources, ConfigStore, PolicyStore};
use crate::types::Result;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Writes performed by one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigSyncReport {
    pub rule_objects_created: usize,
    pub rule_objects_updated: usize,
    pub rule_objects_deleted: usize,
    pub config_written: bool,
    /// Alertmanager was not deployed, nothing was looked at.
    pub skipped: bool,
}

impl ConfigSyncReport {
    pub fn writes(&self) -> usize {
        self.rule_objects_created
            + self.rule_objects_updated
            + self.rule_objects_deleted
            + usize::from(self.config_written)
    }
}

pub struct ConfigSyncer {
    policies: Arc<dyn PolicyStore>,
    configs: Arc<dyn ConfigStore>,
    resources: Arc<dyn ClusterResources>,
    compiler: RuleCompiler,
    rule_ids: RuleIdRegistry,
    deployed: DeploymentFlag,
    monitoring_namespace: String,
    /// One pass at a time, so a pass never mixes two snapshots.
    pass_lock: Mutex<()>,
}

impl ConfigSyncer {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        configs: Arc<dyn ConfigStore>,
        resources: Arc<dyn ClusterResources>,
        compiler: RuleCompiler,
        rule_ids: RuleIdRegistry,
        deployed: DeploymentFlag,
        monitoring_namespace: impl Into<String>,
    ) -> Self {
        Self {
            policies,
            configs,
            resources,
            compiler,
            rule_ids,
            deployed,
            monitoring_namespace: monitoring_namespace.into(),
            pass_lock: Mutex::new(()),
        }
    }

    /// Run a full pass whenever the deployment flag asks for one, until
    /// `token` is cancelled.
    pub async fn run_resync(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = self.deployed.resync_requested() => {}
            }
            match self.sync().await {
                Ok(report) => info!(?report, "Alerting config resynced for Alertmanager"),
                Err(e) => error!(error = %e, "Alerting config resync failed"),
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<ConfigSyncReport> {
        let _guard = self.pass_lock.lock().await;
        let mut report = ConfigSyncReport::default();
        if !self.deployed.is_deployed() {
            debug!("Alertmanager not deployed, skipping config sync");
            report.skipped = true;
            return Ok(report);
        }

        let snapshot = PolicySnapshot {
            notifiers: self.policies.list_notifiers().await?,
            groups: live(self.policies.list_groups().await?),
            rules: live(self.policies.list_rules().await?),
        };
        self.rule_ids.retain_rules(&snapshot.rules);

        let compiled = self.compiler.compile(&snapshot, self.resources.as_ref()).await;
        let config_yaml = compiled.render_config()?;

        let mut wanted = HashSet::new();
        for group in &compiled.metric_groups {
            wanted.insert((group.namespace.clone(), group.object_name()));
            self.apply_rule_group(group, &mut report).await?;
        }

        for existing in self.configs.list_rule_objects().await? {
            let namespace = existing.namespace().unwrap_or_default();
            let name = existing.name_any();
            if !wanted.contains(&(namespace.clone(), name.clone())) {
                self.configs.delete_rule_object(&namespace, &name).await?;
                report.rule_objects_deleted += 1;
            }
        }

        let current = self.configs.current_config().await?;
        if current.as_deref() == Some(config_yaml.as_str()) {
            debug!("Alertmanager config unchanged, not updating the secret");
        } else {
            self.configs
                .write_config(&config_yaml, NOTIFICATION_TEMPLATE)
                .await?;
            report.config_written = true;
        }

        if report.writes() > 0 {
            info!(?report, "Config sync applied changes");
        }
        Ok(report)
    }

    async fn apply_rule_group(
        &self,
        group: &CompiledMetricRuleGroup,
        report: &mut ConfigSyncReport,
    ) -> Result<()> {
        if group.namespace != self.monitoring_namespace {
            self.configs.ensure_namespace(&group.namespace).await?;
        }

        let name = group.object_name();
        match self.configs.get_rule_object(&group.namespace, &name).await? {
            None => {
                self.configs.create_rule_object(&group.to_object()).await?;
                report.rule_objects_created += 1;
            }
            Some(mut existing) => {
                let spec = group.spec();
                if existing.spec != spec {
                    existing.spec = spec;
                    self.configs.replace_rule_object(&existing).await?;
                    report.rule_objects_updated += 1;
                }
            }
        }
        Ok(())
    }
}

/// Objects that are being deleted no longer contribute routes or rules.
fn live<K: kube::Resource>(objects: Vec<K>) -> Vec<K> {
    objects
        .into_iter()
        .filter(|o| o.meta().deletion_timestamp.is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockClusterResources, MockConfigStore, MockPolicyStore};
    use crate::types::Error;

    fn syncer(policies: MockPolicyStore, configs: MockConfigStore, deployed: bool) -> ConfigSyncer {
        let ids = RuleIdRegistry::new();
        ConfigSyncer::new(
            Arc::new(policies),
            Arc::new(configs),
            Arc::new(MockClusterResources::new()),
            RuleCompiler::new("c-1", "platform-monitoring", ids.clone()),
            ids,
            DeploymentFlag::new(deployed),
            "platform-monitoring",
        )
    }

    #[tokio::test]
    async fn skips_everything_when_not_deployed() {
        let mut policies = MockPolicyStore::new();
        policies.expect_list_groups().never();
        let mut configs = MockConfigStore::new();
        configs.expect_write_config().never();

        let report = syncer(policies, configs, false).sync().await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.writes(), 0);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_any_write() {
        let mut policies = MockPolicyStore::new();
        policies.expect_list_notifiers().returning(|| Ok(vec![]));
        policies
            .expect_list_groups()
            .returning(|| Err(Error::Config("store unavailable".to_string())));
        let mut configs = MockConfigStore::new();
        configs.expect_write_config().never();
        configs.expect_create_rule_object().never();

        let result = syncer(policies, configs, true).sync().await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn empty_policy_set_writes_base_config_once() {
        let mut policies = MockPolicyStore::new();
        policies.expect_list_notifiers().returning(|| Ok(vec![]));
        policies.expect_list_groups().returning(|| Ok(vec![]));
        policies.expect_list_rules().returning(|| Ok(vec![]));
        let mut configs = MockConfigStore::new();
        configs.expect_list_rule_objects().returning(|| Ok(vec![]));
        configs.expect_current_config().returning(|| Ok(None));
        configs
            .expect_write_config()
            .withf(|yaml, template| yaml.contains("receiver: default") && template.contains("platform.title"))
            .times(1)
            .returning(|_, _| Ok(()));

        let report = syncer(policies, configs, true).sync().await.unwrap();
        assert!(report.config_written);
        assert_eq!(report.writes(), 1);
    }
}
