//! Watchers for the rule kinds Prometheus cannot evaluate.
//!
//! Each watcher owns one [`RuleCondition`](crate::crds::RuleCondition)
//! variant, evaluates it against live cluster objects and pushes an alert to
//! the delivery backend on breach. The event watcher is driven by the Event
//! watch stream; the others run on a fixed interval through [`run_periodic`].

pub mod event;
pub mod node;
pub mod pod;
pub mod restart;
pub mod syscomponent;
pub mod workload;

pub use event::run_event_watcher;
pub use node::NodeWatcher;
pub use pod::PodWatcher;
pub use restart::RestartTracker;
pub use syscomponent::SystemComponentWatcher;
pub use workload::WorkloadWatcher;

use crate::backend::{DeliveryBackend, DeploymentFlag};
use crate::crds::AlertRule;
use crate::rule_ids::RuleIdRegistry;
use crate::store::{ClusterResources, PolicyStore};
use crate::types::{Result, LABEL_ALERT_TYPE, LABEL_GROUP_ID, LABEL_RULE_ID};
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Dependencies shared by every watcher.
#[derive(Clone)]
pub struct WatcherContext {
    pub policies: Arc<dyn PolicyStore>,
    pub resources: Arc<dyn ClusterResources>,
    pub backend: Arc<dyn DeliveryBackend>,
    pub rule_ids: RuleIdRegistry,
    pub deployed: DeploymentFlag,
    /// Cluster name as shown in notifications
    pub cluster_display_name: String,
}

impl WatcherContext {
    /// Rules of this cluster that are not inactive.
    pub async fn eligible_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self
            .policies
            .list_rules()
            .await?
            .into_iter()
            .filter(|r| !r.is_inactive())
            .collect())
    }

    /// Labels every pushed alert carries.
    pub fn alert_labels(&self, rule: &AlertRule) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                LABEL_ALERT_TYPE.to_string(),
                rule.spec.condition.alert_type().to_string(),
            ),
            (LABEL_GROUP_ID.to_string(), rule.spec.group_id.clone()),
            (LABEL_RULE_ID.to_string(), self.rule_ids.rule_id(rule)),
            ("alert_name".to_string(), rule.alert_name()),
            ("severity".to_string(), rule.spec.severity.to_string()),
            ("cluster_name".to_string(), self.cluster_display_name.clone()),
        ])
    }

    pub async fn push(&self, labels: &BTreeMap<String, String>) -> Result<()> {
        debug!(?labels, "Pushing alert");
        self.backend.push_alert(labels).await
    }

    /// Delete a rule whose target no longer exists.
    pub async fn delete_orphan(&self, rule: &AlertRule) -> Result<()> {
        let namespace = rule.namespace().unwrap_or_default();
        let name = rule.name_any();
        info!(namespace = %namespace, rule = %name, "Deleting rule whose target no longer exists");
        self.policies.delete_rule(&namespace, &name).await?;
        self.rule_ids.forget(&namespace, &name);
        Ok(())
    }
}

/// Outcome of one watcher pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchReport {
    pub evaluated: usize,
    pub pushed: usize,
    pub deleted: usize,
}

/// A watcher evaluated on a timer.
#[async_trait]
pub trait RuleWatcher: Send {
    fn name(&self) -> &'static str;

    /// Evaluate every eligible rule once.
    async fn watch_rules(&mut self, ctx: &WatcherContext) -> Result<WatchReport>;

    /// [`Self::watch_rules`] unless the backend is not deployed.
    async fn pass(&mut self, ctx: &WatcherContext) -> Result<WatchReport> {
        if !ctx.deployed.is_deployed() {
            return Ok(WatchReport::default());
        }
        self.watch_rules(ctx).await
    }
}

/// Drive a watcher every `interval` until `token` is cancelled. A failed pass
/// is logged and retried on the next tick.
pub async fn run_periodic<W: RuleWatcher>(
    mut watcher: W,
    ctx: Arc<WatcherContext>,
    interval: Duration,
    token: CancellationToken,
) {
    let name = watcher.name();
    info!(watcher = name, interval_secs = interval.as_secs(), "Starting rule watcher");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match watcher.pass(&ctx).await {
            Ok(report) if report.pushed > 0 || report.deleted > 0 => {
                info!(watcher = name, ?report, "Watcher pass finished");
            }
            Ok(report) => debug!(watcher = name, ?report, "Watcher pass finished"),
            Err(e) => error!(watcher = name, error = %e, "Watcher pass failed"),
        }
    }
    info!(watcher = name, "Rule watcher stopped");
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::backend::MockDeliveryBackend;
    use crate::crds::{RuleCondition, SystemServiceRule};
    use crate::store::{MockClusterResources, MockPolicyStore};
    use crate::types::AlertState;

    fn system_rule(name: &str) -> AlertRule {
        rule(
            name,
            RuleCondition::SystemService(SystemServiceRule {
                component_prefix: "etcd".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn inactive_rules_are_not_eligible() {
        let mut muted = system_rule("muted");
        muted.status = Some(crate::crds::AlertRuleStatus {
            state: AlertState::Muted,
        });
        let mut inactive = system_rule("inactive");
        inactive.status = Some(crate::crds::AlertRuleStatus {
            state: AlertState::Inactive,
        });
        let ctx = context(
            policies_with(vec![system_rule("plain"), muted, inactive]),
            MockClusterResources::new(),
            MockDeliveryBackend::new(),
        );

        let names: Vec<String> = ctx
            .eligible_rules()
            .await
            .unwrap()
            .iter()
            .map(|r| r.name_any())
            .collect();
        assert_eq!(names, vec!["plain", "muted"]);
    }

    #[test]
    fn alert_labels_carry_correlation_keys() {
        let ctx = context(
            MockPolicyStore::new(),
            MockClusterResources::new(),
            MockDeliveryBackend::new(),
        );
        let rule = system_rule("etcd-system-service");
        let labels = ctx.alert_labels(&rule);

        assert_eq!(labels["alert_type"], "systemService");
        assert_eq!(labels["group_id"], "c-1:ops");
        assert!(labels["rule_id"].starts_with("c-1:ops-"));
        assert_eq!(labels["rule_id"], ctx.rule_ids.rule_id(&rule));
        assert_eq!(labels["alert_name"], "etcd-system-service");
        assert_eq!(labels["severity"], "critical");
        assert_eq!(labels["cluster_name"], "Local");
    }

    struct Counting(usize);

    #[async_trait]
    impl RuleWatcher for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn watch_rules(&mut self, _ctx: &WatcherContext) -> Result<WatchReport> {
            self.0 += 1;
            Ok(WatchReport::default())
        }
    }

    #[tokio::test]
    async fn pass_is_a_noop_while_not_deployed() {
        let mut ctx = context(
            MockPolicyStore::new(),
            MockClusterResources::new(),
            MockDeliveryBackend::new(),
        );
        ctx.deployed = DeploymentFlag::new(false);
        let mut watcher = Counting(0);

        watcher.pass(&ctx).await.unwrap();
        assert_eq!(watcher.0, 0);

        ctx.deployed.set(true);
        watcher.pass(&ctx).await.unwrap();
        assert_eq!(watcher.0, 1);
    }
}
