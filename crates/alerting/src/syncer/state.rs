//! Reconciles stored alert state with what Alertmanager reports.

use crate::backend::{external_state, ActiveAlert, DeliveryBackend, DeploymentFlag};
use crate::rule_ids::RuleIdRegistry;
use crate::store::PolicyStore;
use crate::types::{AlertState, Result, LABEL_GROUP_ID, LABEL_RULE_ID};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Action for a (stored, observed) state pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    Noop,
    /// Store the observed state.
    Persist,
    /// Muted object went quiet: drop the silence and store the observed state.
    RemoveSilenceAndPersist,
    /// User unmuted while the silence is still in effect.
    RemoveSilence,
    /// Muted object is still firing unsilenced.
    AddSilence,
}

/// `current` is the stored state, `observed` the state derived from Alertmanager.
pub fn reconcile(current: AlertState, observed: AlertState) -> Reconcile {
    use AlertState::{Active, Alerting, Inactive, Muted};

    match (current, observed) {
        (Inactive, _) => Reconcile::Noop,
        (c, o) if c == o => Reconcile::Noop,
        (Muted, Active) => Reconcile::RemoveSilenceAndPersist,
        (Alerting, Muted) => Reconcile::RemoveSilence,
        (Muted, Alerting) => Reconcile::AddSilence,
        _ => Reconcile::Persist,
    }
}

/// Calls made by one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateSyncReport {
    pub persisted: usize,
    pub silences_added: usize,
    pub silences_removed: usize,
    pub failures: usize,
}

pub struct StateSyncer {
    policies: Arc<dyn PolicyStore>,
    backend: Arc<dyn DeliveryBackend>,
    rule_ids: RuleIdRegistry,
    deployed: DeploymentFlag,
}

impl StateSyncer {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        backend: Arc<dyn DeliveryBackend>,
        rule_ids: RuleIdRegistry,
        deployed: DeploymentFlag,
    ) -> Self {
        Self {
            policies,
            backend,
            rule_ids,
            deployed,
        }
    }

    /// One pass. Alerts are fetched once and used for every object; a fetch
    /// failure aborts the pass, per-object failures are logged and counted.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<StateSyncReport> {
        let mut report = StateSyncReport::default();
        if !self.deployed.is_deployed() {
            return Ok(report);
        }

        let alerts = self.backend.list_alerts().await?;
        let groups = self.policies.list_groups().await?;
        let rules = self.policies.list_rules().await?;

        for group in &groups {
            let current = group.state();
            if current == AlertState::Inactive {
                continue;
            }
            let group_id = group.group_id();
            let action = self
                .apply(&alerts, LABEL_GROUP_ID, &group_id, current, &mut report)
                .await;
            if let Some(observed) = action {
                if let Err(e) = self.policies.update_group_state(group, observed).await {
                    error!(group_id = %group_id, error = %e, "Failed to update AlertGroup state");
                    report.failures += 1;
                } else {
                    report.persisted += 1;
                }
            }
        }

        for rule in &rules {
            let current = rule.state();
            if current == AlertState::Inactive {
                continue;
            }
            let rule_id = self.rule_ids.rule_id(rule);
            let action = self
                .apply(&alerts, LABEL_RULE_ID, &rule_id, current, &mut report)
                .await;
            if let Some(observed) = action {
                if let Err(e) = self.policies.update_rule_state(rule, observed).await {
                    error!(rule = %rule.name_any(), error = %e, "Failed to update AlertRule state");
                    report.failures += 1;
                } else {
                    report.persisted += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sync every `interval` until `token` is cancelled.
    pub async fn run(self, interval: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.sync().await {
                Ok(report) if report.failures > 0 => {
                    warn!(failures = report.failures, "State sync pass finished with failures");
                }
                Ok(report) => debug!(?report, "State sync pass finished"),
                Err(e) => error!(error = %e, "State sync pass failed"),
            }
        }
        info!("State syncer stopped");
    }

    /// Run silence side effects; returns the state to persist, if any.
    async fn apply(
        &self,
        alerts: &[ActiveAlert],
        label: &str,
        value: &str,
        current: AlertState,
        report: &mut StateSyncReport,
    ) -> Option<AlertState> {
        let observed = external_state(alerts, label, value);
        let action = reconcile(current, observed);
        if action != Reconcile::Noop {
            debug!(label, value, %current, %observed, ?action, "Reconciling alert state");
        }

        match action {
            Reconcile::Noop => None,
            Reconcile::Persist => Some(observed),
            Reconcile::RemoveSilenceAndPersist => {
                self.remove_silence(label, value, report).await;
                Some(observed)
            }
            Reconcile::RemoveSilence => {
                self.remove_silence(label, value, report).await;
                None
            }
            Reconcile::AddSilence => {
                match self.backend.add_silence(label, value).await {
                    Ok(()) => report.silences_added += 1,
                    Err(e) => {
                        error!(label, value, error = %e, "Failed to add silence");
                        report.failures += 1;
                    }
                }
                None
            }
        }
    }

    async fn remove_silence(&self, label: &str, value: &str, report: &mut StateSyncReport) {
        match self.backend.remove_silence(label, value).await {
            Ok(()) => report.silences_removed += 1,
            Err(e) => {
                error!(label, value, error = %e, "Failed to remove silence");
                report.failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AlertStatus, MockDeliveryBackend};
    use crate::crds::{AlertGroup, AlertGroupSpec, AlertGroupStatus};
    use crate::store::MockPolicyStore;
    use crate::types::Error;
    use std::collections::BTreeMap;
    use AlertState::{Active, Alerting, Inactive, Muted};

    #[test]
    fn reconciliation_table() {
        for observed in [Active, Alerting, Muted, Inactive] {
            assert_eq!(reconcile(Inactive, observed), Reconcile::Noop);
        }
        assert_eq!(reconcile(Muted, Active), Reconcile::RemoveSilenceAndPersist);
        assert_eq!(reconcile(Alerting, Muted), Reconcile::RemoveSilence);
        assert_eq!(reconcile(Muted, Alerting), Reconcile::AddSilence);
        assert_eq!(reconcile(Active, Alerting), Reconcile::Persist);
        assert_eq!(reconcile(Alerting, Active), Reconcile::Persist);
        assert_eq!(reconcile(Active, Muted), Reconcile::Persist);
        assert_eq!(reconcile(Alerting, Alerting), Reconcile::Noop);
        assert_eq!(reconcile(Muted, Muted), Reconcile::Noop);
    }

    fn group(state: AlertState) -> AlertGroup {
        let mut g = AlertGroup::new(
            "etcd-alert",
            AlertGroupSpec {
                cluster_name: "c-1".to_string(),
                scope: Default::default(),
                display_name: String::new(),
                description: String::new(),
                recipients: vec![],
                timing: Default::default(),
            },
        );
        g.metadata.namespace = Some("c-1".to_string());
        g.metadata.resource_version = Some("7".to_string());
        g.status = Some(AlertGroupStatus { state });
        g
    }

    fn firing(group_id: &str) -> ActiveAlert {
        ActiveAlert {
            labels: BTreeMap::from([(LABEL_GROUP_ID.to_string(), group_id.to_string())]),
            status: AlertStatus {
                state: "active".to_string(),
                ..Default::default()
            },
            fingerprint: None,
        }
    }

    fn syncer(policies: MockPolicyStore, backend: MockDeliveryBackend) -> StateSyncer {
        StateSyncer::new(
            Arc::new(policies),
            Arc::new(backend),
            RuleIdRegistry::new(),
            DeploymentFlag::new(true),
        )
    }

    fn policies_with(state: AlertState) -> MockPolicyStore {
        let mut policies = MockPolicyStore::new();
        policies
            .expect_list_groups()
            .returning(move || Ok(vec![group(state)]));
        policies.expect_list_rules().returning(|| Ok(vec![]));
        policies
    }

    #[tokio::test]
    async fn muted_and_firing_adds_one_silence_without_persisting() {
        let mut policies = policies_with(Muted);
        policies.expect_update_group_state().never();
        let mut backend = MockDeliveryBackend::new();
        backend
            .expect_list_alerts()
            .times(1)
            .returning(|| Ok(vec![firing("c-1:etcd-alert")]));
        backend
            .expect_add_silence()
            .withf(|label, value| label == "group_id" && value == "c-1:etcd-alert")
            .times(1)
            .returning(|_, _| Ok(()));
        backend.expect_remove_silence().never();

        let report = syncer(policies, backend).sync().await.unwrap();
        assert_eq!(report.silences_added, 1);
        assert_eq!(report.persisted, 0);
    }

    #[tokio::test]
    async fn muted_and_quiet_removes_silence_and_persists_active() {
        let mut policies = policies_with(Muted);
        policies
            .expect_update_group_state()
            .withf(|_, state| *state == Active)
            .times(1)
            .returning(|_, _| Ok(()));
        let mut backend = MockDeliveryBackend::new();
        backend.expect_list_alerts().returning(|| Ok(vec![]));
        backend.expect_remove_silence().times(1).returning(|_, _| Ok(()));
        backend.expect_add_silence().never();

        let report = syncer(policies, backend).sync().await.unwrap();
        assert_eq!(report.silences_removed, 1);
        assert_eq!(report.persisted, 1);
    }

    #[tokio::test]
    async fn inactive_makes_no_calls() {
        let mut policies = policies_with(Inactive);
        policies.expect_update_group_state().never();
        let mut backend = MockDeliveryBackend::new();
        backend
            .expect_list_alerts()
            .returning(|| Ok(vec![firing("c-1:etcd-alert")]));
        backend.expect_add_silence().never();
        backend.expect_remove_silence().never();

        let report = syncer(policies, backend).sync().await.unwrap();
        assert_eq!(report, StateSyncReport::default());
    }

    #[tokio::test]
    async fn alert_fetch_failure_aborts_the_pass() {
        let mut policies = MockPolicyStore::new();
        policies.expect_list_groups().never();
        let mut backend = MockDeliveryBackend::new();
        backend.expect_list_alerts().returning(|| {
            Err(Error::Backend {
                status: 503,
                message: "down".to_string(),
            })
        });

        let result = syncer(policies, backend).sync().await;
        assert!(matches!(result, Err(Error::Backend { status: 503, .. })));
    }

    #[tokio::test]
    async fn failed_persist_is_counted_and_does_not_abort() {
        let mut policies = policies_with(Active);
        policies
            .expect_update_group_state()
            .times(1)
            .returning(|_, _| Err(Error::Conflict("AlertGroup c-1/etcd-alert".to_string())));
        let mut backend = MockDeliveryBackend::new();
        backend
            .expect_list_alerts()
            .returning(|| Ok(vec![firing("c-1:etcd-alert")]));

        let report = syncer(policies, backend).sync().await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.persisted, 0);
    }
}
