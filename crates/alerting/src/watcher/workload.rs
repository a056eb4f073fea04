//! Workload availability rules.

use super::{RuleWatcher, WatchReport, WatcherContext};
use crate::crds::{AlertRule, RuleCondition};
use crate::store::{Workload, WorkloadId};
use crate::types::Result;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{instrument, warn};

/// `available < floor(percentage * desired / 100)`. Batch workloads and a
/// percentage of 0 never breach.
pub fn is_unavailable(workload: &Workload, percentage: u32) -> bool {
    if percentage == 0 || workload.kind.is_batch() {
        return false;
    }
    let desired = i64::from(workload.desired_replicas.max(0));
    let required = desired * i64::from(percentage) / 100;
    i64::from(workload.available_replicas) < required
}

#[derive(Debug, Default)]
pub struct WorkloadWatcher;

impl WorkloadWatcher {
    pub fn new() -> Self {
        Self
    }

    /// Workloads matched by a selector: every namespace of the rule's
    /// project, or the whole cluster for cluster-scoped rules.
    async fn select(
        ctx: &WatcherContext,
        rule: &AlertRule,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Workload>> {
        let namespaces = match rule.spec.scope.project_id() {
            Some(project) => ctx.resources.project_namespaces(project).await?,
            None => vec![String::new()],
        };

        let mut workloads = Vec::new();
        for namespace in namespaces {
            workloads.extend(ctx.resources.list_workloads(&namespace, selector).await?);
        }
        Ok(workloads)
    }
}

#[async_trait]
impl RuleWatcher for WorkloadWatcher {
    fn name(&self) -> &'static str {
        "workload"
    }

    #[instrument(skip_all)]
    async fn watch_rules(&mut self, ctx: &WatcherContext) -> Result<WatchReport> {
        let mut report = WatchReport::default();

        for rule in ctx.eligible_rules().await? {
            let RuleCondition::Workload(workload_rule) = &rule.spec.condition else {
                continue;
            };
            if workload_rule.available_percentage == 0 {
                continue;
            }
            report.evaluated += 1;

            let workloads = if let Some(raw) = &workload_rule.workload_id {
                let id: WorkloadId = match raw.parse() {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(rule = %rule.name_any(), error = %e, "Skipping workload rule");
                        continue;
                    }
                };
                match ctx.resources.get_workload(&id).await? {
                    Some(workload) => vec![workload],
                    None => {
                        ctx.delete_orphan(&rule).await?;
                        report.deleted += 1;
                        continue;
                    }
                }
            } else if let Some(selector) = &workload_rule.selector {
                Self::select(ctx, &rule, selector).await?
            } else {
                continue;
            };

            for workload in workloads
                .iter()
                .filter(|w| is_unavailable(w, workload_rule.available_percentage))
            {
                let mut labels = ctx.alert_labels(&rule);
                labels.extend([
                    ("workload_name".to_string(), workload.name.clone()),
                    ("workload_namespace".to_string(), workload.namespace.clone()),
                    ("workload_kind".to_string(), workload.kind.to_string()),
                    (
                        "available_percentage".to_string(),
                        workload_rule.available_percentage.to_string(),
                    ),
                    (
                        "available_replicas".to_string(),
                        workload.available_replicas.to_string(),
                    ),
                    (
                        "desired_replicas".to_string(),
                        workload.desired_replicas.to_string(),
                    ),
                ]);
                ctx.push(&labels).await?;
                report.pushed += 1;
            }
        }

        Ok(report)
    }
}
