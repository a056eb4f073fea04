//! Pod rules: not running, not scheduled and restart rate.

use super::{RestartTracker, RuleWatcher, WatchReport, WatcherContext};
use crate::crds::{AlertRule, PodCondition, PodRule, RuleCondition};
use crate::types::{split_ref, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{instrument, warn};

type Fields = Vec<(&'static str, String)>;

#[derive(Debug, Default)]
pub struct PodWatcher {
    restarts: RestartTracker,
}

impl PodWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_restarts(&mut self, key: &str, pod: &Pod, rule: &PodRule) -> Option<Fields> {
        let statuses = container_statuses(pod);
        let total: u32 = statuses
            .iter()
            .map(|c| u32::try_from(c.restart_count).unwrap_or(0))
            .sum();
        let window = Duration::from_secs(rule.restart_interval_seconds);
        let delta = self.restarts.observe(key, total, Instant::now(), window);
        if delta < rule.restart_times.max(1) {
            return None;
        }

        let mut fields = vec![
            ("condition", "restart-count".to_string()),
            ("restart_times", rule.restart_times.to_string()),
            ("restart_interval", rule.restart_interval_seconds.to_string()),
        ];
        if let Some(worst) = statuses.iter().max_by_key(|c| c.restart_count) {
            fields.push(("container_name", worst.name.clone()));
            if let Some(message) = waiting_message(worst) {
                fields.push(("logs", message));
            }
        }
        Some(fields)
    }
}

#[async_trait]
impl RuleWatcher for PodWatcher {
    fn name(&self) -> &'static str {
        "pod"
    }

    #[instrument(skip_all)]
    async fn watch_rules(&mut self, ctx: &WatcherContext) -> Result<WatchReport> {
        let mut report = WatchReport::default();
        let mut tracked = HashSet::new();

        for rule in ctx.eligible_rules().await? {
            let RuleCondition::Pod(pod_rule) = &rule.spec.condition else {
                continue;
            };
            report.evaluated += 1;

            let Some((namespace, name)) = split_ref(&pod_rule.pod_name) else {
                warn!(rule = %rule.name_any(), pod = %pod_rule.pod_name, "Invalid pod reference");
                continue;
            };
            let Some(pod) = ctx.resources.get_pod(namespace, name).await? else {
                ctx.delete_orphan(&rule).await?;
                report.deleted += 1;
                continue;
            };

            let fields = match pod_rule.condition {
                PodCondition::NotRunning => check_running(&pod),
                PodCondition::NotScheduled => check_scheduled(&pod),
                PodCondition::RestartCount => {
                    let key = track_key(&rule);
                    let fields = self.check_restarts(&key, &pod, pod_rule);
                    tracked.insert(key);
                    fields
                }
            };

            if let Some(fields) = fields {
                let mut labels = ctx.alert_labels(&rule);
                labels.insert("namespace".to_string(), namespace.to_string());
                labels.insert("pod_name".to_string(), name.to_string());
                extend(&mut labels, fields);
                ctx.push(&labels).await?;
                report.pushed += 1;
            }
        }

        self.restarts.retain(&tracked);
        Ok(report)
    }
}

fn track_key(rule: &AlertRule) -> String {
    format!("{}:{}", rule.namespace().unwrap_or_default(), rule.name_any())
}

fn extend(labels: &mut BTreeMap<String, String>, fields: Fields) {
    labels.extend(fields.into_iter().map(|(k, v)| (k.to_string(), v)));
}

fn container_statuses(pod: &Pod) -> &[ContainerStatus] {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
}

fn waiting_message(status: &ContainerStatus) -> Option<String> {
    status
        .state
        .as_ref()
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.message.clone())
        .filter(|m| !m.is_empty())
}

/// `PodScheduled=False`, with the condition message.
fn check_scheduled(pod: &Pod) -> Option<Fields> {
    let condition = pod
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "PodScheduled" && c.status == "False")?;

    let mut fields = vec![("condition", "not-scheduled".to_string())];
    if let Some(message) = condition.message.clone().filter(|m| !m.is_empty()) {
        fields.push(("logs", message));
    }
    Some(fields)
}

/// First container without a running state. An unscheduled pod reports
/// not-scheduled instead.
fn check_running(pod: &Pod) -> Option<Fields> {
    if let Some(fields) = check_scheduled(pod) {
        return Some(fields);
    }
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    if phase == Some("Succeeded") {
        return None;
    }

    let container = container_statuses(pod)
        .iter()
        .find(|c| c.state.as_ref().is_none_or(|s| s.running.is_none()))?;

    let mut fields = vec![
        ("condition", "not-running".to_string()),
        ("container_name", container.name.clone()),
    ];
    let terminated = container
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .and_then(|t| t.message.clone())
        .filter(|m| !m.is_empty());
    if let Some(message) = terminated.or_else(|| waiting_message(container)) {
        fields.push(("logs", message));
    }
    Some(fields)
}
