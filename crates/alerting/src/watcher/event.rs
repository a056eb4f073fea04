//! Event rules, driven by the core/v1 Event watch stream.

use super::WatcherContext;
use crate::crds::{AlertRule, EventRule, RuleCondition};
use crate::types::Result;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// When the event was last observed by the cluster.
pub fn last_seen(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

/// Events replayed by the initial list that happened before the watcher started.
pub fn is_stale(event: &Event, started_at: DateTime<Utc>) -> bool {
    last_seen(event).is_some_and(|seen| seen < started_at)
}

fn rule_matches(rule: &EventRule, event: &Event) -> bool {
    event.type_.as_deref() == Some(rule.event_type.as_str())
        && event
            .involved_object
            .kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case(&rule.resource_kind))
}

/// Push one alert per eligible rule the event matches. Project-scoped rules
/// only see events from their project's namespaces.
#[instrument(skip_all, fields(event = %event.name_any()))]
pub async fn handle_event(ctx: &WatcherContext, event: &Event) -> Result<usize> {
    if !ctx.deployed.is_deployed() {
        return Ok(0);
    }

    let rules: Vec<AlertRule> = ctx
        .eligible_rules()
        .await?
        .into_iter()
        .filter(|r| matches!(&r.spec.condition, RuleCondition::Event(e) if rule_matches(e, event)))
        .collect();
    if rules.is_empty() {
        return Ok(0);
    }

    let target = &event.involved_object;
    let target_namespace = target
        .namespace
        .clone()
        .or_else(|| event.namespace())
        .unwrap_or_default();
    let mut project_namespaces: HashMap<String, Vec<String>> = HashMap::new();
    let mut pushed = 0;

    for rule in &rules {
        let RuleCondition::Event(event_rule) = &rule.spec.condition else {
            continue;
        };
        if let Some(project) = rule.spec.scope.project_id() {
            if !project_namespaces.contains_key(project) {
                let namespaces = ctx.resources.project_namespaces(project).await?;
                project_namespaces.insert(project.to_string(), namespaces);
            }
            if !project_namespaces[project].contains(&target_namespace) {
                continue;
            }
        }

        let mut labels = ctx.alert_labels(rule);
        labels.extend([
            ("event_type".to_string(), event_rule.event_type.clone()),
            ("resource_kind".to_string(), event_rule.resource_kind.clone()),
            (
                "target_name".to_string(),
                target.name.clone().unwrap_or_default(),
            ),
            ("target_namespace".to_string(), target_namespace.clone()),
            (
                "event_count".to_string(),
                event.count.unwrap_or(1).to_string(),
            ),
            (
                "event_message".to_string(),
                event.message.clone().unwrap_or_default(),
            ),
            (
                "event_firstseen".to_string(),
                event
                    .first_timestamp
                    .as_ref()
                    .map(|t| t.0.to_rfc3339())
                    .unwrap_or_default(),
            ),
            (
                "event_lastseen".to_string(),
                last_seen(event).map(|t| t.to_rfc3339()).unwrap_or_default(),
            ),
        ]);
        ctx.push(&labels).await?;
        pushed += 1;
    }

    Ok(pushed)
}

/// Watch Events until `token` is cancelled, evaluating each applied object once.
pub async fn run_event_watcher(api: Api<Event>, ctx: Arc<WatcherContext>, token: CancellationToken) {
    let started_at = Utc::now();
    info!("Starting event watcher");

    let mut events = watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .boxed();

    loop {
        let next = tokio::select! {
            () = token.cancelled() => break,
            next = events.try_next() => next,
        };
        match next {
            Ok(Some(event)) => {
                if is_stale(&event, started_at) {
                    continue;
                }
                match handle_event(&ctx, &event).await {
                    Ok(0) => {}
                    Ok(pushed) => debug!(pushed, event = %event.name_any(), "Event alerts pushed"),
                    Err(e) => error!(error = %e, event = %event.name_any(), "Failed to handle event"),
                }
            }
            Ok(None) => break,
            Err(e) => warn!(error = %e, "Event watch stream error"),
        }
    }
    info!("Event watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, policies_with, rule};
    use super::*;
    use crate::backend::MockDeliveryBackend;
    use crate::compiler::template::unrendered_labels;
    use crate::crds::PolicyScope;
    use crate::store::MockClusterResources;
    use chrono::Duration;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn event(type_: &str, kind: &str, namespace: &str, last: DateTime<Utc>) -> Event {
        Event {
            metadata: ObjectMeta {
                name: Some("web-0.17a".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            type_: Some(type_.to_string()),
            involved_object: ObjectReference {
                kind: Some(kind.to_string()),
                name: Some("web-0".to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            count: Some(4),
            message: Some("Back-off pulling image".to_string()),
            first_timestamp: Some(Time(last - Duration::minutes(5))),
            last_timestamp: Some(Time(last)),
            ..Default::default()
        }
    }

    fn event_rule(name: &str, kind: &str) -> AlertRule {
        rule(
            name,
            RuleCondition::Event(EventRule {
                event_type: "Warning".to_string(),
                resource_kind: kind.to_string(),
            }),
        )
    }

    #[test]
    fn events_before_start_are_stale() {
        let now = Utc::now();
        assert!(is_stale(&event("Warning", "Pod", "shop", now - Duration::seconds(30)), now));
        assert!(!is_stale(&event("Warning", "Pod", "shop", now), now));
    }

    #[tokio::test]
    async fn matching_rule_gets_event_payload() {
        let mut backend = MockDeliveryBackend::new();
        backend
            .expect_push_alert()
            .withf(|labels| {
                labels["alert_type"] == "event"
                    && labels["target_name"] == "web-0"
                    && labels["target_namespace"] == "shop"
                    && labels["event_count"] == "4"
                    && labels["event_message"] == "Back-off pulling image"
                    && unrendered_labels(labels.keys().map(String::as_str)).is_empty()
            })
            .times(1)
            .returning(|_| Ok(()));

        let ctx = context(
            policies_with(vec![event_rule("pod-warnings", "Pod"), event_rule("node-warnings", "Node")]),
            MockClusterResources::new(),
            backend,
        );
        let pushed = handle_event(&ctx, &event("Warning", "Pod", "shop", Utc::now()))
            .await
            .unwrap();
        assert_eq!(pushed, 1);

        let normal = handle_event(&ctx, &event("Normal", "Pod", "shop", Utc::now()))
            .await
            .unwrap();
        assert_eq!(normal, 0);
    }

    #[tokio::test]
    async fn project_rules_ignore_foreign_namespaces() {
        let mut scoped = event_rule("pod-warnings", "Pod");
        scoped.spec.scope = PolicyScope::Project {
            project_name: "c-1:p-1".to_string(),
        };
        let mut resources = MockClusterResources::new();
        resources
            .expect_project_namespaces()
            .returning(|_| Ok(vec!["shop".to_string()]));
        let mut backend = MockDeliveryBackend::new();
        backend.expect_push_alert().never();

        let ctx = context(policies_with(vec![scoped]), resources, backend);
        let pushed = handle_event(&ctx, &event("Warning", "Pod", "kube-system", Utc::now()))
            .await
            .unwrap();
        assert_eq!(pushed, 0);
    }
}
