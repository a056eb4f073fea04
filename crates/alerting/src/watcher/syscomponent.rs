//! System component rules, evaluated against `ComponentStatus` objects.

use super::{RuleWatcher, WatchReport, WatcherContext};
use crate::crds::RuleCondition;
use crate::types::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ComponentStatus;
use kube::ResourceExt;
use tracing::instrument;

#[derive(Debug, Default)]
pub struct SystemComponentWatcher;

impl SystemComponentWatcher {
    pub fn new() -> Self {
        Self
    }
}

/// First component named `prefix*` whose `Healthy` condition is `False`,
/// with the condition message.
pub fn unhealthy_component<'a>(
    statuses: &'a [ComponentStatus],
    prefix: &str,
) -> Option<(&'a ComponentStatus, Option<String>)> {
    statuses
        .iter()
        .filter(|cs| cs.name_any().starts_with(prefix))
        .find_map(|cs| {
            let condition = cs
                .conditions
                .as_ref()?
                .iter()
                .find(|c| c.type_ == "Healthy" && c.status == "False")?;
            let message = condition
                .message
                .clone()
                .or_else(|| condition.error.clone())
                .filter(|m| !m.is_empty());
            Some((cs, message))
        })
}

#[async_trait]
impl RuleWatcher for SystemComponentWatcher {
    fn name(&self) -> &'static str {
        "system-component"
    }

    #[instrument(skip_all)]
    async fn watch_rules(&mut self, ctx: &WatcherContext) -> Result<WatchReport> {
        let mut report = WatchReport::default();
        let rules: Vec<_> = ctx
            .eligible_rules()
            .await?
            .into_iter()
            .filter(|r| matches!(r.spec.condition, RuleCondition::SystemService(_)))
            .collect();
        if rules.is_empty() {
            return Ok(report);
        }

        let statuses = ctx.resources.list_component_statuses().await?;
        for rule in &rules {
            let RuleCondition::SystemService(service) = &rule.spec.condition else {
                continue;
            };
            report.evaluated += 1;

            let Some((component, message)) = unhealthy_component(&statuses, &service.component_prefix)
            else {
                continue;
            };
            let mut labels = ctx.alert_labels(rule);
            labels.insert("component_name".to_string(), component.name_any());
            if let Some(message) = message {
                labels.insert("logs".to_string(), message);
            }
            ctx.push(&labels).await?;
            report.pushed += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, policies_with, rule};
    use super::*;
    use crate::backend::MockDeliveryBackend;
    use crate::compiler::template::unrendered_labels;
    use crate::crds::SystemServiceRule;
    use crate::store::MockClusterResources;
    use k8s_openapi::api::core::v1::ComponentCondition;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn component(name: &str, healthy: &str) -> ComponentStatus {
        ComponentStatus {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            conditions: Some(vec![ComponentCondition {
                type_: "Healthy".to_string(),
                status: healthy.to_string(),
                message: None,
                error: Some("dial tcp 127.0.0.1:2379: connect: connection refused".to_string()),
            }]),
        }
    }

    fn service_rule(prefix: &str) -> crate::crds::AlertRule {
        rule(
            &format!("{prefix}-system-service"),
            RuleCondition::SystemService(SystemServiceRule {
                component_prefix: prefix.to_string(),
            }),
        )
    }

    #[test]
    fn matches_prefix_and_unhealthy_condition() {
        let statuses = vec![
            component("etcd-0", "True"),
            component("etcd-1", "False"),
            component("scheduler", "False"),
        ];
        let (cs, message) = unhealthy_component(&statuses, "etcd").unwrap();
        assert_eq!(cs.name_any(), "etcd-1");
        assert!(message.unwrap().contains("connection refused"));

        assert!(unhealthy_component(&statuses, "controller-manager").is_none());
    }

    #[tokio::test]
    async fn one_alert_per_rule_even_with_several_unhealthy_members() {
        let mut resources = MockClusterResources::new();
        resources.expect_list_component_statuses().times(1).returning(|| {
            Ok(vec![component("etcd-0", "False"), component("etcd-1", "False")])
        });
        let mut backend = MockDeliveryBackend::new();
        backend
            .expect_push_alert()
            .withf(|labels| {
                labels["component_name"] == "etcd-0"
                    && labels["alert_type"] == "systemService"
                    && unrendered_labels(labels.keys().map(String::as_str)).is_empty()
            })
            .times(1)
            .returning(|_| Ok(()));

        let ctx = context(
            policies_with(vec![service_rule("etcd"), service_rule("scheduler")]),
            resources,
            backend,
        );
        let report = SystemComponentWatcher::new().watch_rules(&ctx).await.unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.pushed, 1);
    }
}
