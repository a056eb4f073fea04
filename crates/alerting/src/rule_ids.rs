//! Process-wide `RuleID` allocation.
//!
//! Metric rule IDs are derived from the group and rule name. Every other rule
//! kind gets `<GroupID>-<uuid>` the first time it is seen; the ID is kept for
//! the lifetime of the process so compiled routes, pushed alerts and state
//! lookups agree.

use crate::crds::{AlertRule, RuleCondition};
use crate::types::metric_rule_id;
use dashmap::DashMap;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Default, Debug)]
pub struct RuleIdRegistry {
    ids: Arc<DashMap<String, String>>,
}

impl RuleIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `RuleID` of a rule. Reallocated if the rule moved to another group.
    pub fn rule_id(&self, rule: &AlertRule) -> String {
        let group_id = &rule.spec.group_id;
        if matches!(rule.spec.condition, RuleCondition::Metric(_)) {
            return metric_rule_id(group_id, &rule.name_any());
        }

        let prefix = format!("{group_id}-");
        let mut entry = self
            .ids
            .entry(rule_key(rule))
            .or_insert_with(|| format!("{prefix}{}", Uuid::new_v4()));
        if !entry.starts_with(&prefix) {
            *entry = format!("{prefix}{}", Uuid::new_v4());
        }
        entry.clone()
    }

    pub fn forget(&self, namespace: &str, name: &str) {
        self.ids.remove(&format!("{namespace}:{name}"));
    }

    /// Drop IDs of rules not in `rules`.
    pub fn retain_rules(&self, rules: &[AlertRule]) {
        let live: HashSet<String> = rules.iter().map(rule_key).collect();
        self.ids.retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn rule_key(rule: &AlertRule) -> String {
    format!("{}:{}", rule.namespace().unwrap_or_default(), rule.name_any())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{AlertRuleSpec, EventRule, MetricRule, Comparison, PolicyScope, Severity};

    fn rule(name: &str, group_id: &str, condition: RuleCondition) -> AlertRule {
        let mut rule = AlertRule::new(
            name,
            AlertRuleSpec {
                cluster_name: "c-1".to_string(),
                scope: PolicyScope::Cluster,
                group_id: group_id.to_string(),
                display_name: String::new(),
                severity: Severity::Warning,
                timing: None,
                condition,
            },
        );
        rule.metadata.namespace = Some("c-1".to_string());
        rule
    }

    fn event() -> RuleCondition {
        RuleCondition::Event(EventRule {
            event_type: "Warning".to_string(),
            resource_kind: "Pod".to_string(),
        })
    }

    #[test]
    fn metric_ids_are_deterministic() {
        let registry = RuleIdRegistry::new();
        let metric = rule(
            "no-leader",
            "c-1:etcd-alert",
            RuleCondition::Metric(MetricRule {
                expression: "up".to_string(),
                comparison: Comparison::Equal,
                threshold_value: 0.0,
                duration: "3m".to_string(),
                target: None,
            }),
        );
        assert_eq!(registry.rule_id(&metric), "c-1:etcd-alert-no-leader");
        assert!(registry.is_empty());
    }

    #[test]
    fn non_metric_ids_are_stable_within_the_process() {
        let registry = RuleIdRegistry::new();
        let r = rule("pod-events", "c-1:g", event());
        let first = registry.rule_id(&r);
        assert!(first.starts_with("c-1:g-"));
        assert_eq!(first.len(), "c-1:g-".len() + 36);
        assert_eq!(registry.rule_id(&r), first);

        registry.forget("c-1", "pod-events");
        assert_ne!(registry.rule_id(&r), first);
    }

    #[test]
    fn moving_groups_reallocates() {
        let registry = RuleIdRegistry::new();
        let before = registry.rule_id(&rule("r", "c-1:a", event()));
        let after = registry.rule_id(&rule("r", "c-1:b", event()));
        assert!(before.starts_with("c-1:a-"));
        assert!(after.starts_with("c-1:b-"));
    }

    #[test]
    fn retain_drops_deleted_rules() {
        let registry = RuleIdRegistry::new();
        let keep = rule("keep", "c-1:g", event());
        registry.rule_id(&keep);
        registry.rule_id(&rule("gone", "c-1:g", event()));
        assert_eq!(registry.len(), 2);
        registry.retain_rules(&[keep]);
        assert_eq!(registry.len(), 1);
    }
}
