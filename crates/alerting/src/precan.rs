//! Built-in alert groups and rules created for every cluster on startup.

use crate::crds::{
    AlertGroup, AlertGroupSpec, AlertRule, AlertRuleSpec, Comparison, MetricRule, PolicyScope,
    RuleCondition, Severity, SystemServiceRule, Timing,
};
use crate::store::PolicyStore;
use crate::types::group_id;
use kube::ResourceExt;
use tracing::{info, warn};

pub const ETCD_GROUP: &str = "etcd-alert";
pub const KUBE_COMPONENTS_GROUP: &str = "kube-components-alert";

/// Built-in groups and their rules, all in the cluster's namespace.
pub fn builtin_policies(cluster_name: &str) -> (Vec<AlertGroup>, Vec<AlertRule>) {
    let etcd = group_id(cluster_name, ETCD_GROUP);
    let components = group_id(cluster_name, KUBE_COMPONENTS_GROUP);

    let groups = vec![
        group(
            cluster_name,
            ETCD_GROUP,
            "Alert for etcd",
            "Alert for etcd component, leader existence, db size",
        ),
        group(
            cluster_name,
            KUBE_COMPONENTS_GROUP,
            "Built-in Alert for controller-manager, scheduler component",
            "Alert for controller-manager, scheduler",
        ),
    ];

    let rules = vec![
        metric_rule(
            cluster_name,
            &etcd,
            "no-leader",
            r#"etcd_server_has_leader{job="kube-etcd"}"#,
            Comparison::Equal,
            0.0,
        ),
        metric_rule(
            cluster_name,
            &etcd,
            "high-number-of-leader-changes",
            r#"increase(etcd_server_leader_changes_seen_total{job="kube-etcd"}[1h])"#,
            Comparison::GreaterThan,
            3.0,
        ),
        metric_rule(
            cluster_name,
            &etcd,
            "db-over-size",
            "sum(etcd_debugging_mvcc_db_total_size_in_bytes)",
            Comparison::GreaterThan,
            10000.0,
        ),
        system_service_rule(cluster_name, &etcd, "etcd-system-service", "etcd"),
        system_service_rule(cluster_name, &components, "scheduler-system-service", "scheduler"),
        system_service_rule(
            cluster_name,
            &components,
            "controllermanager-system-service",
            "controller-manager",
        ),
    ];

    (groups, rules)
}

/// Create the built-in policies, leaving existing objects untouched. Failures
/// are logged per object.
pub async fn install(policies: &dyn PolicyStore, cluster_name: &str) -> usize {
    let (groups, rules) = builtin_policies(cluster_name);
    let mut failed = 0;

    for group in &groups {
        if let Err(e) = policies.create_group(group).await {
            warn!(group = %group.name_any(), error = %e, "Failed to create built-in alert group");
            failed += 1;
        }
    }
    for rule in &rules {
        if let Err(e) = policies.create_rule(rule).await {
            warn!(rule = %rule.name_any(), error = %e, "Failed to create built-in alert rule");
            failed += 1;
        }
    }

    info!(
        cluster = cluster_name,
        groups = groups.len(),
        rules = rules.len(),
        failed,
        "Installed built-in alert policies"
    );
    failed
}

fn group(cluster_name: &str, name: &str, display_name: &str, description: &str) -> AlertGroup {
    let mut group = AlertGroup::new(
        name,
        AlertGroupSpec {
            cluster_name: cluster_name.to_string(),
            scope: PolicyScope::Cluster,
            display_name: display_name.to_string(),
            description: description.to_string(),
            recipients: Vec::new(),
            timing: Timing::default(),
        },
    );
    group.metadata.namespace = Some(cluster_name.to_string());
    group
}

fn rule(cluster_name: &str, group_id: &str, name: &str, condition: RuleCondition) -> AlertRule {
    let mut rule = AlertRule::new(
        name,
        AlertRuleSpec {
            cluster_name: cluster_name.to_string(),
            scope: PolicyScope::Cluster,
            group_id: group_id.to_string(),
            display_name: name.to_string(),
            severity: Severity::Critical,
            timing: Some(Timing::default()),
            condition,
        },
    );
    rule.metadata.namespace = Some(cluster_name.to_string());
    rule
}

fn metric_rule(
    cluster_name: &str,
    group_id: &str,
    name: &str,
    expression: &str,
    comparison: Comparison,
    threshold_value: f64,
) -> AlertRule {
    rule(
        cluster_name,
        group_id,
        name,
        RuleCondition::Metric(MetricRule {
            expression: expression.to_string(),
            comparison,
            threshold_value,
            duration: "3m".to_string(),
            target: None,
        }),
    )
}

fn system_service_rule(cluster_name: &str, group_id: &str, name: &str, prefix: &str) -> AlertRule {
    rule(
        cluster_name,
        group_id,
        name,
        RuleCondition::SystemService(SystemServiceRule {
            component_prefix: prefix.to_string(),
        }),
    )
}
