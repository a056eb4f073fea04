//! Metric rule compilation into Prometheus alerting rules.

use super::query::QueryConditions;
use super::template::substitute;
use crate::crds::{AlertRule, Comparison, MetricRule, Rule};
use crate::store::ClusterResources;
use crate::types::{Result, LABEL_ALERT_TYPE, LABEL_GROUP_ID, LABEL_RULE_ID};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// `"<expression> <operator> <threshold>"`
pub fn build_expr(expression: &str, comparison: Comparison, threshold: f64) -> String {
    format!("{expression} {} {threshold}", comparison.symbol())
}

pub struct MetricRuleContext<'a> {
    pub cluster_name: &'a str,
    pub group_id: &'a str,
    pub rule_id: &'a str,
    pub queries: &'a QueryConditions,
    pub resources: &'a dyn ClusterResources,
}

pub async fn compile_metric_rule(
    rule: &AlertRule,
    metric: &MetricRule,
    ctx: &MetricRuleContext<'_>,
) -> Result<Rule> {
    let target = metric.target.clone().unwrap_or_default();
    let values = ctx
        .queries
        .resolve(ctx.cluster_name, &target, ctx.resources)
        .await?;
    let expression = substitute(&metric.expression, &values);

    let labels = BTreeMap::from([
        (LABEL_ALERT_TYPE.to_string(), "metric".to_string()),
        (LABEL_GROUP_ID.to_string(), ctx.group_id.to_string()),
        (LABEL_RULE_ID.to_string(), ctx.rule_id.to_string()),
        ("alert_name".to_string(), rule.alert_name()),
        ("severity".to_string(), rule.spec.severity.to_string()),
        (
            "resource_type".to_string(),
            target.resource_kind.as_str().to_string(),
        ),
        ("cluster_name".to_string(), ctx.cluster_name.to_string()),
        ("comparison".to_string(), metric.comparison.as_str().to_string()),
        ("duration".to_string(), metric.duration.clone()),
        (
            "threshold_value".to_string(),
            metric.threshold_value.to_string(),
        ),
    ]);

    Ok(Rule {
        alert: rule.name_any(),
        expr: build_expr(&expression, metric.comparison, metric.threshold_value),
        for_: metric.duration.clone(),
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_expr_appends_operator_and_threshold() {
        assert_eq!(
            build_expr("node_memory_usage", Comparison::GreaterOrEqual, 80.0),
            "node_memory_usage >= 80"
        );
        assert_eq!(
            build_expr(r#"etcd_server_has_leader{job="kube-etcd"}"#, Comparison::Equal, 0.0),
            r#"etcd_server_has_leader{job="kube-etcd"} == 0"#
        );
        assert_eq!(build_expr("ratio", Comparison::LessThan, 0.25), "ratio < 0.25");
        assert_eq!(build_expr("x", Comparison::NotEqual, 1.0), "x != 1");
    }
}
