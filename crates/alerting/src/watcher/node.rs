//! Node rules: readiness and requested cpu/memory share of allocatable.

use super::{RuleWatcher, WatchReport, WatcherContext};
use crate::crds::{NodeCondition, NodeRule, RuleCondition};
use crate::types::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{instrument, warn};

#[derive(Debug, Default)]
pub struct NodeWatcher;

impl NodeWatcher {
    pub fn new() -> Self {
        Self
    }

    async fn nodes(ctx: &WatcherContext, rule: &NodeRule) -> Result<Vec<Node>> {
        if let Some(name) = &rule.node_name {
            let node = ctx.resources.get_node(name).await?;
            if node.is_none() {
                warn!(node = %name, "Node rule targets a node that does not exist");
            }
            return Ok(node.into_iter().collect());
        }
        let selector = rule.selector.clone().unwrap_or_default();
        ctx.resources.list_nodes(&selector).await
    }
}

/// Binary suffixes come first so `Mi` is not read as `M` with a stray `i`.
const QUANTITY_SUFFIXES: [(&str, f64); 15] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a Kubernetes quantity (`250m`, `1.5`, `512Mi`, `2G`, `1e3`) into
/// base units. `Quantity` itself is an unparsed string.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (number, factor) = QUANTITY_SUFFIXES
        .iter()
        .find_map(|(suffix, factor)| raw.strip_suffix(suffix).map(|n| (n, *factor)))
        .unwrap_or((raw, 1.0));
    // plain numbers, including exponent notation (`1e3`, `5E-3`)
    number.parse::<f64>().ok().filter(|n| n.is_finite()).map(|n| n * factor)
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .is_some_and(|c| c.status == "True")
}

/// Sum of container requests for `resource` across `pods`.
fn requested(pods: &[Pod], resource: &str) -> f64 {
    pods.iter()
        .filter_map(|p| p.spec.as_ref())
        .flat_map(|spec| spec.containers.iter())
        .filter_map(|c| c.resources.as_ref()?.requests.as_ref()?.get(resource))
        .filter_map(|q| parse_quantity(&q.0))
        .sum()
}

fn allocatable(node: &Node, resource: &str) -> Option<f64> {
    let quantity = node.status.as_ref()?.allocatable.as_ref()?.get(resource)?;
    parse_quantity(&quantity.0).filter(|v| *v > 0.0)
}

/// Requested share of allocatable `resource`, in percent.
pub fn request_percent(node: &Node, pods: &[Pod], resource: &str) -> Option<f64> {
    let total = allocatable(node, resource)?;
    Some(requested(pods, resource) * 100.0 / total)
}

#[async_trait]
impl RuleWatcher for NodeWatcher {
    fn name(&self) -> &'static str {
        "node"
    }

    #[instrument(skip_all)]
    async fn watch_rules(&mut self, ctx: &WatcherContext) -> Result<WatchReport> {
        let mut report = WatchReport::default();

        for rule in ctx.eligible_rules().await? {
            let RuleCondition::Node(node_rule) = &rule.spec.condition else {
                continue;
            };
            report.evaluated += 1;

            for node in Self::nodes(ctx, node_rule).await? {
                let node_name = node.name_any();
                let breach = match node_rule.condition {
                    NodeCondition::NotReady => (!is_ready(&node)).then(BTreeMap::new),
                    NodeCondition::Mem | NodeCondition::Cpu => {
                        let (resource, threshold) = if node_rule.condition == NodeCondition::Mem {
                            ("memory", node_rule.mem_threshold)
                        } else {
                            ("cpu", node_rule.cpu_threshold)
                        };
                        let pods = ctx.resources.list_pods_on_node(&node_name).await?;
                        request_percent(&node, &pods, resource)
                            .filter(|percent| *percent > f64::from(threshold))
                            .map(|percent| {
                                BTreeMap::from([
                                    ("current_value".to_string(), format!("{percent:.0}")),
                                    ("threshold_value".to_string(), threshold.to_string()),
                                ])
                            })
                    }
                };

                if let Some(extra) = breach {
                    let mut labels = ctx.alert_labels(&rule);
                    labels.insert("node_name".to_string(), node_name);
                    labels.insert("condition".to_string(), node_rule.condition.as_str().to_string());
                    labels.extend(extra);
                    ctx.push(&labels).await?;
                    report.pushed += 1;
                }
            }
        }

        Ok(report)
    }
}
