//! Compiles alert groups, rules and notifiers into an Alertmanager
//! configuration and Prometheus rule groups.
//!
//! Compilation never fails as a whole: a rule whose query cannot be resolved
//! or a recipient whose notifier is missing is logged and left out.

pub mod alertmanager_config;
pub mod metric;
pub mod query;
pub mod template;

pub use alertmanager_config::{prometheus_duration, DeliveryConfig, Receiver, Route};
pub use metric::build_expr;
pub use query::{QueryConditionBuilder, QueryConditions};

use crate::crds::{
    AlertGroup, AlertRule, Notifier, NotifierConfig, PolicyScope, PrometheusRule,
    PrometheusRuleSpec, Recipient, RuleCondition, RuleGroup, Timing, RULE_SOURCE_LABEL,
    RULE_SOURCE_VALUE,
};
use crate::rule_ids::RuleIdRegistry;
use crate::store::ClusterResources;
use crate::types::{
    project_monitor_namespace, rule_object_name, AlertState, Result, LABEL_ALERT_TYPE,
    LABEL_GROUP_ID, LABEL_RULE_ID,
};
use alertmanager_config::{
    EmailReceiver, GlobalConfig, PagerdutyReceiver, SlackReceiver, WebhookReceiver,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use metric::{compile_metric_rule, MetricRuleContext};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument, warn};

pub const DEFAULT_RECEIVER: &str = "default";
pub const PAGERDUTY_URL: &str = "https://events.pagerduty.com/generic/2010-04-15/create_event.json";
const RESOLVE_TIMEOUT: &str = "5m";
const ROOT_GROUP_WAIT: u64 = 60;
const ROOT_GROUP_INTERVAL: u64 = 10;
const ROOT_REPEAT_INTERVAL: u64 = 3600;
const EVENT_GROUP_INTERVAL: u64 = 1;

/// Everything the compiler reads, listed once per pass.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub groups: Vec<AlertGroup>,
    pub rules: Vec<AlertRule>,
    pub notifiers: Vec<Notifier>,
}

/// Rule group destined for one `PrometheusRule` object.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMetricRuleGroup {
    pub namespace: String,
    pub group_id: String,
    pub group: RuleGroup,
}

impl CompiledMetricRuleGroup {
    pub fn object_name(&self) -> String {
        rule_object_name(&self.group_id)
    }

    pub fn spec(&self) -> PrometheusRuleSpec {
        PrometheusRuleSpec {
            groups: vec![self.group.clone()],
        }
    }

    pub fn to_object(&self) -> PrometheusRule {
        PrometheusRule {
            metadata: ObjectMeta {
                name: Some(self.object_name()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    RULE_SOURCE_LABEL.to_string(),
                    RULE_SOURCE_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            spec: self.spec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledOutput {
    pub delivery: DeliveryConfig,
    pub metric_groups: Vec<CompiledMetricRuleGroup>,
}

impl CompiledOutput {
    /// `config.yml` contents.
    pub fn render_config(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.delivery)?)
    }
}

pub struct RuleCompiler {
    cluster_name: String,
    monitoring_namespace: String,
    rule_ids: RuleIdRegistry,
    queries: QueryConditions,
}

impl RuleCompiler {
    pub fn new(
        cluster_name: impl Into<String>,
        monitoring_namespace: impl Into<String>,
        rule_ids: RuleIdRegistry,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            monitoring_namespace: monitoring_namespace.into(),
            rule_ids,
            queries: QueryConditions::default(),
        }
    }

    #[must_use]
    pub fn with_queries(mut self, queries: QueryConditions) -> Self {
        self.queries = queries;
        self
    }

    /// Namespace of the rule object for a scope.
    pub fn rule_namespace(&self, scope: &PolicyScope) -> String {
        match scope.project_id() {
            Some(project) => project_monitor_namespace(&self.monitoring_namespace, project),
            None => self.monitoring_namespace.clone(),
        }
    }

    #[instrument(skip_all, fields(cluster = %self.cluster_name))]
    pub async fn compile(
        &self,
        snapshot: &PolicySnapshot,
        resources: &dyn ClusterResources,
    ) -> CompiledOutput {
        let notifiers: HashMap<String, &Notifier> = snapshot
            .notifiers
            .iter()
            .map(|n| (n.reference(), n))
            .collect();

        let groups: BTreeMap<String, &AlertGroup> = snapshot
            .groups
            .iter()
            .filter(|g| g.state() != AlertState::Inactive)
            .map(|g| (g.group_id(), g))
            .collect();

        let mut rules: Vec<&AlertRule> = snapshot.rules.iter().filter(|r| !r.is_inactive()).collect();
        rules.sort_by_key(|r| (r.namespace().unwrap_or_default(), r.name_any()));

        let mut rules_by_group: BTreeMap<&str, Vec<&AlertRule>> = BTreeMap::new();
        for rule in rules {
            let group_id = rule.spec.group_id.as_str();
            if !groups.contains_key(group_id) {
                debug!(rule = %rule.name_any(), group_id, "Skipping rule without an active group");
                continue;
            }
            rules_by_group.entry(group_id).or_default().push(rule);
        }

        let mut delivery = base_config();
        let mut metric_groups = Vec::new();

        for (group_id, rules) in rules_by_group {
            let group = groups[group_id];
            let receiver = build_receiver(group_id, &group.spec.recipients, &notifiers);
            let mut group_route = timed_route(
                Some(group_id),
                BTreeMap::from([(LABEL_GROUP_ID.to_string(), group_id.to_string())]),
                &group.spec.timing,
            );
            let mut rule_group = RuleGroup {
                name: group_id.to_string(),
                rules: Vec::new(),
            };

            for rule in rules {
                let rule_id = self.rule_ids.rule_id(rule);

                if let RuleCondition::Metric(metric) = &rule.spec.condition {
                    let ctx = MetricRuleContext {
                        cluster_name: &self.cluster_name,
                        group_id,
                        rule_id: &rule_id,
                        queries: &self.queries,
                        resources,
                    };
                    match compile_metric_rule(rule, metric, &ctx).await {
                        Ok(compiled) => rule_group.rules.push(compiled),
                        Err(e) => {
                            warn!(rule = %rule.name_any(), error = %e, "Failed to resolve metric rule, skipping");
                            continue;
                        }
                    }
                }

                let timing = rule.spec.timing.as_ref().unwrap_or(&group.spec.timing);
                let mut rule_route = timed_route(
                    None,
                    BTreeMap::from([(LABEL_RULE_ID.to_string(), rule_id)]),
                    timing,
                );
                if matches!(rule.spec.condition, RuleCondition::Event(_)) {
                    rule_route.routes.push(Route {
                        match_labels: BTreeMap::from([(
                            LABEL_ALERT_TYPE.to_string(),
                            "event".to_string(),
                        )]),
                        group_interval: Some(prometheus_duration(EVENT_GROUP_INTERVAL)),
                        ..Default::default()
                    });
                }
                group_route.routes.push(rule_route);
            }

            if receiver.is_empty() {
                warn!(group_id, "AlertGroup has no resolvable recipients, leaving it out of routing");
            } else {
                delivery.receivers.push(receiver);
                delivery.route.routes.push(group_route);
            }

            if !rule_group.rules.is_empty() {
                metric_groups.push(CompiledMetricRuleGroup {
                    namespace: self.rule_namespace(&group.spec.scope),
                    group_id: group_id.to_string(),
                    group: rule_group,
                });
            }
        }

        CompiledOutput {
            delivery,
            metric_groups,
        }
    }
}

fn base_config() -> DeliveryConfig {
    DeliveryConfig {
        global: GlobalConfig {
            resolve_timeout: RESOLVE_TIMEOUT.to_string(),
            pagerduty_url: PAGERDUTY_URL.to_string(),
        },
        route: Route {
            receiver: Some(DEFAULT_RECEIVER.to_string()),
            group_by: vec![LABEL_GROUP_ID.to_string()],
            group_wait: Some(prometheus_duration(ROOT_GROUP_WAIT)),
            group_interval: Some(prometheus_duration(ROOT_GROUP_INTERVAL)),
            repeat_interval: Some(prometheus_duration(ROOT_REPEAT_INTERVAL)),
            ..Default::default()
        },
        receivers: vec![Receiver {
            name: DEFAULT_RECEIVER.to_string(),
            ..Default::default()
        }],
        templates: vec![template::TEMPLATE_PATH.to_string()],
    }
}

fn timed_route(receiver: Option<&str>, match_labels: BTreeMap<String, String>, timing: &Timing) -> Route {
    Route {
        receiver: receiver.map(str::to_string),
        match_labels,
        group_wait: Some(prometheus_duration(timing.group_wait_seconds)),
        group_interval: Some(prometheus_duration(timing.group_interval_seconds)),
        repeat_interval: Some(prometheus_duration(timing.repeat_interval_seconds)),
        ..Default::default()
    }
}

fn or_override(default: &str, recipient: &Recipient) -> String {
    if recipient.recipient.is_empty() {
        default.to_string()
    } else {
        recipient.recipient.clone()
    }
}

/// Receiver named by the group ID with one entry per resolvable recipient.
fn build_receiver(
    group_id: &str,
    recipients: &[Recipient],
    notifiers: &HashMap<String, &Notifier>,
) -> Receiver {
    let mut receiver = Receiver {
        name: group_id.to_string(),
        ..Default::default()
    };

    for recipient in recipients {
        let Some(notifier) = notifiers.get(&recipient.notifier_name) else {
            warn!(group_id, notifier = %recipient.notifier_name, "Notifier not found, dropping recipient");
            continue;
        };

        match &notifier.spec.config {
            NotifierConfig::Pagerduty(pd) => receiver.pagerduty_configs.push(PagerdutyReceiver {
                service_key: or_override(&pd.service_key, recipient),
                description: template::TITLE_TEMPLATE.to_string(),
            }),
            NotifierConfig::Webhook(webhook) => receiver.webhook_configs.push(WebhookReceiver {
                url: or_override(&webhook.url, recipient),
            }),
            NotifierConfig::Slack(slack) => receiver.slack_configs.push(SlackReceiver {
                api_url: slack.url.clone(),
                channel: or_override(&slack.default_recipient, recipient),
                title: template::TITLE_TEMPLATE.to_string(),
                text: template::SLACK_TEXT_TEMPLATE.to_string(),
                color: template::SLACK_COLOR_TEMPLATE.to_string(),
            }),
            NotifierConfig::Smtp(smtp) => receiver.email_configs.push(EmailReceiver {
                to: or_override(&smtp.default_recipient, recipient),
                from: smtp.sender.clone(),
                smarthost: format!("{}:{}", smtp.host, smtp.port),
                auth_username: smtp.username.clone(),
                auth_password: smtp.password.clone(),
                require_tls: smtp.tls,
                headers: BTreeMap::from([(
                    "Subject".to_string(),
                    template::TITLE_TEMPLATE.to_string(),
                )]),
                html: template::EMAIL_HTML_TEMPLATE.to_string(),
            }),
        }
    }

    receiver
}
