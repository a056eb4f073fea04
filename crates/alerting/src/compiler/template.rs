//! Notification templates and metric expression placeholders.

use std::collections::BTreeMap;

/// Path Alertmanager loads the notification template from.
pub const TEMPLATE_PATH: &str = "/etc/alertmanager/config/notification.tmpl";

pub const TITLE_TEMPLATE: &str = r#"{{ template "platform.title" . }}"#;
pub const SLACK_TEXT_TEMPLATE: &str = r#"{{ template "slack.text" . }}"#;
pub const EMAIL_HTML_TEMPLATE: &str = r#"{{ template "email.text" . }}"#;
pub const SLACK_COLOR_TEMPLATE: &str = r#"{{ if eq (index .Alerts 0).Labels.severity "critical" }}danger{{ else if eq (index .Alerts 0).Labels.severity "warning" }}warning{{ else }}good{{ end }}"#;

/// Template file stored next to `config.yml` in the Alertmanager secret.
pub const NOTIFICATION_TEMPLATE: &str = r#"{{ define "platform.title" }}[{{ (index .Alerts 0).Labels.severity | toUpper }}] {{ (index .Alerts 0).Labels.alert_name }} on {{ (index .Alerts 0).Labels.cluster_name }}{{ end }}

{{ define "__alert_details" }}{{ with .Labels }}
{{- if eq .alert_type "metric" }}Expression {{ .alert_name }} is {{ .comparison }} {{ .threshold_value }} for {{ .duration }}
{{- else if eq .alert_type "event" }}{{ .event_type }} event on {{ .resource_kind }} {{ .target_namespace }}/{{ .target_name }}: {{ .event_message }} (count {{ .event_count }}, first seen {{ .event_firstseen }}, last seen {{ .event_lastseen }})
{{- else if eq .alert_type "systemService" }}System component {{ .component_name }} is unhealthy{{ if .logs }}: {{ .logs }}{{ end }}
{{- else if eq .alert_type "workload" }}{{ .workload_kind | title }} {{ .workload_namespace }}/{{ .workload_name }} has {{ .available_replicas }} of {{ .desired_replicas }} replicas available, below {{ .available_percentage }}%
{{- else if eq .alert_type "pod" }}Pod {{ .namespace }}/{{ .pod_name }}: {{ .condition }}{{ if .container_name }} (container {{ .container_name }}){{ end }}{{ if .restart_times }}, restarted at least {{ .restart_times }} times within {{ .restart_interval }}s{{ end }}{{ if .logs }}: {{ .logs }}{{ end }}
{{- else if eq .alert_type "node" }}Node {{ .node_name }}: {{ .condition }}{{ if .current_value }}, {{ .current_value }}% of allocatable requested (threshold {{ .threshold_value }}%){{ end }}
{{- end }}{{ end }}{{ end }}

{{ define "slack.text" }}{{ range .Alerts }}{{ template "__alert_details" . }}
{{ end }}{{ end }}

{{ define "email.text" }}<html><body><ul>{{ range .Alerts }}<li>{{ template "__alert_details" . }}</li>{{ end }}</ul></body></html>{{ end }}
"#;

/// Replace every `${key}` with its value. Unknown placeholders are left as is.
pub fn substitute(template: &str, values: &BTreeMap<&'static str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}

/// Labels of `labels` that the notification template never prints. The
/// correlation labels are routed on, not rendered, and are skipped.
#[cfg(test)]
pub(crate) fn unrendered_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    const ROUTING: [&str; 6] = [
        "alert_type",
        "group_id",
        "rule_id",
        "alert_name",
        "severity",
        "cluster_name",
    ];
    labels
        .into_iter()
        .filter(|key| !ROUTING.contains(key))
        .filter(|key| {
            !NOTIFICATION_TEMPLATE.contains(&format!(".{key} "))
                && !NOTIFICATION_TEMPLATE.contains(&format!(".{key}}}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_placeholders() {
        let values = BTreeMap::from([
            ("cluster_name", "c-1".to_string()),
            ("instance", "(10.0.0.1.*|10.0.0.2.*)".to_string()),
        ]);
        let expr = r#"node_load1{cluster="${cluster_name}",instance=~"${instance}"} / ${missing}"#;
        assert_eq!(
            substitute(expr, &values),
            r#"node_load1{cluster="c-1",instance=~"(10.0.0.1.*|10.0.0.2.*)"} / ${missing}"#
        );
    }

    #[test]
    fn template_defines_every_referenced_name() {
        for name in ["platform.title", "slack.text", "email.text"] {
            assert!(NOTIFICATION_TEMPLATE.contains(&format!("define \"{name}\"")));
        }
    }

    #[test]
    fn stale_label_names_are_detected() {
        assert!(unrendered_labels(["condition", "current_value", "threshold_value"]).is_empty());
        assert_eq!(unrendered_labels(["used", "total", "rule_id"]), vec!["used", "total"]);
    }
}
