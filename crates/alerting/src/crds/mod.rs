pub mod group;
pub mod notifier;
pub mod prometheus_rule;
pub mod rule;

pub use group::*;
pub use notifier::*;
pub use prometheus_rule::*;
pub use rule::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where a group or rule applies.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(tag = "kind")]
pub enum PolicyScope {
    #[default]
    Cluster,
    Project {
        /// `<cluster>:<project>`
        #[serde(rename = "projectName")]
        project_name: String,
    },
}

impl PolicyScope {
    /// Project ID part of the project reference, if project scoped.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            PolicyScope::Cluster => None,
            PolicyScope::Project { project_name } => Some(
                project_name
                    .split_once(':')
                    .map_or(project_name.as_str(), |(_, project)| project),
            ),
        }
    }
}

fn default_group_wait() -> u64 {
    180
}

fn default_group_interval() -> u64 {
    180
}

fn default_repeat_interval() -> u64 {
    3600
}

/// Route timing in seconds.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct Timing {
    #[serde(rename = "groupWaitSeconds", default = "default_group_wait")]
    pub group_wait_seconds: u64,

    #[serde(rename = "groupIntervalSeconds", default = "default_group_interval")]
    pub group_interval_seconds: u64,

    #[serde(rename = "repeatIntervalSeconds", default = "default_repeat_interval")]
    pub repeat_interval_seconds: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            group_wait_seconds: default_group_wait(),
            group_interval_seconds: default_group_interval(),
            repeat_interval_seconds: default_repeat_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_strips_cluster_prefix() {
        let scope = PolicyScope::Project {
            project_name: "c-1:p-abc".to_string(),
        };
        assert_eq!(scope.project_id(), Some("p-abc"));
        assert_eq!(PolicyScope::Cluster.project_id(), None);
    }

    #[test]
    fn scope_is_tagged_by_kind() {
        let scope: PolicyScope =
            serde_yaml::from_str("kind: Project\nprojectName: c-1:p-abc\n").unwrap();
        assert_eq!(
            scope,
            PolicyScope::Project {
                project_name: "c-1:p-abc".to_string()
            }
        );
        let cluster: PolicyScope = serde_yaml::from_str("kind: Cluster\n").unwrap();
        assert_eq!(cluster, PolicyScope::Cluster);
    }

    #[test]
    fn timing_defaults() {
        let timing: Timing = serde_yaml::from_str("groupWaitSeconds: 30\n").unwrap();
        assert_eq!(timing.group_wait_seconds, 30);
        assert_eq!(timing.group_interval_seconds, 180);
        assert_eq!(timing.repeat_interval_seconds, 3600);
    }
}
