/*
 * 5D Labs Agent Platform - Cluster Alerting Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Cluster alerting core
//!
//! Turns `AlertGroup`, `AlertRule` and `Notifier` resources into a running
//! Alertmanager/Prometheus pipeline and keeps the user-visible alert state in
//! line with what Alertmanager reports:
//! - [`compiler`] builds the Alertmanager config and `PrometheusRule` groups
//! - [`syncer`] persists compiled output and reconciles alert state
//! - [`watcher`] evaluates rule kinds that Prometheus cannot express and
//!   pushes alerts directly

pub mod backend;
pub mod compiler;
pub mod config;
pub mod controller;
pub mod crds;
pub mod precan;
pub mod rule_ids;
pub mod store;
pub mod syncer;
pub mod types;
pub mod watcher;

// Re-export commonly used types
pub use backend::{AlertmanagerClient, DeliveryBackend, DeploymentFlag};
pub use compiler::{CompiledOutput, RuleCompiler};
pub use config::AlertingConfig;
pub use crds::{AlertGroup, AlertRule, Notifier, PrometheusRule};
pub use rule_ids::RuleIdRegistry;
pub use syncer::{ConfigSyncer, StateSyncer};
pub use types::{AlertState, Error, Result};
