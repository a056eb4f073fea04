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

//! Alerting Controller - keeps Alertmanager and Prometheus rules in line with
//! the `AlertGroup`, `AlertRule` and `Notifier` resources of one cluster
//!
//! - Compiles alert policies into the Alertmanager config secret and
//!   `PrometheusRule` objects
//! - Reconciles alert state and silences with Alertmanager
//! - Evaluates pod, workload, node, event and system component rules
//! - Serves health and readiness endpoints

use alerting::{controller, AlertingConfig, DeploymentFlag};
use anyhow::Context as _;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    cluster_name: String,
    deployed: DeploymentFlag,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        "Starting 5D Labs Alerting Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_alerting_config();
    config.validate().context("invalid alerting configuration")?;

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!(cluster = %config.cluster.name, "Connected to Kubernetes cluster");

    let token = CancellationToken::new();
    let deployed = DeploymentFlag::default();
    let state = AppState {
        cluster_name: config.cluster.name.clone(),
        deployed: deployed.clone(),
    };

    let controller_handle = {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = controller::run(client, config, deployed, token.clone()).await {
                error!(error = %e, "Alerting controller failed");
                token.cancel();
            }
        })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .context("failed to bind 0.0.0.0:8080")?;
    info!("Alerting controller HTTP server listening on 0.0.0.0:8080");

    tokio::spawn({
        let token = token.clone();
        async move {
            shutdown_signal().await;
            token.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await?;

    if let Err(e) = controller_handle.await {
        error!(error = %e, "Alerting controller task did not stop cleanly");
    }
    info!("Alerting controller stopped");

    Ok(())
}

/// `RUST_LOG` filter, default `info`; JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_alerting_config() -> AlertingConfig {
    let override_path = std::env::var("ALERTING_CONFIG_PATH").ok();
    let config_path = override_path
        .as_deref()
        .filter(|path| Path::new(path).exists())
        .unwrap_or("/config/config.yaml");

    match AlertingConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded alerting configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            AlertingConfig::default()
        }
    }
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "alerting-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "alerting-controller",
        "cluster": state.cluster_name,
        "alertmanagerDeployed": state.deployed.is_deployed(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
