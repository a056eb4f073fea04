//! Alertmanager v2 HTTP client.

use super::{ActiveAlert, DeliveryBackend};
use crate::config::AlertmanagerSettings;
use crate::types::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

const SILENCE_CREATOR: &str = "alerting-controller";

/// How the Alertmanager base URL is found.
#[derive(Clone)]
pub enum Endpoint {
    /// Fixed base URL such as `http://127.0.0.1:9093`.
    Fixed(String),
    /// Resolved from a Service on every call so a redeployed Alertmanager is picked up.
    Service {
        client: Client,
        namespace: String,
        name: String,
        port: u16,
    },
}

impl Endpoint {
    async fn base_url(&self) -> Result<String> {
        match self {
            Endpoint::Fixed(url) => Ok(url.trim_end_matches('/').to_string()),
            Endpoint::Service {
                client,
                namespace,
                name,
                port,
            } => {
                let api: Api<Service> = Api::namespaced(client.clone(), namespace);
                let service = api.get(name).await?;
                let cluster_ip = service
                    .spec
                    .and_then(|spec| spec.cluster_ip)
                    .filter(|ip| !ip.is_empty() && ip != "None");
                // headless services are reached through cluster DNS
                let host = cluster_ip.unwrap_or_else(|| format!("{name}.{namespace}.svc"));
                Ok(format!("http://{host}:{port}"))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default = "default_is_equal")]
    pub is_equal: bool,
}

fn default_is_equal() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostableSilence {
    matchers: Vec<Matcher>,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    created_by: String,
    comment: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GettableSilence {
    id: String,
    #[serde(default)]
    matchers: Vec<Matcher>,
    #[serde(default)]
    status: SilenceStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SilenceStatus {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostableAlert<'a> {
    labels: &'a BTreeMap<String, String>,
    starts_at: DateTime<Utc>,
}

pub struct AlertmanagerClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    silence_duration: chrono::Duration,
}

impl AlertmanagerClient {
    pub fn new(endpoint: Endpoint, timeout: Duration, silence_hours: i64) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            silence_duration: chrono::Duration::hours(silence_hours),
        })
    }

    /// Client for the Alertmanager described by the controller settings.
    pub fn from_settings(client: Client, settings: &AlertmanagerSettings) -> Result<Self> {
        let endpoint = match &settings.endpoint {
            Some(url) => Endpoint::Fixed(url.clone()),
            None => Endpoint::Service {
                client,
                namespace: settings.namespace.clone(),
                name: settings.service_name.clone(),
                port: settings.port,
            },
        };
        Self::new(
            endpoint,
            Duration::from_secs(settings.request_timeout_seconds),
            settings.silence_hours,
        )
    }

    async fn url(&self, path: &str) -> Result<String> {
        Ok(format!("{}{path}", self.endpoint.base_url().await?))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn list_silences(&self) -> Result<Vec<GettableSilence>> {
        let response = self.http.get(self.url("/api/v2/silences").await?).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

fn equality_matcher(label: &str, value: &str) -> Matcher {
    Matcher {
        name: label.to_string(),
        value: value.to_string(),
        is_regex: false,
        is_equal: true,
    }
}

#[async_trait]
impl DeliveryBackend for AlertmanagerClient {
    async fn list_alerts(&self) -> Result<Vec<ActiveAlert>> {
        let response = self
            .http
            .get(self.url("/api/v2/alerts").await?)
            .query(&[("active", "true"), ("silenced", "true"), ("inhibited", "true")])
            .send()
            .await?;
        let alerts: Vec<ActiveAlert> = Self::check(response).await?.json().await?;
        debug!(count = alerts.len(), "Fetched active alerts");
        Ok(alerts)
    }

    #[instrument(skip(self))]
    async fn add_silence(&self, label: &str, value: &str) -> Result<()> {
        let now = Utc::now();
        let silence = PostableSilence {
            matchers: vec![equality_matcher(label, value)],
            starts_at: now,
            ends_at: now + self.silence_duration,
            created_by: SILENCE_CREATOR.to_string(),
            comment: format!("Muted {label}={value}"),
        };
        let response = self
            .http
            .post(self.url("/api/v2/silences").await?)
            .json(&silence)
            .send()
            .await?;
        Self::check(response).await?;
        info!("Created silence");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_silence(&self, label: &str, value: &str) -> Result<()> {
        let wanted = vec![equality_matcher(label, value)];
        for silence in self.list_silences().await? {
            if silence.status.state == "expired" || silence.matchers != wanted {
                continue;
            }
            let response = self
                .http
                .delete(self.url(&format!("/api/v2/silence/{}", silence.id)).await?)
                .send()
                .await?;
            Self::check(response).await?;
            info!(silence_id = %silence.id, "Expired silence");
        }
        Ok(())
    }

    async fn push_alert(&self, labels: &BTreeMap<String, String>) -> Result<()> {
        let alerts = [PostableAlert {
            labels,
            starts_at: Utc::now(),
        }];
        let response = self
            .http
            .post(self.url("/api/v2/alerts").await?)
            .json(&alerts)
            .send()
            .await?;
        Self::check(response).await?;
        debug!(?labels, "Pushed alert");
        Ok(())
    }
}
