//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Aggregated web and database health verdicts."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use tsd_common::config::DeploymentConfig;
use tsd_common::time::duration_to_millis;
use tsd_metrics::DeployMetrics;

use crate::readiness::{Outcome, ReadinessProber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentStatus {
    Up,
    Down,
    TimedOut,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Up => "up",
            ComponentStatus::Down => "down",
            ComponentStatus::TimedOut => "timed-out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub detail: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub components: IndexMap<String, ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthVerdict {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Combine component results into the overall verdict.
pub fn verdict_for(web: ComponentStatus, database: ComponentStatus) -> HealthStatus {
    match (web, database) {
        (ComponentStatus::Up, ComponentStatus::Up) => HealthStatus::Healthy,
        (ComponentStatus::Up, ComponentStatus::TimedOut) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

/// HTTP liveness check of the web service.
#[async_trait]
pub trait WebProbe: Send + Sync {
    /// `Ok` with a short detail on HTTP 200, `Err` with the reason otherwise.
    async fn get(&self, url: &str) -> std::result::Result<String, String>;
}

pub struct HttpWebProbe {
    client: reqwest::Client,
}

impl HttpWebProbe {
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tsdctl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebProbe for HttpWebProbe {
    async fn get(&self, url: &str) -> std::result::Result<String, String> {
        match self.client.get(url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                Ok(format!("{} returned 200", url))
            }
            Ok(response) => Err(format!("{} returned {}", url, response.status())),
            Err(err) if err.is_timeout() => Err(format!("{} timed out", url)),
            Err(err) => Err(format!("{}: {}", url, err)),
        }
    }
}

pub struct HealthAggregator {
    config: Arc<DeploymentConfig>,
    web: Arc<dyn WebProbe>,
    prober: Arc<ReadinessProber>,
    metrics: Option<DeployMetrics>,
}

impl HealthAggregator {
    pub fn new(
        config: Arc<DeploymentConfig>,
        web: Arc<dyn WebProbe>,
        prober: Arc<ReadinessProber>,
    ) -> Self {
        Self {
            config,
            web,
            prober,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<DeployMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub async fn check(&self) -> HealthVerdict {
        let (web, database) = tokio::join!(self.check_web(), self.check_database());
        let status = verdict_for(web.status, database.status);
        if let Some(metrics) = &self.metrics {
            metrics.set_component_up(self.config.web_service(), web.status == ComponentStatus::Up);
            metrics.set_component_up(
                self.config.database_service(),
                database.status == ComponentStatus::Up,
            );
        }
        let mut components = IndexMap::new();
        components.insert(self.config.web_service().to_owned(), web);
        components.insert(self.config.database_service().to_owned(), database);
        debug!(status = %status, "health verdict computed");
        HealthVerdict {
            status,
            components,
            checked_at: Utc::now(),
        }
    }

    async fn check_web(&self) -> ComponentHealth {
        let url = self.config.web.health_url();
        let limit = self.config.health.web_timeout;
        let began = Instant::now();
        let (status, detail) = match tokio::time::timeout(limit, self.web.get(&url)).await {
            Ok(Ok(detail)) => (ComponentStatus::Up, detail),
            Ok(Err(detail)) => (ComponentStatus::Down, detail),
            Err(_) => (ComponentStatus::TimedOut, format!("{} gave no answer in time", url)),
        };
        ComponentHealth {
            status,
            detail,
            latency_ms: duration_to_millis(began.elapsed()),
        }
    }

    async fn check_database(&self) -> ComponentHealth {
        let limit = self.config.health.database_timeout;
        let began = Instant::now();
        let (status, detail) = match tokio::time::timeout(limit, self.prober.query_once()).await {
            Ok(Ok(entry)) => match entry.outcome {
                Outcome::Passed => (ComponentStatus::Up, entry.detail),
                Outcome::TimedOut => (ComponentStatus::TimedOut, entry.detail),
                _ => (ComponentStatus::Down, entry.detail),
            },
            Ok(Err(err)) => (ComponentStatus::Down, err.to_string()),
            Err(_) => (
                ComponentStatus::TimedOut,
                "query probe gave no answer in time".to_owned(),
            ),
        };
        ComponentHealth {
            status,
            detail,
            latency_ms: duration_to_millis(began.elapsed()),
        }
    }
}
