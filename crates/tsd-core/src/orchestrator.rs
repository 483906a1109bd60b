//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Deployment pipeline composing bootstrap, topology, readiness and migration."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::future::Future;
use std::sync::Arc;

use tsd_common::config::{DeploymentConfig, Settings};
use tsd_config::Bootstrapped;
use tsd_logging::{log_system_event, LogContext, SystemEventOutcome};
use tsd_metrics::DeployMetrics;

use crate::backup::BackupManager;
use crate::cancel::CancelSignal;
use crate::compose::ComposeProject;
use crate::error::{DeployError, Result};
use crate::executor::CommandExecutor;
use crate::health::{HealthAggregator, HttpWebProbe, WebProbe};
use crate::lock::{LockClass, RunLock};
use crate::migrate::{MigrationReport, SchemaApplier};
use crate::readiness::{network_for, NetworkProbe, ReadinessProber, ReadinessReport};
use crate::sql::SqlClient;
use crate::topology::{ServiceDescriptor, TopologyController};

/// Materialize the `.env` resource if needed and assemble the configuration.
pub fn bootstrap(settings: &Settings) -> Result<Bootstrapped> {
    let bootstrapped = tsd_config::ensure_config(
        &settings.project.env_template,
        &settings.project.env_file,
        settings,
    )?;
    Ok(bootstrapped)
}

#[derive(Debug, Clone, Copy)]
pub struct DeployOptions {
    pub build: bool,
    pub collect_static: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            build: true,
            collect_static: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub readiness: ReadinessReport,
    pub migration: MigrationReport,
    pub services: Vec<ServiceDescriptor>,
}

pub struct OrchestratorBuilder {
    config: Arc<DeploymentConfig>,
    executor: Arc<dyn CommandExecutor>,
    network: Option<Arc<dyn NetworkProbe>>,
    web: Option<Arc<dyn WebProbe>>,
    cancel: CancelSignal,
    metrics: Option<DeployMetrics>,
}

impl OrchestratorBuilder {
    pub fn network(mut self, network: Arc<dyn NetworkProbe>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn web_probe(mut self, web: Arc<dyn WebProbe>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn metrics(mut self, metrics: Option<DeployMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let compose = ComposeProject::new(&self.config, self.executor);
        let network = self
            .network
            .unwrap_or_else(|| network_for(&self.config, &compose));
        let web: Arc<dyn WebProbe> = match self.web {
            Some(web) => web,
            None => Arc::new(
                HttpWebProbe::new(self.config.health.web_timeout)
                    .map_err(|err| DeployError::Config(format!("http client: {}", err)))?,
            ),
        };
        let topology = Arc::new(
            TopologyController::new(self.config.clone(), compose.clone())
                .with_cancel(self.cancel.clone()),
        );
        let prober = Arc::new(
            ReadinessProber::new(self.config.clone(), compose.clone(), network)
                .with_cancel(self.cancel.clone())
                .with_metrics(self.metrics.clone()),
        );
        let applier = SchemaApplier::new(self.config.clone(), compose.clone(), prober.clone())
            .with_cancel(self.cancel.clone())
            .with_metrics(self.metrics.clone());
        Ok(Orchestrator {
            config: self.config,
            compose,
            topology,
            prober,
            applier,
            web,
            cancel: self.cancel,
            metrics: self.metrics,
        })
    }
}

/// Owns the components of one invocation and runs the deploy pipeline.
pub struct Orchestrator {
    config: Arc<DeploymentConfig>,
    compose: ComposeProject,
    topology: Arc<TopologyController>,
    prober: Arc<ReadinessProber>,
    applier: SchemaApplier,
    web: Arc<dyn WebProbe>,
    cancel: CancelSignal,
    metrics: Option<DeployMetrics>,
}

impl Orchestrator {
    pub fn builder(
        config: Arc<DeploymentConfig>,
        executor: Arc<dyn CommandExecutor>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            executor,
            network: None,
            web: None,
            cancel: CancelSignal::new(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &Arc<DeploymentConfig> {
        &self.config
    }

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    pub fn prober(&self) -> &ReadinessProber {
        &self.prober
    }

    pub fn applier(&self) -> &SchemaApplier {
        &self.applier
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.config.clone(), self.topology.clone())
            .with_cancel(self.cancel.clone())
            .with_metrics(self.metrics.clone())
    }

    pub fn sql(&self) -> SqlClient {
        SqlClient::new(self.compose.clone(), self.config.database.clone())
    }

    pub fn health(&self) -> HealthAggregator {
        HealthAggregator::new(self.config.clone(), self.web.clone(), self.prober.clone())
            .with_metrics(self.metrics.clone())
    }

    /// build, start, readiness, migrate and optionally collectstatic.
    ///
    /// Stops at the first failing step and leaves the topology as it is.
    pub async fn deploy(&self, options: DeployOptions) -> Result<DeployOutcome> {
        let _lock = self.deploy_lock()?;

        if options.build {
            self.step("build", self.topology.build()).await?;
        }
        self.step("start", self.topology.start()).await?;
        let readiness = self.step("readiness", self.prober.require_ready()).await?;
        self.topology.confirm_ready(self.config.database_service());
        let migration = self.step("migrate", self.applier.apply()).await?;
        if options.collect_static {
            self.step("collectstatic", self.applier.collect_static()).await?;
        }

        let ctx = LogContext::new().with_target(self.compose.project());
        log_system_event(
            Some(&ctx),
            "deploy",
            "deployment pipeline completed",
            SystemEventOutcome::Success,
        );
        Ok(DeployOutcome {
            readiness,
            migration,
            services: self.topology.descriptors(),
        })
    }

    /// Migrations alone, under the same run lock as `deploy`.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let _lock = self.deploy_lock()?;
        self.step("migrate", self.applier.apply()).await
    }

    fn deploy_lock(&self) -> Result<RunLock> {
        RunLock::acquire(
            &self.config.locks.directory,
            self.compose.project(),
            LockClass::Deploy,
        )
    }

    async fn step<T, F>(&self, name: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = work.await;
        if let Err(err) = &result {
            let ctx = LogContext::new()
                .with_target(self.compose.project())
                .with_step(name);
            log_system_event(Some(&ctx), "deploy", &err.to_string(), SystemEventOutcome::Fault);
        }
        result
    }
}
