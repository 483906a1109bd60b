//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Service topology control over the compose project."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tsd_common::config::{DeploymentConfig, ProbeKind, ServiceRole};

use crate::cancel::CancelSignal;
use crate::compose::ComposeProject;
use crate::error::{summarize_output, DeployError, Result};
use crate::executor::CommandOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Stopped => "stopped",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Failed => "failed",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed service as tracked during one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub role: ServiceRole,
    pub state: RuntimeState,
    pub probe: ProbeKind,
    pub depends_on: Vec<String>,
}

/// Live state of one service as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub state: RuntimeState,
    /// Raw platform status text, e.g. `Up 3 minutes (healthy)`.
    pub status: String,
    pub containers: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    service: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    health: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    exit_code: i32,
}

impl PsEntry {
    fn runtime_state(&self) -> RuntimeState {
        match self.state.as_str() {
            "running" => match self.health.as_str() {
                "starting" => RuntimeState::Starting,
                "unhealthy" => RuntimeState::Failed,
                _ => RuntimeState::Running,
            },
            "created" | "restarting" => RuntimeState::Starting,
            "dead" | "removing" => RuntimeState::Failed,
            "exited" if self.exit_code != 0 => RuntimeState::Failed,
            _ => RuntimeState::Stopped,
        }
    }
}

/// Parse `compose ps --format json`, either one JSON array or one object per line.
pub fn parse_ps_output(stdout: &str) -> Result<Vec<(String, RuntimeState, String)>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|err| {
            DeployError::topology("*", "status", format!("unparseable ps output: {}", err))
        })?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|err| {
                    DeployError::topology("*", "status", format!("unparseable ps line: {}", err))
                })
            })
            .collect::<Result<_>>()?
    };
    Ok(entries
        .into_iter()
        .map(|entry| {
            let state = entry.runtime_state();
            (entry.service, state, entry.status)
        })
        .collect())
}

fn worst(a: RuntimeState, b: RuntimeState) -> RuntimeState {
    use RuntimeState::*;
    let rank = |state: RuntimeState| match state {
        Failed => 3,
        Starting => 2,
        Stopped => 1,
        Running => 0,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

/// Builds, starts and stops the declared services.
pub struct TopologyController {
    config: Arc<DeploymentConfig>,
    compose: ComposeProject,
    descriptors: Mutex<IndexMap<String, ServiceDescriptor>>,
    cancel: CancelSignal,
}

impl TopologyController {
    pub fn new(config: Arc<DeploymentConfig>, compose: ComposeProject) -> Self {
        let descriptors = config
            .start_order
            .iter()
            .filter_map(|name| {
                config.services.get(name).map(|service| {
                    (
                        name.clone(),
                        ServiceDescriptor {
                            name: name.clone(),
                            role: service.role,
                            state: RuntimeState::Stopped,
                            probe: service.probe,
                            depends_on: service.depends_on.clone(),
                        },
                    )
                })
            })
            .collect();
        Self {
            config,
            compose,
            descriptors: Mutex::new(descriptors),
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn compose(&self) -> &ComposeProject {
        &self.compose
    }

    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        self.descriptors.lock().values().cloned().collect()
    }

    pub fn descriptor(&self, service: &str) -> Option<ServiceDescriptor> {
        self.descriptors.lock().get(service).cloned()
    }

    fn set_state(&self, service: &str, state: RuntimeState) {
        if let Some(descriptor) = self.descriptors.lock().get_mut(service) {
            debug!(service, from = %descriptor.state, to = %state, "service state change");
            descriptor.state = state;
        }
    }

    fn set_all(&self, state: RuntimeState) {
        for descriptor in self.descriptors.lock().values_mut() {
            descriptor.state = state;
        }
    }

    /// State a service reaches once its start call returned successfully.
    fn started_state(&self, service: &str) -> RuntimeState {
        if service == self.config.database_service() {
            RuntimeState::Starting
        } else {
            RuntimeState::Running
        }
    }

    /// Build every declared service image.
    pub async fn build(&self) -> Result<()> {
        info!(project = %self.compose.project(), "building service images");
        let output = self
            .cancel
            .guard(self.compose.run(["build"], None))
            .await?;
        if !output.success() {
            return Err(DeployError::Build {
                detail: summarize_output(output.diagnostic()),
            });
        }
        Ok(())
    }

    /// Start services in dependency order.
    pub async fn start(&self) -> Result<()> {
        for service in &self.config.start_order {
            if self.descriptor(service).map(|d| d.state) == Some(RuntimeState::Running) {
                debug!(service, "service already running");
                continue;
            }
            self.set_state(service, RuntimeState::Starting);
            info!(service, "starting service");
            let output = self
                .cancel
                .guard(self.compose.run(["up", "-d", "--no-build", service.as_str()], None))
                .await?;
            if !output.success() {
                self.set_state(service, RuntimeState::Failed);
                return Err(DeployError::topology(
                    service,
                    "start",
                    summarize_output(output.diagnostic()),
                ));
            }
            self.set_state(service, self.started_state(service));
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!(project = %self.compose.project(), "stopping services");
        let output = self.cancel.guard(self.compose.run(["stop"], None)).await?;
        self.check("*", "stop", &output)?;
        self.set_all(RuntimeState::Stopped);
        Ok(())
    }

    /// Restart everything; the database must be confirmed ready again.
    pub async fn restart(&self) -> Result<()> {
        info!(project = %self.compose.project(), "restarting services");
        let output = self
            .cancel
            .guard(self.compose.run(["restart"], None))
            .await?;
        self.check("*", "restart", &output)?;
        let names: Vec<String> = self.descriptors.lock().keys().cloned().collect();
        for name in names {
            self.set_state(&name, self.started_state(&name));
        }
        Ok(())
    }

    /// Mark a service running after its readiness was confirmed.
    pub fn confirm_ready(&self, service: &str) {
        self.set_state(service, RuntimeState::Running);
    }

    /// Live state from the platform for every declared service.
    pub async fn status(&self) -> Result<IndexMap<String, ServiceStatus>> {
        let output = self
            .compose
            .run(
                ["ps", "--all", "--format", "json"],
                Some(self.config.readiness.command_timeout),
            )
            .await?;
        self.check("*", "status", &output)?;
        let mut statuses: IndexMap<String, ServiceStatus> = self
            .config
            .start_order
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    ServiceStatus {
                        state: RuntimeState::Stopped,
                        status: "not created".to_owned(),
                        containers: 0,
                    },
                )
            })
            .collect();
        for (service, state, status) in parse_ps_output(&output.stdout)? {
            match statuses.get_mut(&service) {
                Some(entry) if entry.containers == 0 => {
                    *entry = ServiceStatus {
                        state,
                        status,
                        containers: 1,
                    };
                }
                Some(entry) => {
                    entry.state = worst(entry.state, state);
                    entry.containers += 1;
                }
                None => warn!(service = %service, "platform reports undeclared service"),
            }
        }
        Ok(statuses)
    }

    /// Fail unless the platform reports `service` running.
    pub async fn require_running(&self, service: &str) -> Result<()> {
        let statuses = self.status().await?;
        match statuses.get(service) {
            Some(status) if status.state == RuntimeState::Running => Ok(()),
            Some(status) => Err(DeployError::topology(
                service,
                "check",
                format!("service is {} ({})", status.state, status.status),
            )),
            None => Err(DeployError::topology(service, "check", "service not declared")),
        }
    }

    pub async fn logs(&self, follow: bool, service: Option<&str>) -> Result<i32> {
        let mut args = vec!["logs".to_owned(), "--tail".to_owned(), "200".to_owned()];
        if follow {
            args.push("-f".to_owned());
        }
        if let Some(service) = service {
            args.push(service.to_owned());
        }
        self.cancel.guard(self.compose.run_attached(args)).await
    }

    /// Captured command inside a running service.
    pub async fn exec(&self, service: &str, args: &[String]) -> Result<CommandOutput> {
        self.cancel.guard(self.compose.exec(service, args, None)).await
    }

    /// Interactive command inside a running service.
    pub async fn exec_attached(&self, service: &str, args: &[String]) -> Result<i32> {
        self.compose.exec_attached(service, args).await
    }

    /// Remove containers and networks; named volumes only when asked.
    pub async fn down(&self, remove_volumes: bool) -> Result<()> {
        let mut args = vec!["down", "--remove-orphans"];
        if remove_volumes {
            warn!(project = %self.compose.project(), "removing named volumes; database files will be lost");
            args.push("--volumes");
        }
        let output = self.cancel.guard(self.compose.run(args, None)).await?;
        self.check("*", "down", &output)?;
        self.set_all(RuntimeState::Stopped);
        Ok(())
    }

    fn check(&self, service: &str, action: &'static str, output: &CommandOutput) -> Result<()> {
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::topology(
                service,
                action,
                summarize_output(output.diagnostic()),
            ))
        }
    }
}
