//! ---
//! tsd_section: "05-networking-external-interfaces"
//! tsd_subsection: "binary"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Per-invocation settings, logging, metrics and cancellation."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tsd_common::config::{DeploymentConfig, Settings};
use tsd_common::logging::{init_tracing, LogFormat};
use tsd_common::version::VersionInfo;
use tsd_config::Bootstrapped;
use tsd_logging::{tsd_error, LogContext};
use tsd_core::{bootstrap, CancelSignal, DeployError, Orchestrator, ProcessExecutor};
use tsd_metrics::{new_registry, write_textfile, DeployMetrics, SharedRegistry};

const SETTINGS_CANDIDATES: [&str; 2] = ["tsd.toml", "configs/tsd.toml"];

#[derive(Debug, Default)]
pub struct GlobalOptions {
    pub settings: Option<PathBuf>,
    pub metrics_file: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
}

/// State shared by one CLI invocation.
pub struct Session {
    pub settings: Settings,
    pub cancel: CancelSignal,
    metrics: Option<(DeployMetrics, SharedRegistry, PathBuf)>,
}

impl Session {
    pub fn open(options: GlobalOptions) -> Result<Self> {
        let loaded = Settings::load(options.settings.as_deref(), &SETTINGS_CANDIDATES[..])
            .map_err(|err| DeployError::Config(format!("{:#}", err)))?;
        let mut settings = loaded.settings;
        if let Some(format) = options.log_format {
            settings.logging.format = format;
        }
        if let Err(err) = init_tracing("tsdctl", &settings.logging) {
            tsd_logging::init();
            warn!(error = %err, "file logging unavailable; logging to console only");
        }
        let digest = tsd_config::hash_settings(&settings).unwrap_or_default();
        match &loaded.source {
            Some(path) => info!(settings = %path.display(), digest = %digest, "settings loaded"),
            None => debug!(digest = %digest, "using built-in settings"),
        }

        let metrics = match options.metrics_file {
            Some(path) => {
                let registry = new_registry();
                let metrics = DeployMetrics::new(registry.clone())?;
                let version = VersionInfo::current();
                metrics.set_build_info(version.semver, version.profile);
                Some((metrics, registry, path))
            }
            None => None,
        };

        let cancel = CancelSignal::new();
        cancel.cancel_on_ctrl_c();
        Ok(Self {
            settings,
            cancel,
            metrics,
        })
    }

    pub fn env_file(&self) -> &Path {
        &self.settings.project.env_file
    }

    /// Create the configuration resource if needed, then assemble the config.
    pub fn bootstrap(&self) -> Result<Bootstrapped> {
        bootstrap(&self.settings).context("bootstrap")
    }

    /// Configuration from the existing resource; never creates it.
    pub fn config(&self) -> Result<Arc<DeploymentConfig>> {
        let config = tsd_config::load_config(self.env_file(), &self.settings)
            .map_err(DeployError::from)
            .with_context(|| {
                format!(
                    "run `tsdctl init` to create {}",
                    self.env_file().display()
                )
            })?;
        Ok(config)
    }

    pub fn orchestrator(&self, config: Arc<DeploymentConfig>) -> Result<Orchestrator> {
        let orchestrator = Orchestrator::builder(config, Arc::new(ProcessExecutor))
            .cancel(self.cancel.clone())
            .metrics(self.metrics.as_ref().map(|(metrics, _, _)| metrics.clone()))
            .build()?;
        Ok(orchestrator)
    }

    /// Orchestrator over the existing configuration resource.
    pub fn connect(&self) -> Result<Orchestrator> {
        self.orchestrator(self.config()?)
    }

    /// Flush the metrics textfile, if one was requested.
    pub fn finish(&self) {
        if let Some((_, registry, path)) = &self.metrics {
            match write_textfile(registry, path) {
                Ok(()) => debug!(path = %path.display(), "metrics written"),
                Err(err) => tsd_error!(
                    context = LogContext::new()
                        .with_target(self.settings.project.name.as_str())
                        .with_step("metrics"),
                    "failed to write metrics to {}: {}",
                    path.display(),
                    err
                ),
            }
        }
    }
}
