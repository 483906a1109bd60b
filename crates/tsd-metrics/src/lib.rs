//! ---
//! tsd_section: "03-logging"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Deployment metrics and textfile export."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use tracing::debug;

/// Shared registry type used across components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode the registry in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String> {
    let families = registry.gather();
    TextEncoder::new()
        .encode_to_string(&families)
        .context("failed to encode metrics")
}

/// Write the registry for a node-exporter textfile collector.
///
/// The file is written next to `path` and renamed into place so the collector
/// never reads a partial file.
pub fn write_textfile(registry: &Registry, path: &Path) -> Result<()> {
    let body = render(registry)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("unable to create metrics directory {}", parent.display()))?;
    }
    let staging = path.with_extension("prom.tmp");
    fs::write(&staging, body)
        .with_context(|| format!("unable to write metrics file {}", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("unable to move metrics file into {}", path.display()))?;
    debug!(path = %path.display(), "metrics textfile written");
    Ok(())
}

/// Metrics recorded across one deployer invocation.
#[derive(Clone, Debug)]
pub struct DeployMetrics {
    registry: SharedRegistry,
    probe_attempts: IntCounter,
    layer_failures: IntCounterVec,
    probe_seconds: Histogram,
    migration_steps: IntCounterVec,
    backup_operations: IntCounterVec,
    health_status: IntGaugeVec,
    build_info: GaugeVec,
}

impl DeployMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let probe_attempts = IntCounter::with_opts(Opts::new(
            "tsd_probe_query_attempts_total",
            "Query-layer attempts made by the readiness prober",
        ))?;
        registry.register(Box::new(probe_attempts.clone()))?;

        let layer_failures = IntCounterVec::new(
            Opts::new(
                "tsd_probe_layer_failures_total",
                "Readiness layer failures by layer",
            ),
            &["layer"],
        )?;
        registry.register(Box::new(layer_failures.clone()))?;

        let buckets = prometheus::exponential_buckets(0.5, 2.0, 10)
            .context("failed to construct histogram buckets")?;
        let probe_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tsd_probe_duration_seconds",
                "Wall time of a complete readiness probe",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(probe_seconds.clone()))?;

        let migration_steps = IntCounterVec::new(
            Opts::new(
                "tsd_migration_steps_total",
                "Migration step executions by step and outcome",
            ),
            &["step", "outcome"],
        )?;
        registry.register(Box::new(migration_steps.clone()))?;

        let backup_operations = IntCounterVec::new(
            Opts::new(
                "tsd_backup_operations_total",
                "Backup, restore and delete operations by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(backup_operations.clone()))?;

        let health_status = IntGaugeVec::new(
            Opts::new(
                "tsd_health_component_up",
                "Indicator (0/1) whether a component passed its last health check",
            ),
            &["component"],
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("tsd_build_info", "Build metadata for the deployer binary"),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            probe_attempts,
            layer_failures,
            probe_seconds,
            migration_steps,
            backup_operations,
            health_status,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_probe_attempt(&self) {
        self.probe_attempts.inc();
    }

    pub fn record_layer_failure(&self, layer: &str) {
        self.layer_failures.with_label_values(&[layer]).inc();
    }

    pub fn observe_probe(&self, seconds: f64) {
        self.probe_seconds.observe(seconds);
    }

    pub fn record_migration_step(&self, step: &str, outcome: &str) {
        self.migration_steps
            .with_label_values(&[step, outcome])
            .inc();
    }

    pub fn record_backup_operation(&self, operation: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.backup_operations
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn set_component_up(&self, component: &str, up: bool) {
        self.health_status
            .with_label_values(&[component])
            .set(if up { 1 } else { 0 });
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once_per_registry() {
        let registry = new_registry();
        DeployMetrics::new(registry.clone()).unwrap();
        assert!(DeployMetrics::new(registry).is_err());
    }

    #[test]
    fn textfile_contains_recorded_series() {
        let metrics = DeployMetrics::new(new_registry()).unwrap();
        metrics.inc_probe_attempt();
        metrics.record_layer_failure("tcp_port");
        metrics.record_migration_step("cache_table", "warning");
        metrics.record_backup_operation("backup", true);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textfile").join("tsd.prom");
        write_textfile(&metrics.registry(), &path).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("tsd_probe_query_attempts_total 1"));
        assert!(body.contains("layer=\"tcp_port\""));
        assert!(body.contains("step=\"cache_table\""));
        assert!(!path.with_extension("prom.tmp").exists());
    }
}
