//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Database provisioning and schema migration steps."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fmt;
use std::sync::Arc;

use tsd_common::config::DeploymentConfig;
use tsd_logging::{log_system_event, tsd_info, tsd_warn, LogContext, SystemEventOutcome};
use tsd_metrics::DeployMetrics;

use crate::cancel::CancelSignal;
use crate::compose::ComposeProject;
use crate::error::{summarize_output, DeployError, Result};
use crate::readiness::ReadinessProber;
use crate::sql::{quote_identifier, quote_literal, SqlClient};

/// Attempts per step: the first run plus one retry.
const STEP_ATTEMPTS: u32 = 2;
/// SQL Server error raised when a concurrent creator won the race.
const DATABASE_EXISTS_ERROR: &str = "Msg 1801";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    CreateDatabase,
    ApplyMigrations,
    CacheTable,
    TestDatabase,
}

impl MigrationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStep::CreateDatabase => "create_database",
            MigrationStep::ApplyMigrations => "migrate",
            MigrationStep::CacheTable => "cache_table",
            MigrationStep::TestDatabase => "test_database",
        }
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    AlreadyPresent,
    /// Failed, but the step is not fatal.
    Warning(String),
    Skipped,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Applied => "applied",
            StepOutcome::AlreadyPresent => "already-present",
            StepOutcome::Warning(_) => "warning",
            StepOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: MigrationStep,
    pub outcome: StepOutcome,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub steps: Vec<StepRecord>,
}

impl MigrationReport {
    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps
            .iter()
            .filter(|record| matches!(record.outcome, StepOutcome::Warning(_)))
    }

    pub fn outcome_of(&self, step: MigrationStep) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|record| record.step == step)
            .map(|record| &record.outcome)
    }
}

/// Applies schema changes against a ready database.
pub struct SchemaApplier {
    config: Arc<DeploymentConfig>,
    compose: ComposeProject,
    sql: SqlClient,
    prober: Arc<ReadinessProber>,
    cancel: CancelSignal,
    metrics: Option<DeployMetrics>,
}

impl SchemaApplier {
    pub fn new(
        config: Arc<DeploymentConfig>,
        compose: ComposeProject,
        prober: Arc<ReadinessProber>,
    ) -> Self {
        let sql = SqlClient::new(compose.clone(), config.database.clone());
        Self {
            config,
            compose,
            sql,
            prober,
            cancel: CancelSignal::new(),
            metrics: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<DeployMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Provision the database and apply pending migrations.
    ///
    /// The query layer is re-checked first; on failure nothing runs.
    pub async fn apply(&self) -> Result<MigrationReport> {
        let check = self.prober.query_once().await?;
        if !check.passed() {
            return Err(DeployError::NotReady {
                detail: format!("pre-migration query check {}: {}", check.outcome.as_str(), check.detail),
            });
        }

        let mut report = MigrationReport::default();
        report.steps.push(self.run_step(MigrationStep::CreateDatabase).await?);
        report.steps.push(self.run_step(MigrationStep::ApplyMigrations).await?);

        let cache = match self.run_step(MigrationStep::CacheTable).await {
            Ok(record) => record,
            Err(DeployError::MigrationStep { detail, .. }) if !self.config.migration.cache_table_fatal => {
                StepRecord {
                    step: MigrationStep::CacheTable,
                    outcome: StepOutcome::Warning(detail),
                    attempts: STEP_ATTEMPTS,
                }
            }
            Err(err) => return Err(err),
        };
        report.steps.push(cache);

        let test_db = if self.config.migration.provision_test_database {
            match self.run_step(MigrationStep::TestDatabase).await {
                Ok(record) => record,
                Err(DeployError::MigrationStep { detail, .. }) => StepRecord {
                    step: MigrationStep::TestDatabase,
                    outcome: StepOutcome::Warning(detail),
                    attempts: STEP_ATTEMPTS,
                },
                Err(err) => return Err(err),
            }
        } else {
            StepRecord {
                step: MigrationStep::TestDatabase,
                outcome: StepOutcome::Skipped,
                attempts: 0,
            }
        };
        report.steps.push(test_db);

        for record in &report.steps {
            let outcome = match record.outcome {
                StepOutcome::Warning(_) => SystemEventOutcome::Warning,
                _ => SystemEventOutcome::Success,
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_migration_step(record.step.as_str(), record.outcome.as_str());
            }
            let ctx = LogContext::new()
                .with_target(self.compose.project())
                .with_step(record.step.as_str());
            log_system_event(Some(&ctx), "migration.step", record.outcome.as_str(), outcome);
        }
        Ok(report)
    }

    /// Collect static assets of the web service.
    pub async fn collect_static(&self) -> Result<()> {
        let args = manage(&["collectstatic", "--noinput", "--clear"]);
        let output = self
            .cancel
            .guard(self.compose.exec(self.config.web_service(), &args, None))
            .await?;
        if !output.success() {
            return Err(DeployError::topology(
                self.config.web_service(),
                "collectstatic",
                summarize_output(output.diagnostic()),
            ));
        }
        tsd_info!(
            context = LogContext::new().with_target(self.compose.project()).with_step("collectstatic"),
            "static assets collected"
        );
        Ok(())
    }

    async fn run_step(&self, step: MigrationStep) -> Result<StepRecord> {
        let mut attempt = 1;
        loop {
            let ctx = LogContext::new()
                .with_target(self.compose.project())
                .with_step(step.as_str())
                .with_attempt(attempt);
            match self.cancel.guard(self.attempt(step)).await {
                Ok(outcome) => {
                    tsd_info!(context = ctx, "step finished: {}", outcome.as_str());
                    return Ok(StepRecord {
                        step,
                        outcome,
                        attempts: attempt,
                    });
                }
                Err(DeployError::Cancelled) => return Err(DeployError::Cancelled),
                Err(err) if attempt < STEP_ATTEMPTS => {
                    tsd_warn!(context = ctx, "step failed, retrying once: {}", err);
                    attempt += 1;
                }
                Err(err) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_migration_step(step.as_str(), "failed");
                    }
                    let detail = match err {
                        DeployError::MigrationStep { detail, .. } => detail,
                        other => other.to_string(),
                    };
                    return Err(DeployError::MigrationStep { step, detail });
                }
            }
        }
    }

    async fn attempt(&self, step: MigrationStep) -> Result<StepOutcome> {
        match step {
            MigrationStep::CreateDatabase => {
                let name = self.config.database.name.clone();
                self.create_database(step, &name).await
            }
            MigrationStep::TestDatabase => {
                let name = format!("test_{}", self.config.database.name);
                self.create_database(step, &name).await
            }
            MigrationStep::ApplyMigrations => {
                self.manage(step, &["migrate", "--noinput"]).await
            }
            MigrationStep::CacheTable => {
                let table = self.config.migration.cache_table.clone();
                self.manage(step, &["createcachetable", table.as_str()]).await
            }
        }
    }

    async fn create_database(&self, step: MigrationStep, name: &str) -> Result<StepOutcome> {
        let batch = format!(
            "IF DB_ID({literal}) IS NULL BEGIN CREATE DATABASE {ident}; PRINT 'created'; END ELSE PRINT 'present';",
            literal = quote_literal(name),
            ident = quote_identifier(name)
        );
        let output = self
            .sql
            .execute(&batch, Some("master"), Some(self.config.readiness.command_timeout))
            .await?;
        if output.success() {
            return Ok(if output.stdout.contains("created") {
                StepOutcome::Applied
            } else {
                StepOutcome::AlreadyPresent
            });
        }
        let diagnostic = output.diagnostic();
        if diagnostic.contains(DATABASE_EXISTS_ERROR) || diagnostic.contains("already exists") {
            return Ok(StepOutcome::AlreadyPresent);
        }
        Err(DeployError::MigrationStep {
            step,
            detail: summarize_output(diagnostic),
        })
    }

    async fn manage(&self, step: MigrationStep, args: &[&str]) -> Result<StepOutcome> {
        let output = self
            .compose
            .exec(self.config.web_service(), &manage(args), None)
            .await?;
        if output.success() {
            Ok(StepOutcome::Applied)
        } else {
            Err(DeployError::MigrationStep {
                step,
                detail: summarize_output(output.diagnostic()),
            })
        }
    }
}

fn manage(args: &[&str]) -> Vec<String> {
    let mut full = vec!["python".to_owned(), "manage.py".to_owned()];
    full.extend(args.iter().map(|arg| (*arg).to_owned()));
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manage_prefixes_python() {
        assert_eq!(
            manage(&["migrate", "--noinput"]),
            vec!["python", "manage.py", "migrate", "--noinput"]
        );
    }

    #[test]
    fn warnings_are_filtered() {
        let report = MigrationReport {
            steps: vec![
                StepRecord {
                    step: MigrationStep::ApplyMigrations,
                    outcome: StepOutcome::Applied,
                    attempts: 1,
                },
                StepRecord {
                    step: MigrationStep::CacheTable,
                    outcome: StepOutcome::Warning("boom".into()),
                    attempts: 2,
                },
            ],
        };
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(
            report.outcome_of(MigrationStep::ApplyMigrations),
            Some(&StepOutcome::Applied)
        );
    }
}
