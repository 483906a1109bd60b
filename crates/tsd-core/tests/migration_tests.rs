//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Schema application ordering, gating and step failure handling."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
mod common;

use std::sync::Arc;

use common::OpenNetwork;
use tempfile::tempdir;
use tsd_common::config::Settings;
use tsd_core::compose::ComposeProject;
use tsd_core::executor::{Reply, ScriptedExecutor};
use tsd_core::migrate::{MigrationStep, SchemaApplier, StepOutcome};
use tsd_core::readiness::ReadinessProber;
use tsd_core::DeployError;

fn applier(executor: Arc<ScriptedExecutor>, settings: &Settings) -> SchemaApplier {
    let config = common::config_from(settings);
    let compose = ComposeProject::new(&config, executor);
    let prober = Arc::new(ReadinessProber::new(
        config.clone(),
        compose.clone(),
        Arc::new(OpenNetwork),
    ));
    SchemaApplier::new(config, compose, prober)
}

#[tokio::test(start_paused = true)]
async fn unreachable_database_runs_no_migration_command() {
    let dir = tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.on("SELECT 1", Reply::fail(1, "Login timeout expired"));

    let err = applier(executor.clone(), &common::settings(dir.path()))
        .apply()
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::NotReady { .. }));
    assert_eq!(executor.count("manage.py"), 0);
    assert_eq!(executor.count("CREATE DATABASE"), 0);
}

#[tokio::test(start_paused = true)]
async fn steps_run_in_order_and_report_outcomes() {
    let dir = tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor
        .on("SELECT 1", Reply::ok("1\n"))
        .on("CREATE DATABASE [timesheet_prod]", Reply::ok("created\n"))
        .on("CREATE DATABASE [test_timesheet_prod]", Reply::ok("present\n"));

    let report = applier(executor.clone(), &common::settings(dir.path()))
        .apply()
        .await
        .unwrap();

    let steps: Vec<MigrationStep> = report.steps.iter().map(|r| r.step).collect();
    assert_eq!(
        steps,
        vec![
            MigrationStep::CreateDatabase,
            MigrationStep::ApplyMigrations,
            MigrationStep::CacheTable,
            MigrationStep::TestDatabase
        ]
    );
    assert_eq!(
        report.outcome_of(MigrationStep::CreateDatabase),
        Some(&StepOutcome::Applied)
    );
    assert_eq!(
        report.outcome_of(MigrationStep::TestDatabase),
        Some(&StepOutcome::AlreadyPresent)
    );

    let calls: Vec<String> = executor.calls().iter().map(|c| c.command_line()).collect();
    let position = |needle: &str| calls.iter().position(|c| c.contains(needle)).unwrap();
    assert!(position("CREATE DATABASE [timesheet_prod]") < position("manage.py migrate"));
    assert!(position("manage.py migrate") < position("createcachetable cache_table"));
}

#[tokio::test(start_paused = true)]
async fn cache_table_failure_is_a_warning_by_default() {
    let dir = tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor
        .on("SELECT 1", Reply::ok("1\n"))
        .on("createcachetable", Reply::fail(1, "django.db.utils.ProgrammingError"));

    let report = applier(executor.clone(), &common::settings(dir.path()))
        .apply()
        .await
        .unwrap();

    assert!(matches!(
        report.outcome_of(MigrationStep::CacheTable),
        Some(StepOutcome::Warning(_))
    ));
    assert_eq!(report.warnings().count(), 1);
    assert_eq!(executor.count("createcachetable"), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_table_failure_can_be_made_fatal() {
    let dir = tempdir().unwrap();
    let mut settings = common::settings(dir.path());
    settings.migration.cache_table_fatal = true;
    let executor = Arc::new(ScriptedExecutor::new());
    executor
        .on("SELECT 1", Reply::ok("1\n"))
        .on("createcachetable", Reply::fail(1, "django.db.utils.ProgrammingError"));

    let err = applier(executor.clone(), &settings).apply().await.unwrap_err();

    assert!(matches!(
        err,
        DeployError::MigrationStep {
            step: MigrationStep::CacheTable,
            ..
        }
    ));
    assert_eq!(executor.count("CREATE DATABASE [test_timesheet_prod]"), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_migration_is_retried_once_then_fatal() {
    let dir = tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor
        .on("SELECT 1", Reply::ok("1\n"))
        .on("manage.py migrate", Reply::fail(1, "InconsistentMigrationHistory"));

    let err = applier(executor.clone(), &common::settings(dir.path()))
        .apply()
        .await
        .unwrap_err();

    match err {
        DeployError::MigrationStep { step, detail } => {
            assert_eq!(step, MigrationStep::ApplyMigrations);
            assert!(detail.contains("InconsistentMigrationHistory"));
        }
        other => panic!("expected MigrationStep, got {other:?}"),
    }
    assert_eq!(executor.count("manage.py migrate"), 2);
    assert_eq!(executor.count("createcachetable"), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_creator_counts_as_present() {
    let dir = tempdir().unwrap();
    let executor = Arc::new(ScriptedExecutor::new());
    executor.on("SELECT 1", Reply::ok("1\n")).on(
        "CREATE DATABASE [timesheet_prod]",
        Reply::fail(
            1,
            "Msg 1801, Level 16, State 3: Database 'timesheet_prod' already exists.",
        ),
    );

    let report = applier(executor, &common::settings(dir.path()))
        .apply()
        .await
        .unwrap();

    assert_eq!(
        report.outcome_of(MigrationStep::CreateDatabase),
        Some(&StepOutcome::AlreadyPresent)
    );
}
