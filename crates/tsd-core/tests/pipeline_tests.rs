//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Topology, health aggregation and the full deploy pipeline."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{OpenNetwork, StackSimulator};
use tempfile::tempdir;
use tsd_core::compose::ComposeProject;
use tsd_core::executor::{Reply, ScriptedExecutor};
use tsd_core::health::{ComponentStatus, HealthStatus, WebProbe};
use tsd_core::lock::{LockClass, RunLock};
use tsd_core::migrate::{MigrationStep, StepOutcome};
use tsd_core::topology::{RuntimeState, TopologyController};
use tsd_core::{DeployError, DeployOptions, Orchestrator};

struct StaticWeb(std::result::Result<String, String>);

#[async_trait]
impl WebProbe for StaticWeb {
    async fn get(&self, _url: &str) -> std::result::Result<String, String> {
        self.0.clone()
    }
}

fn healthy_web() -> Arc<StaticWeb> {
    Arc::new(StaticWeb(Ok("http://127.0.0.1:8080/health/ returned 200".into())))
}

#[tokio::test]
async fn starting_twice_leaves_one_instance_per_service() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let stack = Arc::new(StackSimulator::new());
    let topology = TopologyController::new(config.clone(), ComposeProject::new(&config, stack.clone()));

    topology.start().await.unwrap();
    let first = topology.status().await.unwrap();
    topology.start().await.unwrap();
    let second = topology.status().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
    assert!(second.values().all(|s| s.containers == 1 && s.state == RuntimeState::Running));

    let ups: Vec<String> = stack
        .calls()
        .into_iter()
        .filter(|c| c.contains(" up -d "))
        .collect();
    assert!(ups[0].ends_with(" db"));
    assert!(ups[1].ends_with(" web"));
}

#[tokio::test]
async fn database_starts_before_dependents_and_awaits_confirmation() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let stack = Arc::new(StackSimulator::new());
    let topology = TopologyController::new(config.clone(), ComposeProject::new(&config, stack));

    topology.start().await.unwrap();
    assert_eq!(topology.descriptor("db").unwrap().state, RuntimeState::Starting);
    assert_eq!(topology.descriptor("web").unwrap().state, RuntimeState::Running);

    topology.confirm_ready("db");
    assert_eq!(topology.descriptor("db").unwrap().state, RuntimeState::Running);
}

#[tokio::test]
async fn undeployed_services_report_not_created() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let stack = Arc::new(StackSimulator::new());
    let topology = TopologyController::new(config.clone(), ComposeProject::new(&config, stack));

    let status = topology.status().await.unwrap();

    assert!(status
        .values()
        .all(|s| s.state == RuntimeState::Stopped && s.status == "not created"));
}

#[tokio::test]
async fn failed_build_is_reported_as_build_error() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let executor = Arc::new(ScriptedExecutor::new());
    executor.on(" build", Reply::fail(1, "failed to solve: pip install exited 1"));
    let topology = TopologyController::new(config.clone(), ComposeProject::new(&config, executor));

    let err = topology.build().await.unwrap_err();

    assert!(matches!(err, DeployError::Build { .. }));
}

#[tokio::test(start_paused = true)]
async fn database_timeout_degrades_health() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let executor = Arc::new(ScriptedExecutor::new());
    executor.on("SELECT 1", Reply::ok("1\n").after(Duration::from_secs(60)));
    let orchestrator = Orchestrator::builder(config, executor)
        .network(Arc::new(OpenNetwork))
        .web_probe(healthy_web())
        .build()
        .unwrap();

    let verdict = orchestrator.health().check().await;

    assert_eq!(verdict.status, HealthStatus::Degraded);
    assert_eq!(verdict.components["web"].status, ComponentStatus::Up);
    assert_eq!(verdict.components["db"].status, ComponentStatus::TimedOut);
    let json = verdict.to_json().unwrap();
    assert!(json.contains("\"degraded\""));
}

#[tokio::test(start_paused = true)]
async fn web_failure_makes_health_unhealthy() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let executor = Arc::new(ScriptedExecutor::new());
    executor.on("SELECT 1", Reply::ok("1\n"));
    let orchestrator = Orchestrator::builder(config, executor)
        .network(Arc::new(OpenNetwork))
        .web_probe(Arc::new(StaticWeb(Err("http://127.0.0.1:8080/health/ returned 502".into()))))
        .build()
        .unwrap();

    let verdict = orchestrator.health().check().await;

    assert_eq!(verdict.status, HealthStatus::Unhealthy);
    assert_eq!(verdict.components["db"].status, ComponentStatus::Up);
}

#[tokio::test(start_paused = true)]
async fn deploy_brings_the_stack_up_and_migrates() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let stack = Arc::new(StackSimulator::new().ready_after(Duration::from_secs(5)));
    let orchestrator = Orchestrator::builder(config, stack.clone())
        .network(Arc::new(OpenNetwork))
        .web_probe(healthy_web())
        .build()
        .unwrap();

    let outcome = orchestrator
        .deploy(DeployOptions {
            build: true,
            collect_static: true,
        })
        .await
        .unwrap();

    assert!(outcome.readiness.is_ready());
    assert!(outcome.readiness.query_attempts() > 1);
    assert_eq!(outcome.migration.steps.len(), 4);
    assert!(outcome.migration.outcome_of(MigrationStep::ApplyMigrations).is_some());
    assert!(outcome
        .services
        .iter()
        .all(|service| service.state == RuntimeState::Running));

    let calls = stack.calls();
    let position = |needle: &str| calls.iter().position(|c| c.contains(needle)).unwrap();
    assert!(position(" build") < position(" up -d "));
    assert!(position(" up -d ") < position("manage.py migrate"));
    assert!(position("manage.py migrate") < position("collectstatic"));
    assert!(!dir.path().join("familyhub.deploy.lock").exists());
}

#[tokio::test(start_paused = true)]
async fn deploy_stops_at_readiness_and_leaves_services_running() {
    let dir = tempdir().unwrap();
    let mut settings = common::settings(dir.path());
    settings.readiness.max_attempts = 3;
    let config = common::config_from(&settings);
    let stack = Arc::new(StackSimulator::new().ready_after(Duration::from_secs(3600)));
    let orchestrator = Orchestrator::builder(config, stack.clone())
        .network(Arc::new(OpenNetwork))
        .web_probe(healthy_web())
        .build()
        .unwrap();

    let err = orchestrator.deploy(DeployOptions::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::DatabaseNotReady { .. }));
    assert_eq!(stack.count("manage.py"), 0);
    assert_eq!(stack.count(" down"), 0);
    assert_eq!(stack.count(" stop"), 0);
}

#[tokio::test]
async fn concurrent_deploy_is_refused() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let stack = Arc::new(StackSimulator::new());
    let orchestrator = Orchestrator::builder(config, stack.clone())
        .network(Arc::new(OpenNetwork))
        .web_probe(healthy_web())
        .build()
        .unwrap();
    let _held = RunLock::acquire(dir.path(), "familyhub", LockClass::Deploy).unwrap();

    let err = orchestrator.deploy(DeployOptions::default()).await.unwrap_err();

    assert!(matches!(err, DeployError::ConflictingOperation { .. }));
    assert!(stack.calls().is_empty());
}

#[tokio::test]
async fn migrate_waits_for_a_running_deploy() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let stack = Arc::new(StackSimulator::new().running(&["db", "web"]));
    let orchestrator = Orchestrator::builder(config, stack.clone())
        .network(Arc::new(OpenNetwork))
        .web_probe(healthy_web())
        .build()
        .unwrap();
    let held = RunLock::acquire(dir.path(), "familyhub", LockClass::Deploy).unwrap();

    let err = orchestrator.migrate().await.unwrap_err();
    assert!(matches!(
        err,
        DeployError::ConflictingOperation {
            operation: "deploy",
            ..
        }
    ));
    assert_eq!(stack.count("manage.py"), 0);

    drop(held);
    let report = orchestrator.migrate().await.unwrap();
    assert_eq!(
        report.outcome_of(MigrationStep::ApplyMigrations),
        Some(&StepOutcome::Applied)
    );
    assert!(!dir.path().join("familyhub.deploy.lock").exists());
}
