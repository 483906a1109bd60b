//! ---
//! tsd_section: "05-networking-external-interfaces"
//! tsd_subsection: "binary"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Stack lifecycle subcommands: init, deploy, start/stop, status, logs, health."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use tsd_config::ResourceState;
use tsd_core::health::HealthStatus;
use tsd_core::{DeployOptions, DeployOutcome, StepOutcome};
use tsd_logging::{log_system_event, LogContext, SystemEventOutcome};

use crate::exit;
use crate::session::Session;

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Skip the image build step.
    #[arg(long = "no-build")]
    pub no_build: bool,
    /// Also collect static assets after migrating.
    #[arg(long)]
    pub collectstatic: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Follow log output until interrupted.
    #[arg(short = 'f', long)]
    pub follow: bool,
    /// Only show logs of this service.
    pub service: Option<String>,
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Also remove named volumes, including the database files.
    #[arg(long)]
    pub volumes: bool,
    /// Confirm destructive removal of volumes.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// Print the verdict as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Exit with the child's status; anything outside `0..=255` is a failure.
pub fn passthrough(code: i32) -> ExitCode {
    ExitCode::from(passthrough_code(code))
}

fn passthrough_code(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(code) => code,
        Err(_) if code < 0 => 1,
        Err(_) => u8::MAX,
    }
}

pub fn init(session: &Session) -> Result<ExitCode> {
    let bootstrapped = session.bootstrap()?;
    let path = bootstrapped.resource_path.display();
    match bootstrapped.state {
        ResourceState::Created => println!(
            "created {} (secret fingerprint {})",
            path, bootstrapped.secret_fingerprint
        ),
        ResourceState::Existing => println!("{} already present; left unchanged", path),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_outcome(outcome: &DeployOutcome) {
    println!(
        "database ready after {} query attempt(s)",
        outcome.readiness.query_attempts()
    );
    for record in &outcome.migration.steps {
        match &record.outcome {
            StepOutcome::Warning(detail) => {
                println!("  {:<16} warning: {}", record.step.as_str(), detail)
            }
            other => println!("  {:<16} {}", record.step.as_str(), other.as_str()),
        }
    }
    for service in &outcome.services {
        println!("  {:<16} {}", service.name, service.state);
    }
}

async fn run_pipeline(session: &Session, options: DeployOptions, label: &str) -> Result<ExitCode> {
    let bootstrapped = session.bootstrap()?;
    if bootstrapped.state == ResourceState::Created {
        println!(
            "created {} (secret fingerprint {})",
            bootstrapped.resource_path.display(),
            bootstrapped.secret_fingerprint
        );
    }
    let orchestrator = session.orchestrator(bootstrapped.config)?;
    let outcome = orchestrator
        .deploy(options)
        .await
        .with_context(|| format!("{} failed", label))?;
    print_outcome(&outcome);
    Ok(ExitCode::SUCCESS)
}

pub async fn deploy(session: &Session, args: DeployArgs) -> Result<ExitCode> {
    let options = DeployOptions {
        build: !args.no_build,
        collect_static: args.collectstatic,
    };
    run_pipeline(session, options, "deploy").await
}

pub async fn update(session: &Session) -> Result<ExitCode> {
    let options = DeployOptions {
        build: true,
        collect_static: true,
    };
    run_pipeline(session, options, "update").await
}

pub async fn build(session: &Session) -> Result<ExitCode> {
    session.connect()?.topology().build().await?;
    println!("images built");
    Ok(ExitCode::SUCCESS)
}

pub async fn start(session: &Session) -> Result<ExitCode> {
    let orchestrator = session.connect()?;
    orchestrator.topology().start().await?;
    for service in orchestrator.topology().descriptors() {
        println!("{:<16} {}", service.name, service.state);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn stop(session: &Session) -> Result<ExitCode> {
    session.connect()?.topology().stop().await?;
    println!("services stopped");
    Ok(ExitCode::SUCCESS)
}

pub async fn restart(session: &Session) -> Result<ExitCode> {
    session.connect()?.topology().restart().await?;
    println!("services restarted; run `tsdctl wait-for-db` before migrating");
    Ok(ExitCode::SUCCESS)
}

pub async fn status(session: &Session, args: StatusArgs) -> Result<ExitCode> {
    let statuses = session.connect()?.topology().status().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:<16} {:<9} {:>10}  STATUS", "SERVICE", "STATE", "CONTAINERS");
    for (name, status) in &statuses {
        println!(
            "{:<16} {:<9} {:>10}  {}",
            name, status.state, status.containers, status.status
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn logs(session: &Session, args: LogsArgs) -> Result<ExitCode> {
    let code = session
        .connect()?
        .topology()
        .logs(args.follow, args.service.as_deref())
        .await?;
    Ok(passthrough(code))
}

/// Interactive `manage.py` command in the web service.
pub async fn manage_attached(session: &Session, command: &[&str]) -> Result<ExitCode> {
    let orchestrator = session.connect()?;
    let mut args = vec!["python".to_owned(), "manage.py".to_owned()];
    args.extend(command.iter().map(|arg| (*arg).to_owned()));
    let code = orchestrator
        .topology()
        .exec_attached(orchestrator.config().web_service(), &args)
        .await?;
    Ok(passthrough(code))
}

pub async fn collect_static(session: &Session) -> Result<ExitCode> {
    session.connect()?.applier().collect_static().await?;
    println!("static assets collected");
    Ok(ExitCode::SUCCESS)
}

pub async fn clean(session: &Session, args: CleanArgs) -> Result<ExitCode> {
    if args.volumes && !args.yes {
        bail!("refusing to remove volumes without --yes; database files would be lost");
    }
    let orchestrator = session.connect()?;
    orchestrator.topology().down(args.volumes).await?;
    let ctx = LogContext::new()
        .with_target(&orchestrator.config().project.name)
        .with_step("clean");
    log_system_event(
        Some(&ctx),
        "clean",
        if args.volumes {
            "containers, networks and volumes removed"
        } else {
            "containers and networks removed"
        },
        SystemEventOutcome::Success,
    );
    println!("stack removed{}", if args.volumes { " including volumes" } else { "" });
    Ok(ExitCode::SUCCESS)
}

pub async fn health(session: &Session, args: HealthArgs) -> Result<ExitCode> {
    let verdict = session.connect()?.health().check().await;
    if args.json {
        println!("{}", verdict.to_json()?);
    } else {
        println!("{}", verdict.status);
        for (name, component) in &verdict.components {
            println!(
                "  {:<16} {:<9} {:>6}ms  {}",
                name,
                component.status.as_str(),
                component.latency_ms,
                component.detail
            );
        }
    }
    if verdict.status == HealthStatus::Unhealthy {
        return Ok(ExitCode::from(exit::UNHEALTHY));
    }
    Ok(ExitCode::SUCCESS)
}
