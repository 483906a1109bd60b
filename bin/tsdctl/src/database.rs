//! ---
//! tsd_section: "05-networking-external-interfaces"
//! tsd_subsection: "binary"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Database subcommands: migrate, backups, readiness diagnosis."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tsd_common::time::human_duration;
use tsd_core::StepOutcome;

use crate::exit;
use crate::session::Session;
use crate::stack::passthrough;

#[derive(Debug, Args)]
pub struct ArtifactArgs {
    /// Artifact identifier as printed by `list-backups`.
    pub id: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Give up after this many seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
    /// Seconds between query attempts.
    #[arg(long, default_value_t = 2)]
    pub interval: u64,
}

pub async fn dbshell(session: &Session) -> Result<ExitCode> {
    let code = session.connect()?.sql().shell().await?;
    Ok(passthrough(code))
}

pub async fn migrate(session: &Session) -> Result<ExitCode> {
    let report = session
        .connect()?
        .migrate()
        .await
        .context("migrate failed")?;
    for record in &report.steps {
        match &record.outcome {
            StepOutcome::Warning(detail) => {
                println!("{:<16} warning: {}", record.step.as_str(), detail)
            }
            other => println!("{:<16} {}", record.step.as_str(), other.as_str()),
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn backup(session: &Session) -> Result<ExitCode> {
    let artifact = session
        .connect()?
        .backups()
        .backup()
        .await
        .context("backup-db failed")?;
    println!(
        "{}  {} bytes  {}",
        artifact.id, artifact.size_bytes, artifact.location
    );
    Ok(ExitCode::SUCCESS)
}

pub async fn restore(session: &Session, args: ArtifactArgs) -> Result<ExitCode> {
    let artifact = session
        .connect()?
        .backups()
        .restore(&args.id)
        .await
        .context("restore-db failed")?;
    println!("restored {} from {}", artifact.database, artifact.id);
    Ok(ExitCode::SUCCESS)
}

pub async fn list(session: &Session, args: ListArgs) -> Result<ExitCode> {
    let artifacts = session.connect()?.backups().list_artifacts().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&artifacts)?);
        return Ok(ExitCode::SUCCESS);
    }
    if artifacts.is_empty() {
        println!("no backups");
    }
    for artifact in &artifacts {
        println!(
            "{:<40} {:>12}  {}",
            artifact.id,
            artifact.size_bytes,
            artifact.created_at.to_rfc3339()
        );
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn delete(session: &Session, args: ArtifactArgs) -> Result<ExitCode> {
    let artifact = session
        .connect()?
        .backups()
        .delete_artifact(&args.id)
        .await
        .context("delete-backup failed")?;
    println!("deleted {}", artifact.location);
    Ok(ExitCode::SUCCESS)
}

pub async fn diagnose(session: &Session) -> Result<ExitCode> {
    let report = session.connect()?.prober().diagnose().await?;
    print!("{}", report.render());
    if report.is_ready() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(exit::NOT_READY))
    }
}

pub async fn wait(session: &Session, args: WaitArgs) -> Result<ExitCode> {
    let timeout = Duration::from_secs(args.timeout);
    let interval = Duration::from_secs(args.interval);
    let report = session
        .connect()?
        .prober()
        .wait_for_database(timeout, interval)
        .await
        .with_context(|| format!("database did not answer within {}", human_duration(timeout)))?;
    println!(
        "database ready after {} query attempt(s)",
        report.query_attempts()
    );
    Ok(ExitCode::SUCCESS)
}
