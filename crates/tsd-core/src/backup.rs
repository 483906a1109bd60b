//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Name-addressed database backup and restore."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
//! Backup artifacts are native `.bak` files in the backup directory inside
//! the database container, named `<database>_<YYYYMMDDTHHMMSSZ>.bak`. They
//! are never expired automatically. Existence is always established by
//! listing the directory, never from an exit code alone.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use tsd_common::config::DeploymentConfig;
use tsd_common::time::ARTIFACT_STAMP_FORMAT;
use tsd_logging::{log_system_event, LogContext, SystemEventOutcome};
use tsd_metrics::DeployMetrics;

use crate::cancel::CancelSignal;
use crate::error::{summarize_output, DeployError, Result};
use crate::executor::CommandOutput;
use crate::lock::{LockClass, RunLock};
use crate::sql::{quote_identifier, quote_literal, SqlClient};
use crate::topology::TopologyController;

const ARTIFACT_EXTENSION: &str = ".bak";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub id: String,
    pub database: String,
    /// Path inside the database container.
    pub location: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Split `<database>_<stamp>` into its parts.
pub fn parse_artifact_id(id: &str) -> Option<(String, DateTime<Utc>)> {
    let (database, stamp) = id.rsplit_once('_')?;
    if database.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(stamp, ARTIFACT_STAMP_FORMAT).ok()?;
    Some((database.to_owned(), Utc.from_utc_datetime(&naive)))
}

pub fn artifact_id(database: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", database, at.format(ARTIFACT_STAMP_FORMAT))
}

/// Parse `find -printf '%T@ %s %f\n'` output from the backup directory.
fn parse_listing(directory: &str, stdout: &str) -> Vec<BackupArtifact> {
    let mut artifacts: Vec<BackupArtifact> = stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.trim().splitn(3, ' ');
            let mtime = parts.next()?;
            let size = parts.next()?.parse::<u64>().ok()?;
            let file = parts.next()?;
            let id = file.strip_suffix(ARTIFACT_EXTENSION)?;
            let (database, created_at) = match parse_artifact_id(id) {
                Some(parsed) => parsed,
                None => {
                    let seconds = mtime.split('.').next()?.parse::<i64>().ok()?;
                    (id.to_owned(), Utc.timestamp_opt(seconds, 0).single()?)
                }
            };
            Some(BackupArtifact {
                id: id.to_owned(),
                database,
                location: format!("{}/{}", directory.trim_end_matches('/'), file),
                size_bytes: size,
                created_at,
            })
        })
        .collect();
    artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    artifacts
}

pub struct BackupManager {
    config: Arc<DeploymentConfig>,
    topology: Arc<TopologyController>,
    sql: SqlClient,
    cancel: CancelSignal,
    metrics: Option<DeployMetrics>,
}

impl BackupManager {
    pub fn new(config: Arc<DeploymentConfig>, topology: Arc<TopologyController>) -> Self {
        let sql = SqlClient::new(topology.compose().clone(), config.database.clone());
        Self {
            config,
            topology,
            sql,
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

    fn directory(&self) -> &str {
        self.config.database.backup_dir.trim_end_matches('/')
    }

    fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(
            &self.config.locks.directory,
            &self.config.project.name,
            LockClass::Backup,
        )
    }

    fn record(&self, operation: &str, id: &str, result: &Result<()>) {
        if let Some(metrics) = &self.metrics {
            metrics.record_backup_operation(operation, result.is_ok());
        }
        let ctx = LogContext::new()
            .with_target(&self.config.project.name)
            .with_service(self.config.database_service())
            .with_step(operation);
        match result {
            Ok(()) => log_system_event(Some(&ctx), "backup", id, SystemEventOutcome::Success),
            Err(err) => log_system_event(
                Some(&ctx),
                "backup",
                &format!("{}: {}", id, err),
                SystemEventOutcome::Fault,
            ),
        }
    }

    async fn db_exec(&self, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        self.topology
            .exec(self.config.database_service(), &args)
            .await
    }

    /// Artifacts in the backup directory, oldest first.
    pub async fn list_artifacts(&self) -> Result<Vec<BackupArtifact>> {
        let directory = self.directory().to_owned();
        let output = self
            .db_exec(&[
                "find",
                directory.as_str(),
                "-maxdepth",
                "1",
                "-type",
                "f",
                "-name",
                "*.bak",
                "-printf",
                "%T@ %s %f\\n",
            ])
            .await?;
        if !output.success() {
            if output.diagnostic().contains("No such file or directory") {
                return Ok(Vec::new());
            }
            return Err(DeployError::Backup {
                detail: format!("listing {} failed: {}", directory, summarize_output(output.diagnostic())),
            });
        }
        Ok(parse_listing(&directory, &output.stdout))
    }

    /// Take a full backup of the application database.
    pub async fn backup(&self) -> Result<BackupArtifact> {
        self.backup_at(Utc::now()).await
    }

    /// Backup stamped with `at`; identifiers are unique per second.
    pub async fn backup_at(&self, at: DateTime<Utc>) -> Result<BackupArtifact> {
        self.topology
            .require_running(self.config.database_service())
            .await?;
        let _lock = self.lock()?;
        let database = &self.config.database.name;
        let id = artifact_id(database, at);
        let result = self.cancel.guard(self.write_backup(&id)).await;
        let outcome = result.as_ref().map(|_| ()).map_err(|err| DeployError::Backup {
            detail: err.to_string(),
        });
        self.record("backup", &id, &outcome);
        result
    }

    async fn write_backup(&self, id: &str) -> Result<BackupArtifact> {
        let directory = self.directory().to_owned();
        if self.list_artifacts().await?.iter().any(|a| a.id == id) {
            return Err(DeployError::Backup {
                detail: format!("artifact {} already exists", id),
            });
        }
        let mkdir = self.db_exec(&["mkdir", "-p", directory.as_str()]).await?;
        if !mkdir.success() {
            return Err(DeployError::Backup {
                detail: format!("cannot create {}: {}", directory, summarize_output(mkdir.diagnostic())),
            });
        }
        let path = format!("{}/{}{}", directory, id, ARTIFACT_EXTENSION);
        let batch = format!(
            "BACKUP DATABASE {db} TO DISK = {path} WITH INIT, NAME = {name};",
            db = quote_identifier(&self.config.database.name),
            path = quote_literal(&path),
            name = quote_literal(id)
        );
        let output = self.sql.execute(&batch, Some("master"), None).await?;
        if !output.success() {
            return Err(DeployError::Backup {
                detail: summarize_output(output.diagnostic()),
            });
        }
        self.list_artifacts()
            .await?
            .into_iter()
            .find(|artifact| artifact.id == id)
            .ok_or_else(|| DeployError::Backup {
                detail: format!("artifact {} missing after backup completed", path),
            })
    }

    fn resolve(&self, artifacts: Vec<BackupArtifact>, id: &str) -> Result<BackupArtifact> {
        let mut matches: Vec<BackupArtifact> = artifacts.into_iter().filter(|a| a.id == id).collect();
        if matches.len() != 1 {
            return Err(DeployError::RestoreTargetMissing {
                id: id.to_owned(),
                matches: matches.len(),
            });
        }
        Ok(matches.remove(0))
    }

    /// Replace the application database with the contents of artifact `id`.
    pub async fn restore(&self, id: &str) -> Result<BackupArtifact> {
        self.topology
            .require_running(self.config.database_service())
            .await?;
        let _lock = self.lock()?;
        let result = self.cancel.guard(self.apply_restore(id)).await;
        let outcome = result.as_ref().map(|_| ()).map_err(|err| DeployError::Backup {
            detail: err.to_string(),
        });
        self.record("restore", id, &outcome);
        result
    }

    async fn apply_restore(&self, id: &str) -> Result<BackupArtifact> {
        let artifact = self.resolve(self.list_artifacts().await?, id)?;
        let db = quote_identifier(&self.config.database.name);
        let literal = quote_literal(&self.config.database.name);

        let single = format!(
            "IF DB_ID({literal}) IS NOT NULL ALTER DATABASE {db} SET SINGLE_USER WITH ROLLBACK IMMEDIATE;"
        );
        let output = self.sql.execute(&single, Some("master"), None).await?;
        if !output.success() {
            return Err(DeployError::Backup {
                detail: format!("cannot take exclusive access: {}", summarize_output(output.diagnostic())),
            });
        }

        let restore = format!(
            "RESTORE DATABASE {db} FROM DISK = {path} WITH REPLACE;",
            path = quote_literal(&artifact.location)
        );
        let restored = self.sql.execute(&restore, Some("master"), None).await;

        let multi = format!("IF DB_ID({literal}) IS NOT NULL ALTER DATABASE {db} SET MULTI_USER;");
        let reopened = self.sql.execute(&multi, Some("master"), None).await;

        let output = restored?;
        if !output.success() {
            return Err(DeployError::Backup {
                detail: format!("restore of {} failed: {}", artifact.id, summarize_output(output.diagnostic())),
            });
        }
        match reopened {
            Ok(out) if out.success() => Ok(artifact),
            Ok(out) => Err(DeployError::Backup {
                detail: format!("restored but could not return to multi-user: {}", summarize_output(out.diagnostic())),
            }),
            Err(err) => Err(err),
        }
    }

    /// Remove one artifact by exact identifier.
    pub async fn delete_artifact(&self, id: &str) -> Result<BackupArtifact> {
        self.topology
            .require_running(self.config.database_service())
            .await?;
        let _lock = self.lock()?;
        let artifact = self.resolve(self.list_artifacts().await?, id)?;
        let output = self.db_exec(&["rm", "-f", artifact.location.as_str()]).await?;
        let result = if output.success() && !self.list_artifacts().await?.iter().any(|a| a.id == id) {
            Ok(())
        } else {
            Err(DeployError::Backup {
                detail: format!("could not delete {}: {}", artifact.location, summarize_output(output.diagnostic())),
            })
        };
        self.record("delete", id, &result);
        result.map(|_| artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_ids_round_trip_their_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = artifact_id("timesheet_prod", at);
        assert_eq!(id, "timesheet_prod_20240309T140507Z");
        let (db, parsed) = parse_artifact_id(&id).unwrap();
        assert_eq!(db, "timesheet_prod");
        assert_eq!(parsed, at);
        assert!(parse_artifact_id("nonexistent-id").is_none());
    }

    #[test]
    fn listing_is_ordered_oldest_first() {
        let stdout = "1710000000.5 2048 timesheet_prod_20240309T140507Z.bak\n\
                      1700000000.0 1024 timesheet_prod_20231114T221320Z.bak\n\
                      1710000100.0 99 manual-copy.bak\n";
        let artifacts = parse_listing("/var/opt/mssql/backup/", stdout);
        let ids: Vec<&str> = artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "timesheet_prod_20231114T221320Z",
                "timesheet_prod_20240309T140507Z",
                "manual-copy"
            ]
        );
        assert_eq!(
            artifacts[0].location,
            "/var/opt/mssql/backup/timesheet_prod_20231114T221320Z.bak"
        );
        assert_eq!(artifacts[1].size_bytes, 2048);
    }
}
