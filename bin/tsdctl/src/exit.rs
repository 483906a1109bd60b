//! ---
//! tsd_section: "05-networking-external-interfaces"
//! tsd_subsection: "binary"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Process exit codes per failure class."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::process::ExitCode;

use tsd_config::ConfigError;
use tsd_core::DeployError;

pub const CONFIG: u8 = 2;
pub const BUILD: u8 = 3;
pub const NOT_READY: u8 = 4;
pub const MIGRATION: u8 = 5;
pub const BACKUP: u8 = 6;
pub const UNHEALTHY: u8 = 7;
pub const CANCELLED: u8 = 130;

pub fn class_of(err: &DeployError) -> u8 {
    match err {
        DeployError::ConfigMissing { .. } | DeployError::Config(_) => CONFIG,
        DeployError::Build { .. } | DeployError::Topology { .. } => BUILD,
        DeployError::DatabaseNotReady { .. } | DeployError::NotReady { .. } => NOT_READY,
        DeployError::MigrationStep { .. } => MIGRATION,
        DeployError::Backup { .. }
        | DeployError::RestoreTargetMissing { .. }
        | DeployError::ConflictingOperation { .. } => BACKUP,
        DeployError::Cancelled => CANCELLED,
        DeployError::Executor { .. } => 1,
    }
}

/// Exit status of the first typed error in the chain, 1 otherwise.
pub fn status_of(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(deploy) = cause.downcast_ref::<DeployError>() {
            return class_of(deploy);
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return CONFIG;
        }
    }
    1
}

pub fn code_for(err: &anyhow::Error) -> ExitCode {
    ExitCode::from(status_of(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use tsd_core::migrate::MigrationStep;

    #[test]
    fn classes_are_distinct() {
        assert_eq!(
            class_of(&DeployError::MigrationStep {
                step: MigrationStep::ApplyMigrations,
                detail: "boom".into()
            }),
            MIGRATION
        );
        assert_eq!(
            class_of(&DeployError::RestoreTargetMissing {
                id: "x".into(),
                matches: 0
            }),
            BACKUP
        );
        assert_eq!(class_of(&DeployError::Cancelled), CANCELLED);
    }

    #[test]
    fn context_does_not_hide_the_class() {
        let result: Result<(), DeployError> = Err(DeployError::NotReady {
            detail: "login failed".into(),
        });
        let err = result.context("migrate").unwrap_err();
        assert_eq!(status_of(&err), NOT_READY);
        assert_eq!(status_of(&anyhow::anyhow!("plain")), 1);
    }
}
