//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Typed failures of deployment operations."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tsd_config::ConfigError;

use crate::migrate::MigrationStep;
use crate::readiness::{Layer, ReadinessReport};

/// Why a command could not produce an exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorFailure {
    Spawn(String),
    TimedOut(Duration),
}

impl fmt::Display for ExecutorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorFailure::Spawn(reason) => write!(f, "could not be started: {}", reason),
            ExecutorFailure::TimedOut(after) => {
                write!(f, "timed out after {}", tsd_common::time::human_duration(*after))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("configuration resource missing: {}", path.display())]
    ConfigMissing { path: PathBuf },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("build failed: {detail}")]
    Build { detail: String },
    #[error("service '{service}' {action} failed: {detail}")]
    Topology {
        service: String,
        action: &'static str,
        detail: String,
    },
    #[error("database not ready: {layer} layer failed ({detail})")]
    DatabaseNotReady {
        layer: Layer,
        detail: String,
        report: Box<ReadinessReport>,
    },
    #[error("database not ready: {detail}")]
    NotReady { detail: String },
    #[error("migration step '{step}' failed: {detail}")]
    MigrationStep { step: MigrationStep, detail: String },
    #[error("backup operation failed: {detail}")]
    Backup { detail: String },
    #[error("backup artifact '{id}' does not resolve to exactly one entry ({matches} found)")]
    RestoreTargetMissing { id: String, matches: usize },
    #[error("{operation} already in progress for '{target}' (lock held at {})", path.display())]
    ConflictingOperation {
        operation: &'static str,
        target: String,
        path: PathBuf,
    },
    #[error("command `{command}` {failure}")]
    Executor {
        command: String,
        failure: ExecutorFailure,
    },
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    pub(crate) fn topology(service: &str, action: &'static str, detail: impl Into<String>) -> Self {
        Self::Topology {
            service: service.to_owned(),
            action,
            detail: detail.into(),
        }
    }

    /// True when the failure was a timeout rather than a refusal.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DeployError::Executor {
                failure: ExecutorFailure::TimedOut(_),
                ..
            }
        )
    }
}

impl From<ConfigError> for DeployError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { path } => DeployError::ConfigMissing { path },
            other => DeployError::Config(other.to_string()),
        }
    }
}

/// Trim captured stderr/stdout to something fit for a one-line diagnosis.
pub(crate) fn summarize_output(text: &str) -> String {
    const LIMIT: usize = 400;
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if joined.chars().count() <= LIMIT {
        joined
    } else {
        let mut cut: String = joined.chars().take(LIMIT).collect();
        cut.push_str("...");
        cut
    }
}
