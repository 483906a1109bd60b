//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Deployment components and pipeline for the timesheet stack."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
//! Topology control, readiness probing, migrations, backup/restore and health
//! aggregation for the web + SQL Server stack, composed by [`Orchestrator`].

pub mod backoff;
pub mod backup;
pub mod cancel;
pub mod compose;
pub mod error;
pub mod executor;
pub mod health;
pub mod lock;
pub mod migrate;
pub mod orchestrator;
pub mod readiness;
pub mod sql;
pub mod topology;

pub use backoff::{Backoff, BackoffPolicy};
pub use backup::{BackupArtifact, BackupManager};
pub use cancel::CancelSignal;
pub use error::{DeployError, ExecutorFailure, Result};
pub use executor::{CommandExecutor, CommandInvocation, CommandOutput, ProcessExecutor};
pub use health::{HealthAggregator, HealthStatus, HealthVerdict, HttpWebProbe, WebProbe};
pub use migrate::{MigrationReport, MigrationStep, SchemaApplier, StepOutcome};
pub use orchestrator::{bootstrap, DeployOptions, DeployOutcome, Orchestrator};
pub use readiness::{Layer, LayerResult, NetworkProbe, Outcome, ReadinessProber, ReadinessReport};
pub use topology::{RuntimeState, ServiceDescriptor, TopologyController};
