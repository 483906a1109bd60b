//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Shared primitives for the timesheet stack deployer."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
//! Shared primitives for the deployer workspace: settings loading, the
//! immutable deployment configuration, tracing bootstrap, and version metadata.

pub mod config;
pub mod logging;
pub mod time;
pub mod version;

pub use config::{
    env_keys, ApplicationConfig, DatabaseConfig, DatabaseSettings, DeploymentConfig,
    HealthSettings, LoadedSettings, LockSettings, LoggingConfig, MigrationSettings, ProbeKind,
    ProbeVantage, ProjectSettings, ReadinessSettings, Secret, ServiceRole, ServiceSettings,
    Settings, VolumeSettings, WebSettings,
};
pub use logging::{init_tracing, LogFormat};
pub use version::VersionInfo;
