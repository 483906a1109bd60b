//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Orchestrator settings and the immutable deployment configuration."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_compose_file() -> PathBuf {
    PathBuf::from("deploy/docker-compose.yml")
}

fn default_project_name() -> String {
    "familyhub".to_owned()
}

fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}

fn default_env_template() -> PathBuf {
    PathBuf::from("deploy/env.template")
}

fn default_network() -> String {
    "familyhub-net".to_owned()
}

fn default_database_volume() -> String {
    "mssql-data".to_owned()
}

fn default_backup_volume() -> String {
    "mssql-backups".to_owned()
}

fn default_web_port() -> u16 {
    8080
}

fn default_web_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_health_path() -> String {
    "/health/".to_owned()
}

fn default_client_driver() -> String {
    "ODBC Driver 18 for SQL Server".to_owned()
}

fn default_sqlcmd_path() -> String {
    "/opt/mssql-tools18/bin/sqlcmd".to_owned()
}

fn default_backup_dir() -> String {
    "/var/opt/mssql/backup".to_owned()
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_web_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_database_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_cache_table() -> String {
    "cache_table".to_owned()
}

fn default_lock_directory() -> PathBuf {
    PathBuf::from("target/locks")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_true() -> bool {
    true
}

/// Role a service plays in the fixed deployment topology.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Web,
    Database,
    Proxy,
}

/// How liveness of a service is established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Http,
    Database,
    #[default]
    None,
}

/// Declared service entry of the topology descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub role: ServiceRole,
    pub image: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub probe: ProbeKind,
}

fn default_tag() -> String {
    "latest".to_owned()
}

impl ServiceSettings {
    pub fn image_reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    #[serde(default = "default_env_template")]
    pub env_template: PathBuf,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            compose_file: default_compose_file(),
            name: default_project_name(),
            env_file: default_env_file(),
            env_template: default_env_template(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSettings {
    #[serde(default = "default_database_volume")]
    pub database: String,
    #[serde(default = "default_backup_volume")]
    pub backups: String,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            database: default_database_volume(),
            backups: default_backup_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            health_path: default_health_path(),
        }
    }
}

impl WebSettings {
    /// URL probed by the web liveness check.
    pub fn health_url(&self) -> String {
        let path = if self.health_path.starts_with('/') {
            self.health_path.clone()
        } else {
            format!("/{}", self.health_path)
        };
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_client_driver")]
    pub client_driver: String,
    #[serde(default = "default_sqlcmd_path")]
    pub sqlcmd_path: String,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            client_driver: default_client_driver(),
            sqlcmd_path: default_sqlcmd_path(),
            backup_dir: default_backup_dir(),
        }
    }
}

/// Where the network layers of the readiness probe run from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeVantage {
    /// Inside the web container, which shares the database's network.
    #[default]
    WebContainer,
    /// From the host running the orchestrator.
    Host,
}

/// Retry policy of the readiness prober.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub initial_backoff: Duration,
    #[serde(default = "default_max_backoff")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_backoff: Duration,
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub vantage: ProbeVantage,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            command_timeout: default_command_timeout(),
            connect_timeout: default_connect_timeout(),
            vantage: ProbeVantage::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_web_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub web_timeout: Duration,
    #[serde(default = "default_database_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub database_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            web_timeout: default_web_timeout(),
            database_timeout: default_database_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    #[serde(default = "default_cache_table")]
    pub cache_table: String,
    /// Treat a cache-table provisioning failure as fatal instead of a warning.
    #[serde(default)]
    pub cache_table_fatal: bool,
    #[serde(default = "default_true")]
    pub provision_test_database: bool,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            cache_table: default_cache_table(),
            cache_table_fatal: false,
            provision_test_database: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    #[serde(default = "default_lock_directory")]
    pub directory: PathBuf,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            directory: default_lock_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Orchestrator settings file (`tsd.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub project: ProjectSettings,
    #[serde(default = "default_services")]
    pub services: IndexMap<String, ServiceSettings>,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub volumes: VolumeSettings,
    #[serde(default)]
    pub web: WebSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub readiness: ReadinessSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default)]
    pub migration: MigrationSettings,
    #[serde(default)]
    pub locks: LockSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_services() -> IndexMap<String, ServiceSettings> {
    let mut services = IndexMap::new();
    services.insert(
        "db".to_owned(),
        ServiceSettings {
            role: ServiceRole::Database,
            image: "mcr.microsoft.com/mssql/server".to_owned(),
            tag: "2022-latest".to_owned(),
            depends_on: Vec::new(),
            probe: ProbeKind::Database,
        },
    );
    services.insert(
        "web".to_owned(),
        ServiceSettings {
            role: ServiceRole::Web,
            image: "familyhub/timesheet".to_owned(),
            tag: default_tag(),
            depends_on: vec!["db".to_owned()],
            probe: ProbeKind::Http,
        },
    );
    services
}

/// Settings together with the file they were read from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub source: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project: ProjectSettings::default(),
            services: default_services(),
            network: default_network(),
            volumes: VolumeSettings::default(),
            web: WebSettings::default(),
            database: DatabaseSettings::default(),
            readiness: ReadinessSettings::default(),
            health: HealthSettings::default(),
            migration: MigrationSettings::default(),
            locks: LockSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    pub const ENV_CONFIG_PATH: &'static str = "TSD_CONFIG";

    /// Load settings from the first existing candidate, or built-in defaults.
    ///
    /// `override_path` (usually `TSD_CONFIG` or `--settings`) must exist when given.
    pub fn load<P: AsRef<Path>>(
        override_path: Option<&Path>,
        candidates: &[P],
    ) -> Result<LoadedSettings> {
        if let Some(path) = override_path {
            let settings = Self::from_path(path)?;
            return Ok(LoadedSettings {
                settings,
                source: Some(path.to_path_buf()),
            });
        }
        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let settings = Self::from_path(path)?;
                return Ok(LoadedSettings {
                    settings,
                    source: Some(path.to_path_buf()),
                });
            }
        }
        debug!("no settings file found; using built-in defaults");
        let settings = Settings::default();
        settings.validate()?;
        Ok(LoadedSettings {
            settings,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(settings_path = %path.display(), "loading settings");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read settings file {}", path.display()))?;
        contents
            .parse::<Settings>()
            .with_context(|| format!("failed to load settings file {}", path.display()))
    }

    /// Name of the service carrying the given role, if declared.
    pub fn service_with_role(&self, role: ServiceRole) -> Option<&str> {
        self.services
            .iter()
            .find(|(_, service)| service.role == role)
            .map(|(name, _)| name.as_str())
    }

    /// Services ordered so that every dependency precedes its dependents.
    pub fn start_order(&self) -> Result<Vec<String>> {
        let mut ordered: Vec<String> = Vec::with_capacity(self.services.len());
        let mut placed: HashSet<&str> = HashSet::new();
        while ordered.len() < self.services.len() {
            let before = ordered.len();
            for (name, service) in &self.services {
                if placed.contains(name.as_str()) {
                    continue;
                }
                if service
                    .depends_on
                    .iter()
                    .all(|dep| placed.contains(dep.as_str()))
                {
                    placed.insert(name.as_str());
                    ordered.push(name.clone());
                }
            }
            if ordered.len() == before {
                return Err(anyhow!("service dependency cycle detected"));
            }
        }
        Ok(ordered)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.project.name.trim().is_empty() {
            return Err(anyhow!("project name cannot be empty"));
        }
        for role in [ServiceRole::Web, ServiceRole::Database] {
            let count = self
                .services
                .values()
                .filter(|service| service.role == role)
                .count();
            if count != 1 {
                return Err(anyhow!(
                    "topology must declare exactly one {:?} service (found {})",
                    role,
                    count
                ));
            }
        }
        if self
            .services
            .values()
            .filter(|service| service.role == ServiceRole::Proxy)
            .count()
            > 1
        {
            return Err(anyhow!("topology may declare at most one proxy service"));
        }
        for (name, service) in &self.services {
            for dep in &service.depends_on {
                if dep == name {
                    return Err(anyhow!("service '{}' cannot depend on itself", name));
                }
                if !self.services.contains_key(dep) {
                    return Err(anyhow!(
                        "service '{}' depends on undeclared service '{}'",
                        name,
                        dep
                    ));
                }
            }
        }
        self.start_order()?;
        if self.readiness.max_attempts == 0 {
            return Err(anyhow!("readiness.max_attempts must be at least 1"));
        }
        if self.readiness.max_backoff < self.readiness.initial_backoff {
            return Err(anyhow!(
                "readiness.max_backoff must not be shorter than readiness.initial_backoff"
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for Settings {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let settings: Settings =
            toml::from_str(content).with_context(|| "failed to parse settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Credential or key material that must never reach a log line.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Connection parameters of the relational database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Compose service running the engine.
    pub service: String,
    pub name: String,
    pub user: String,
    pub password: Secret,
    pub host: String,
    pub port: u16,
    pub client_driver: String,
    pub sqlcmd_path: String,
    pub backup_dir: String,
}

/// Application-level keys of the configuration resource.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    pub secret_key: Secret,
    pub debug: bool,
    pub allowed_hosts: Vec<String>,
}

/// Keys recognised in the `.env` configuration resource.
pub mod env_keys {
    pub const SECRET_KEY: &str = "SECRET_KEY";
    pub const DEBUG: &str = "DEBUG";
    pub const ALLOWED_HOSTS: &str = "ALLOWED_HOSTS";
    pub const DATABASE_NAME: &str = "DATABASE_NAME";
    pub const DATABASE_USER: &str = "DATABASE_USER";
    pub const DATABASE_PASSWORD: &str = "DATABASE_PASSWORD";
    pub const DATABASE_HOST: &str = "DATABASE_HOST";
    pub const DATABASE_PORT: &str = "DATABASE_PORT";
}

/// Immutable snapshot of everything one orchestrator run needs.
///
/// Built once by the bootstrapper from the settings file and the `.env`
/// resource, then shared read-only (usually behind an `Arc`).
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub project: ProjectSettings,
    pub services: IndexMap<String, ServiceSettings>,
    pub start_order: Vec<String>,
    pub network: String,
    pub volumes: VolumeSettings,
    pub web: WebSettings,
    pub web_service: String,
    pub proxy_service: Option<String>,
    pub database: DatabaseConfig,
    pub application: ApplicationConfig,
    pub readiness: ReadinessSettings,
    pub health: HealthSettings,
    pub migration: MigrationSettings,
    pub locks: LockSettings,
}

impl DeploymentConfig {
    /// Merge validated settings with the parsed key-value resource.
    pub fn from_parts(settings: &Settings, env: &IndexMap<String, String>) -> Result<Self> {
        settings.validate()?;
        let lookup = |key: &str| {
            env.get(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        // Credentials are taken verbatim; only a stray line terminator is dropped.
        let verbatim = |key: &str| {
            env.get(key)
                .map(|value| value.trim_end_matches(['\r', '\n']).to_owned())
                .filter(|value| !value.trim().is_empty())
        };

        let secret_key = verbatim(env_keys::SECRET_KEY)
            .ok_or_else(|| anyhow!("{} is missing or empty", env_keys::SECRET_KEY))?;
        let password = verbatim(env_keys::DATABASE_PASSWORD)
            .ok_or_else(|| anyhow!("{} is missing or empty", env_keys::DATABASE_PASSWORD))?;
        let port = match lookup(env_keys::DATABASE_PORT) {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("{} '{}' is not a port", env_keys::DATABASE_PORT, raw))?,
            None => 1433,
        };
        let debug = lookup(env_keys::DEBUG)
            .map(|raw| parse_flag(&raw))
            .transpose()?
            .unwrap_or(false);
        let allowed_hosts = lookup(env_keys::ALLOWED_HOSTS)
            .map(|raw| {
                raw.split(',')
                    .map(|host| host.trim().to_owned())
                    .filter(|host| !host.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["localhost".to_owned(), "127.0.0.1".to_owned()]);

        let database_service = settings
            .service_with_role(ServiceRole::Database)
            .ok_or_else(|| anyhow!("no database service declared"))?
            .to_owned();
        let web_service = settings
            .service_with_role(ServiceRole::Web)
            .ok_or_else(|| anyhow!("no web service declared"))?
            .to_owned();
        let proxy_service = settings
            .service_with_role(ServiceRole::Proxy)
            .map(str::to_owned);

        let database = DatabaseConfig {
            host: lookup(env_keys::DATABASE_HOST).unwrap_or_else(|| database_service.clone()),
            service: database_service,
            name: lookup(env_keys::DATABASE_NAME).unwrap_or_else(|| "timesheet_prod".to_owned()),
            user: lookup(env_keys::DATABASE_USER).unwrap_or_else(|| "sa".to_owned()),
            password: Secret::new(password),
            port,
            client_driver: settings.database.client_driver.clone(),
            sqlcmd_path: settings.database.sqlcmd_path.clone(),
            backup_dir: settings.database.backup_dir.clone(),
        };

        Ok(Self {
            project: settings.project.clone(),
            services: settings.services.clone(),
            start_order: settings.start_order()?,
            network: settings.network.clone(),
            volumes: settings.volumes.clone(),
            web: settings.web.clone(),
            web_service,
            proxy_service,
            database,
            application: ApplicationConfig {
                secret_key: Secret::new(secret_key),
                debug,
                allowed_hosts,
            },
            readiness: settings.readiness.clone(),
            health: settings.health.clone(),
            migration: settings.migration.clone(),
            locks: settings.locks.clone(),
        })
    }

    pub fn database_service(&self) -> &str {
        &self.database.service
    }

    pub fn web_service(&self) -> &str {
        &self.web_service
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} '{}' is not a boolean", env_keys::DEBUG, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn default_settings_start_database_before_web() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.start_order().unwrap(), vec!["db", "web"]);
    }

    #[test]
    fn proxy_is_ordered_after_its_dependencies() {
        let raw = r#"
            [services.proxy]
            role = "proxy"
            image = "nginx"
            tag = "1.27-alpine"
            depends_on = ["web"]

            [services.web]
            role = "web"
            image = "familyhub/timesheet"
            depends_on = ["db"]
            probe = "http"

            [services.db]
            role = "database"
            image = "mcr.microsoft.com/mssql/server"
            tag = "2022-latest"
            probe = "database"
        "#;
        let settings: Settings = raw.parse().unwrap();
        assert_eq!(settings.start_order().unwrap(), vec!["db", "web", "proxy"]);
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let mut settings = Settings::default();
        settings.services["db"].depends_on = vec!["web".to_owned()];
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn readiness_durations_parse_as_seconds() {
        let raw = r#"
            [readiness]
            max_attempts = 4
            initial_backoff = 1
            max_backoff = 8
        "#;
        let settings: Settings = raw.parse().unwrap();
        assert_eq!(settings.readiness.max_attempts, 4);
        assert_eq!(settings.readiness.initial_backoff, Duration::from_secs(1));
        assert_eq!(settings.readiness.max_backoff, Duration::from_secs(8));
    }

    #[test]
    fn deployment_config_applies_resource_defaults() {
        let config = DeploymentConfig::from_parts(
            &Settings::default(),
            &env(&[("SECRET_KEY", "abc"), ("DATABASE_PASSWORD", "pw")]),
        )
        .unwrap();
        assert_eq!(config.database.name, "timesheet_prod");
        assert_eq!(config.database.user, "sa");
        assert_eq!(config.database.host, "db");
        assert_eq!(config.database.port, 1433);
        assert!(!config.application.debug);
        assert_eq!(config.web_service(), "web");
        assert!(config.proxy_service.is_none());
    }

    #[test]
    fn credentials_keep_their_surrounding_whitespace() {
        let config = DeploymentConfig::from_parts(
            &Settings::default(),
            &env(&[
                ("SECRET_KEY", "abc"),
                ("DATABASE_PASSWORD", "  pw with edges \r\n"),
                ("DATABASE_NAME", " timesheet_qa "),
            ]),
        )
        .unwrap();
        assert_eq!(config.database.password.expose(), "  pw with edges ");
        assert_eq!(config.database.name, "timesheet_qa");

        let blank = DeploymentConfig::from_parts(
            &Settings::default(),
            &env(&[("SECRET_KEY", "abc"), ("DATABASE_PASSWORD", "   ")]),
        );
        assert!(blank.is_err());
    }

    #[test]
    fn deployment_config_requires_credentials() {
        let err = DeploymentConfig::from_parts(&Settings::default(), &env(&[("SECRET_KEY", "abc")]))
            .unwrap_err();
        assert!(err.to_string().contains("DATABASE_PASSWORD"));
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = DeploymentConfig::from_parts(
            &Settings::default(),
            &env(&[
                ("SECRET_KEY", "super-secret-key"),
                ("DATABASE_PASSWORD", "Hunter2!"),
                ("ALLOWED_HOSTS", "example.org, localhost"),
                ("DEBUG", "True"),
            ]),
        )
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-key"));
        assert!(!rendered.contains("Hunter2!"));
        assert!(config.application.debug);
        assert_eq!(
            config.application.allowed_hosts,
            vec!["example.org".to_owned(), "localhost".to_owned()]
        );
    }

    #[test]
    fn health_url_normalises_path() {
        let mut web = WebSettings::default();
        web.health_path = "health/".to_owned();
        assert_eq!(web.health_url(), "http://127.0.0.1:8080/health/");
    }
}
