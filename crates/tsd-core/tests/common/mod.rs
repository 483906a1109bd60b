//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Shared fixtures for the deployment core integration tests."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tsd_common::config::{DeploymentConfig, Settings};
use tsd_core::executor::{CommandExecutor, CommandInvocation, CommandOutput};
use tsd_core::readiness::{NetworkProbe, ProbeFailure, ProbeResult};
use tsd_core::Result;

pub fn settings(lock_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.locks.directory = lock_dir.to_path_buf();
    settings
}

pub fn config_from(settings: &Settings) -> Arc<DeploymentConfig> {
    let env: IndexMap<String, String> = [
        ("SECRET_KEY", "integration-secret"),
        ("DATABASE_PASSWORD", "Str0ng!Passw0rd"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    Arc::new(DeploymentConfig::from_parts(settings, &env).unwrap())
}

pub fn config(lock_dir: &Path) -> Arc<DeploymentConfig> {
    config_from(&settings(lock_dir))
}

/// Network where every check passes.
pub struct OpenNetwork;

#[async_trait]
impl NetworkProbe for OpenNetwork {
    async fn resolve(&self, host: &str) -> ProbeResult {
        Ok(format!("{} -> 172.20.0.2", host))
    }

    async fn ping(&self, host: &str) -> ProbeResult {
        Ok(format!("icmp echo from {}", host))
    }

    async fn connect(&self, host: &str, port: u16) -> ProbeResult {
        Ok(format!("{}:{} accepted connection", host, port))
    }
}

/// Host answers on the network but nothing listens on the database port.
pub struct ClosedPort;

#[async_trait]
impl NetworkProbe for ClosedPort {
    async fn resolve(&self, host: &str) -> ProbeResult {
        Ok(format!("{} -> 172.20.0.2", host))
    }

    async fn ping(&self, host: &str) -> ProbeResult {
        Ok(format!("icmp echo from {}", host))
    }

    async fn connect(&self, host: &str, port: u16) -> ProbeResult {
        Err(ProbeFailure::Failed(format!(
            "{}:{}: Connection refused (os error 111)",
            host, port
        )))
    }
}

/// Rows of the application's `dbo.timesheet_entry` table, keyed by id.
pub type Rows = BTreeMap<i64, i64>;

#[derive(Default)]
struct StackState {
    running: Vec<String>,
    files: BTreeMap<String, u64>,
    rows: Rows,
    snapshots: BTreeMap<String, Rows>,
    clock: u64,
}

/// Stateful stand-in for the compose platform and the database container.
///
/// Tracks which services are up, answers `ps`, keeps a backup directory in
/// memory and accepts queries once `ready_after` has elapsed on the tokio
/// clock. A single table is modelled: `INSERT`, `UPDATE` and `SELECT` on
/// `dbo.timesheet_entry` act on it, `BACKUP` snapshots it into the artifact
/// and `RESTORE` puts the snapshot back.
pub struct StackSimulator {
    epoch: Instant,
    ready_after: Duration,
    state: Mutex<StackState>,
    calls: Mutex<Vec<String>>,
}

impl StackSimulator {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            ready_after: Duration::ZERO,
            state: Mutex::new(StackState::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = delay;
        self
    }

    pub fn running(self, services: &[&str]) -> Self {
        self.state.lock().running = services.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn with_file(self, name: &str, size: u64) -> Self {
        self.state.lock().files.insert(name.to_owned(), size);
        self
    }

    /// Current table contents.
    pub fn rows(&self) -> Rows {
        self.state.lock().rows.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.contains(needle)).count()
    }

    fn ok(stdout: impl Into<String>) -> CommandOutput {
        CommandOutput {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    fn fail(stderr: impl Into<String>) -> CommandOutput {
        CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn respond(&self, invocation: &CommandInvocation) -> CommandOutput {
        let line = invocation.command_line();
        let mut state = self.state.lock();
        if line.contains(" up -d ") {
            if let Some(service) = invocation.args.last() {
                if !state.running.contains(service) {
                    state.running.push(service.clone());
                }
            }
            return Self::ok("");
        }
        if line.contains(" ps --all --format json") {
            let rows: Vec<String> = state
                .running
                .iter()
                .map(|service| {
                    format!(
                        r#"{{"Service":"{}","State":"running","Health":"","Status":"Up 1 minute"}}"#,
                        service
                    )
                })
                .collect();
            return Self::ok(rows.join("\n"));
        }
        if line.contains("odbcinst") {
            return Self::ok("[ODBC Driver 18 for SQL Server]\n");
        }
        if line.contains("SELECT 1") {
            if self.epoch.elapsed() >= self.ready_after {
                return Self::ok("1\n");
            }
            return Self::fail("Sqlcmd: Error: Login timeout expired.");
        }
        if line.contains(" find ") {
            let listing: String = state
                .files
                .iter()
                .enumerate()
                .map(|(idx, (name, size))| format!("{}.0 {} {}\n", 1_700_000_000 + idx, size, name))
                .collect();
            return Self::ok(listing);
        }
        if line.contains("BACKUP DATABASE") {
            let path = line
                .split("DISK = N'")
                .nth(1)
                .and_then(|rest| rest.split('\'').next())
                .unwrap_or_default();
            let name = path.rsplit('/').next().unwrap_or_default().to_owned();
            let state = &mut *state;
            state.clock += 1;
            state.files.insert(name.clone(), 4096 * state.clock);
            state.snapshots.insert(name, state.rows.clone());
            return Self::ok("BACKUP DATABASE successfully processed 420 pages.\n");
        }
        if line.contains("RESTORE DATABASE") {
            let path = line
                .split("DISK = N'")
                .nth(1)
                .and_then(|rest| rest.split('\'').next())
                .unwrap_or_default();
            let name = path.rsplit('/').next().unwrap_or_default();
            let state = &mut *state;
            return match state.snapshots.get(name) {
                Some(snapshot) => {
                    state.rows = snapshot.clone();
                    Self::ok("RESTORE DATABASE successfully processed 420 pages.\n")
                }
                None => Self::fail(format!("Msg 3201: Cannot open backup device '{}'.", path)),
            };
        }
        if let Some(batch) = sql_batch(invocation) {
            if batch.contains("dbo.timesheet_entry") {
                return Self::apply_statement(&mut state.rows, batch);
            }
        }
        if line.contains(" rm -f ") {
            if let Some(path) = invocation.args.last() {
                let name = path.rsplit('/').next().unwrap_or_default();
                state.files.remove(name);
            }
            return Self::ok("");
        }
        Self::ok("")
    }
}

impl StackSimulator {
    fn apply_statement(rows: &mut Rows, batch: &str) -> CommandOutput {
        if let Some(values) = between(batch, "VALUES (", ")") {
            let parsed: Vec<i64> = values.split(',').filter_map(|v| v.trim().parse().ok()).collect();
            if let [id, hours] = parsed[..] {
                if rows.contains_key(&id) {
                    return Self::fail("Msg 2627: Violation of PRIMARY KEY constraint.");
                }
                rows.insert(id, hours);
                return Self::ok("");
            }
        } else if let (Some(hours), Some(id)) = (
            between(batch, "SET hours = ", " "),
            after(batch, "WHERE id = "),
        ) {
            if let (Ok(hours), Ok(id)) = (hours.trim().parse::<i64>(), id.parse::<i64>()) {
                if let Some(row) = rows.get_mut(&id) {
                    *row = hours;
                }
                return Self::ok("");
            }
        } else if batch.contains("SELECT id, hours") {
            let listing: String = rows
                .iter()
                .map(|(id, hours)| format!("{} {}\n", id, hours))
                .collect();
            return Self::ok(listing);
        }
        Self::fail(format!("Msg 102: Incorrect syntax near '{}'.", batch))
    }
}

/// The `-Q` batch of a `sqlcmd` invocation.
fn sql_batch(invocation: &CommandInvocation) -> Option<&str> {
    invocation
        .args
        .iter()
        .skip_while(|arg| arg.as_str() != "-Q")
        .nth(1)
        .map(String::as_str)
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let rest = text.split_once(start)?.1;
    Some(rest.split_once(end).map_or(rest, |(inner, _)| inner))
}

fn after<'a>(text: &'a str, start: &str) -> Option<&'a str> {
    let rest = text.split_once(start)?.1;
    Some(rest.trim_end_matches(|c: char| c == ';' || c.is_whitespace()))
}

#[async_trait]
impl CommandExecutor for StackSimulator {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        self.calls.lock().push(invocation.command_line());
        Ok(self.respond(invocation))
    }

    async fn run_attached(&self, invocation: &CommandInvocation) -> Result<i32> {
        self.calls.lock().push(invocation.command_line());
        Ok(self.respond(invocation).exit_code)
    }
}
