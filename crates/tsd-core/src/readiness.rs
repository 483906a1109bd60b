//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Layered database readiness probing with bounded retries."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
//! Readiness prober.
//!
//! A probe walks the layers from name resolution up to an authenticated query
//! and records one entry per check in a [`ReadinessReport`]. Every layer runs
//! so the report is complete even when a lower layer already failed. Only the
//! query layer is retried, on the schedule of a [`BackoffPolicy`], and only
//! while a retry could still help: after a name-resolution or driver failure
//! the query runs once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tsd_common::config::{DeploymentConfig, ProbeVantage};
use tsd_common::time::human_duration;
use tsd_logging::{tsd_debug, tsd_info, tsd_warn, LogContext};
use tsd_metrics::DeployMetrics;

use crate::backoff::BackoffPolicy;
use crate::cancel::CancelSignal;
use crate::compose::ComposeProject;
use crate::error::{summarize_output, DeployError, ExecutorFailure, Result};
use crate::executor::{CommandExecutor, CommandInvocation, CommandOutput};
use crate::sql::SqlClient;

/// Scratch table of the diagnostic round-trip.
const ROUND_TRIP_TABLE: &str = "test_connection_table";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Dns,
    Reachability,
    TcpPort,
    DriverPresence,
    QueryProbe,
    ServerVersion,
    TableRoundTrip,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Dns => "dns",
            Layer::Reachability => "reachability",
            Layer::TcpPort => "tcp_port",
            Layer::DriverPresence => "driver_presence",
            Layer::QueryProbe => "query_probe",
            Layer::ServerVersion => "server_version",
            Layer::TableRoundTrip => "table_round_trip",
        }
    }

    /// Diagnostic-only layers never affect readiness.
    pub fn is_informational(&self) -> bool {
        matches!(self, Layer::ServerVersion | Layer::TableRoundTrip)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed-out",
            Outcome::Skipped => "skipped",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::TimedOut)
    }
}

/// One check of one layer.
#[derive(Debug, Clone)]
pub struct LayerResult {
    pub layer: Layer,
    pub outcome: Outcome,
    pub latency: Duration,
    pub detail: String,
    pub attempt: u32,
    /// Time since the probe started when this check began.
    pub offset: Duration,
}

impl LayerResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Append-only record of one probe pass.
#[derive(Debug, Clone, Default)]
pub struct ReadinessReport {
    entries: Vec<LayerResult>,
    ready: bool,
}

impl ReadinessReport {
    pub fn entries(&self) -> &[LayerResult] {
        &self.entries
    }

    /// True once the query layer passed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn for_layer(&self, layer: Layer) -> impl Iterator<Item = &LayerResult> {
        self.entries.iter().filter(move |entry| entry.layer == layer)
    }

    pub fn query_attempts(&self) -> usize {
        self.for_layer(Layer::QueryProbe).count()
    }

    /// Lowest failing readiness layer.
    pub fn first_failure(&self) -> Option<&LayerResult> {
        self.entries
            .iter()
            .find(|entry| !entry.layer.is_informational() && entry.outcome.is_failure())
    }

    /// Convert an unsuccessful report into the error naming its failing layer.
    pub fn into_result(self) -> Result<ReadinessReport> {
        if self.ready {
            return Ok(self);
        }
        let (layer, detail) = match self.first_failure() {
            Some(entry) => (entry.layer, entry.detail.clone()),
            None => (Layer::QueryProbe, "query layer did not run".to_owned()),
        };
        Err(DeployError::DatabaseNotReady {
            layer,
            detail,
            report: Box::new(self),
        })
    }

    /// Operator-facing table.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "{:<17} {:<9} attempt {:<2} +{:<8} {:>8}  {}\n",
                entry.layer.as_str(),
                entry.outcome.as_str(),
                entry.attempt,
                human_duration(entry.offset),
                human_duration(entry.latency),
                entry.detail
            ));
        }
        out.push_str(if self.ready {
            "database ready\n"
        } else {
            "database NOT ready\n"
        });
        out
    }

    fn push(&mut self, entry: LayerResult) {
        self.entries.push(entry);
    }
}

/// Result of a single network check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Failed(String),
    TimedOut(String),
    /// The check itself cannot run here (for example no `ping` binary).
    Unavailable(String),
}

pub type ProbeResult = std::result::Result<String, ProbeFailure>;

/// Network-level checks from some vantage point.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn resolve(&self, host: &str) -> ProbeResult;
    async fn ping(&self, host: &str) -> ProbeResult;
    async fn connect(&self, host: &str, port: u16) -> ProbeResult;
}

fn whole_seconds(duration: Duration) -> String {
    duration.as_secs().max(1).to_string()
}

fn classify_command(result: Result<CommandOutput>) -> std::result::Result<CommandOutput, ProbeFailure> {
    match result {
        Ok(output) => Ok(output),
        Err(DeployError::Executor {
            failure: ExecutorFailure::TimedOut(after),
            ..
        }) => Err(ProbeFailure::TimedOut(format!(
            "no answer within {}",
            human_duration(after)
        ))),
        Err(err) => Err(ProbeFailure::Failed(err.to_string())),
    }
}

fn looks_unavailable(output: &CommandOutput) -> bool {
    let text = output.diagnostic().to_ascii_lowercase();
    output.exit_code == 126
        || output.exit_code == 127
        || text.contains("executable file not found")
        || text.contains("command not found")
}

/// Checks run from the host executing the deployer.
pub struct HostNetwork {
    executor: Arc<dyn CommandExecutor>,
    connect_timeout: Duration,
}

impl HostNetwork {
    pub fn new(executor: Arc<dyn CommandExecutor>, connect_timeout: Duration) -> Self {
        Self {
            executor,
            connect_timeout,
        }
    }
}

#[async_trait]
impl NetworkProbe for HostNetwork {
    async fn resolve(&self, host: &str) -> ProbeResult {
        match tokio::time::timeout(self.connect_timeout, tokio::net::lookup_host((host, 0))).await {
            Err(_) => Err(ProbeFailure::TimedOut(format!("resolving {} timed out", host))),
            Ok(Err(err)) => Err(ProbeFailure::Failed(format!("{}: {}", host, err))),
            Ok(Ok(addrs)) => {
                let addrs: Vec<String> = addrs.map(|addr| addr.ip().to_string()).collect();
                if addrs.is_empty() {
                    Err(ProbeFailure::Failed(format!("{} has no addresses", host)))
                } else {
                    Ok(format!("{} -> {}", host, addrs.join(", ")))
                }
            }
        }
    }

    async fn ping(&self, host: &str) -> ProbeResult {
        let wait = whole_seconds(self.connect_timeout);
        let invocation = CommandInvocation::new("ping")
            .args(["-c", "1", "-W", wait.as_str(), host])
            .timeout(Some(self.connect_timeout + Duration::from_secs(1)));
        match self.executor.run(&invocation).await {
            Err(DeployError::Executor {
                failure: ExecutorFailure::Spawn(reason),
                ..
            }) => Err(ProbeFailure::Unavailable(reason)),
            other => {
                let output = classify_command(other)?;
                if output.success() {
                    Ok(format!("icmp echo from {}", host))
                } else if looks_unavailable(&output) {
                    Err(ProbeFailure::Unavailable(summarize_output(output.diagnostic())))
                } else {
                    Err(ProbeFailure::Failed(format!("no icmp echo from {}", host)))
                }
            }
        }
    }

    async fn connect(&self, host: &str, port: u16) -> ProbeResult {
        match tokio::time::timeout(
            self.connect_timeout,
            tokio::net::TcpStream::connect((host, port)),
        )
        .await
        {
            Err(_) => Err(ProbeFailure::TimedOut(format!(
                "connect to {}:{} timed out",
                host, port
            ))),
            Ok(Err(err)) => Err(ProbeFailure::Failed(format!("{}:{}: {}", host, port, err))),
            Ok(Ok(_stream)) => Ok(format!("{}:{} accepted connection", host, port)),
        }
    }
}

/// Checks run inside a service container of the compose project.
pub struct ContainerNetwork {
    compose: ComposeProject,
    service: String,
    connect_timeout: Duration,
}

impl ContainerNetwork {
    pub fn new(compose: ComposeProject, service: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            compose,
            service: service.into(),
            connect_timeout,
        }
    }

    async fn exec(&self, args: &[String]) -> std::result::Result<CommandOutput, ProbeFailure> {
        classify_command(
            self.compose
                .exec(&self.service, args, Some(self.connect_timeout + Duration::from_secs(5)))
                .await,
        )
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}

#[async_trait]
impl NetworkProbe for ContainerNetwork {
    async fn resolve(&self, host: &str) -> ProbeResult {
        let output = self.exec(&owned(&["getent", "hosts", host])).await?;
        if !output.success() {
            return Err(ProbeFailure::Failed(format!(
                "{} does not resolve from {}",
                host, self.service
            )));
        }
        let addrs: Vec<&str> = output
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .collect();
        Ok(format!("{} -> {}", host, addrs.join(", ")))
    }

    async fn ping(&self, host: &str) -> ProbeResult {
        let wait = whole_seconds(self.connect_timeout);
        let output = self
            .exec(&owned(&["ping", "-c", "1", "-W", wait.as_str(), host]))
            .await?;
        if output.success() {
            Ok(format!("icmp echo from {}", host))
        } else if looks_unavailable(&output) {
            Err(ProbeFailure::Unavailable(summarize_output(output.diagnostic())))
        } else {
            Err(ProbeFailure::Failed(format!("no icmp echo from {}", host)))
        }
    }

    async fn connect(&self, host: &str, port: u16) -> ProbeResult {
        let script = "import socket,sys; socket.create_connection((sys.argv[1], int(sys.argv[2])), timeout=float(sys.argv[3])).close()";
        let port_arg = port.to_string();
        let timeout_arg = self.connect_timeout.as_secs_f64().to_string();
        let args = owned(&[
            "python",
            "-c",
            script,
            host,
            port_arg.as_str(),
            timeout_arg.as_str(),
        ]);
        let output = self.exec(&args).await?;
        if output.success() {
            Ok(format!("{}:{} accepted connection", host, port))
        } else if output.diagnostic().contains("timed out") {
            Err(ProbeFailure::TimedOut(format!(
                "connect to {}:{} timed out",
                host, port
            )))
        } else {
            Err(ProbeFailure::Failed(format!(
                "{}:{}: {}",
                host,
                port,
                summarize_output(output.diagnostic())
            )))
        }
    }
}

/// Pick the network vantage configured for the deployment.
pub fn network_for(config: &DeploymentConfig, compose: &ComposeProject) -> Arc<dyn NetworkProbe> {
    match config.readiness.vantage {
        ProbeVantage::WebContainer => Arc::new(ContainerNetwork::new(
            compose.clone(),
            config.web_service(),
            config.readiness.connect_timeout,
        )),
        ProbeVantage::Host => Arc::new(HostNetwork::new(
            compose.executor().clone(),
            config.readiness.connect_timeout,
        )),
    }
}

fn from_probe(result: ProbeResult) -> (Outcome, String) {
    match result {
        Ok(detail) => (Outcome::Passed, detail),
        Err(ProbeFailure::Failed(detail)) | Err(ProbeFailure::Unavailable(detail)) => {
            (Outcome::Failed, detail)
        }
        Err(ProbeFailure::TimedOut(detail)) => (Outcome::TimedOut, detail),
    }
}

pub struct ReadinessProber {
    config: Arc<DeploymentConfig>,
    compose: ComposeProject,
    sql: SqlClient,
    network: Arc<dyn NetworkProbe>,
    policy: BackoffPolicy,
    cancel: CancelSignal,
    metrics: Option<DeployMetrics>,
}

impl ReadinessProber {
    pub fn new(
        config: Arc<DeploymentConfig>,
        compose: ComposeProject,
        network: Arc<dyn NetworkProbe>,
    ) -> Self {
        let sql = SqlClient::new(compose.clone(), config.database.clone());
        let policy = BackoffPolicy::from_settings(&config.readiness);
        Self {
            config,
            compose,
            sql,
            network,
            policy,
            cancel: CancelSignal::new(),
            metrics: None,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<DeployMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Probe with the configured retry policy.
    pub async fn probe(&self) -> Result<ReadinessReport> {
        self.probe_with(self.policy).await
    }

    /// Probe with an explicit retry policy. Errors only on cancellation.
    pub async fn probe_with(&self, policy: BackoffPolicy) -> Result<ReadinessReport> {
        let start = Instant::now();
        let db = &self.config.database;
        let ctx = LogContext::new()
            .with_target(self.compose.project())
            .with_service(&db.service)
            .with_step("readiness");
        let mut report = ReadinessReport::default();

        let dns = self
            .check(Layer::Dns, 1, start, async {
                from_probe(self.network.resolve(&db.host).await)
            })
            .await?;
        report.push(dns);

        let reach = self
            .check(Layer::Reachability, 1, start, async {
                match self.network.ping(&db.host).await {
                    Err(ProbeFailure::Unavailable(reason)) => {
                        let (outcome, detail) =
                            from_probe(self.network.connect(&db.host, db.port).await);
                        (
                            outcome,
                            format!("icmp unavailable ({}); tcp fallback: {}", reason, detail),
                        )
                    }
                    other => from_probe(other),
                }
            })
            .await?;
        report.push(reach);

        let port = self
            .check(Layer::TcpPort, 1, start, async {
                from_probe(self.network.connect(&db.host, db.port).await)
            })
            .await?;
        report.push(port);

        let driver = self
            .check(Layer::DriverPresence, 1, start, self.driver_check())
            .await?;
        report.push(driver);

        let retry_helps = report
            .entries()
            .iter()
            .filter(|entry| matches!(entry.layer, Layer::Dns | Layer::DriverPresence))
            .all(|entry| !entry.outcome.is_failure());
        let policy = if retry_helps {
            policy
        } else {
            tsd_warn!(
                context = ctx.clone(),
                "name resolution or driver check failed; query layer runs once"
            );
            BackoffPolicy::single()
        };

        let mut backoff = policy.start();
        let mut attempt = 1;
        loop {
            let entry = self.query_attempt(attempt, start).await?;
            let passed = entry.passed();
            if !passed {
                tsd_warn!(
                    context = ctx.clone().with_attempt(attempt),
                    "query probe {}: {}",
                    entry.outcome.as_str(),
                    entry.detail
                );
            }
            report.push(entry);
            if passed {
                report.ready = true;
                break;
            }
            match backoff.next_delay() {
                Some(delay) => {
                    tsd_debug!(
                        context = ctx.clone().with_attempt(attempt),
                        "next query attempt in {}",
                        human_duration(delay)
                    );
                    self.cancel.sleep(delay).await?;
                    attempt += 1;
                }
                None => break,
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_probe(start.elapsed().as_secs_f64());
            for entry in report.entries().iter().filter(|e| e.outcome.is_failure()) {
                metrics.record_layer_failure(entry.layer.as_str());
            }
        }
        if report.is_ready() {
            tsd_info!(
                context = ctx.with_attempt(attempt),
                "database ready after {}",
                human_duration(start.elapsed())
            );
        } else if let Some(failure) = report.first_failure() {
            tsd_warn!(
                context = ctx,
                "database not ready; first failing layer {}",
                failure.layer
            );
        }
        Ok(report)
    }

    /// Probe and fail with [`DeployError::DatabaseNotReady`] unless ready.
    pub async fn require_ready(&self) -> Result<ReadinessReport> {
        self.probe().await?.into_result()
    }

    /// Fixed-interval wait: `timeout / interval` query attempts.
    pub async fn wait_for_database(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<ReadinessReport> {
        self.probe_with(BackoffPolicy::fixed_interval(timeout, interval))
            .await?
            .into_result()
    }

    /// Full probe followed by the informational layers.
    pub async fn diagnose(&self) -> Result<ReadinessReport> {
        let start = Instant::now();
        let mut report = self.probe().await?;
        if !report.is_ready() {
            for layer in [Layer::ServerVersion, Layer::TableRoundTrip] {
                report.push(LayerResult {
                    layer,
                    outcome: Outcome::Skipped,
                    latency: Duration::ZERO,
                    detail: "query layer did not pass".to_owned(),
                    attempt: 1,
                    offset: start.elapsed(),
                });
            }
            return Ok(report);
        }

        let version = self
            .check(Layer::ServerVersion, 1, start, async {
                match self.sql_step("SELECT @@VERSION", None).await {
                    (Outcome::Passed, stdout) => (
                        Outcome::Passed,
                        stdout.lines().next().unwrap_or_default().trim().to_owned(),
                    ),
                    other => other,
                }
            })
            .await?;
        report.push(version);

        let table = format!("dbo.{}", ROUND_TRIP_TABLE);
        let batch = format!(
            "IF OBJECT_ID(N'{table}', N'U') IS NOT NULL DROP TABLE {table}; \
             CREATE TABLE {table} (id INT PRIMARY KEY, note NVARCHAR(64)); \
             INSERT INTO {table} (id, note) VALUES (1, N'probe'); \
             SELECT note FROM {table} WHERE id = 1; \
             DROP TABLE {table};",
            table = table
        );
        let database = self.config.database.name.clone();
        let round_trip = self
            .check(Layer::TableRoundTrip, 1, start, async {
                match self.sql_step(&batch, Some(&database)).await {
                    (Outcome::Passed, stdout) if stdout.contains("probe") => (
                        Outcome::Passed,
                        format!("create/insert/select/drop on {} ok", table),
                    ),
                    (Outcome::Passed, stdout) => (
                        Outcome::Failed,
                        format!("unexpected select result: {}", summarize_output(&stdout)),
                    ),
                    other => other,
                }
            })
            .await?;
        report.push(round_trip);
        Ok(report)
    }

    /// A single query-layer check, used as the pre-migration and health check.
    pub async fn query_once(&self) -> Result<LayerResult> {
        self.query_attempt(1, Instant::now()).await
    }

    async fn query_attempt(&self, attempt: u32, start: Instant) -> Result<LayerResult> {
        if let Some(metrics) = &self.metrics {
            metrics.inc_probe_attempt();
        }
        self.check(Layer::QueryProbe, attempt, start, async {
            match self.sql_step("SELECT 1", None).await {
                (Outcome::Passed, stdout) if stdout.trim() == "1" => {
                    (Outcome::Passed, "SELECT 1 returned 1".to_owned())
                }
                (Outcome::Passed, stdout) => (
                    Outcome::Failed,
                    format!("unexpected result: {}", summarize_output(&stdout)),
                ),
                other => other,
            }
        })
        .await
    }

    /// Run a batch; on success the second element is stdout, else diagnostics.
    async fn sql_step(&self, batch: &str, database: Option<&str>) -> (Outcome, String) {
        let result = self
            .sql
            .execute(batch, database, Some(self.config.readiness.command_timeout))
            .await;
        match classify_command(result) {
            Ok(output) if output.success() => (Outcome::Passed, output.stdout),
            Ok(output) => (Outcome::Failed, summarize_output(output.diagnostic())),
            Err(failure) => from_probe(Err(failure)),
        }
    }

    async fn driver_check(&self) -> (Outcome, String) {
        let driver = &self.config.database.client_driver;
        let result = self
            .compose
            .exec(
                self.config.web_service(),
                &owned(&["odbcinst", "-q", "-d"]),
                Some(self.config.readiness.command_timeout),
            )
            .await;
        match classify_command(result) {
            Ok(output) if output.success() => {
                let wanted = format!("[{}]", driver);
                if output.stdout.lines().any(|line| line.trim() == wanted) {
                    (Outcome::Passed, format!("{} registered", driver))
                } else {
                    (
                        Outcome::Failed,
                        format!(
                            "{} not registered (found: {})",
                            driver,
                            summarize_output(&output.stdout)
                        ),
                    )
                }
            }
            Ok(output) => (
                Outcome::Failed,
                format!("odbcinst failed: {}", summarize_output(output.diagnostic())),
            ),
            Err(failure) => from_probe(Err(failure)),
        }
    }

    async fn check<F>(&self, layer: Layer, attempt: u32, start: Instant, work: F) -> Result<LayerResult>
    where
        F: Future<Output = (Outcome, String)>,
    {
        let began = Instant::now();
        let (outcome, detail) = self.cancel.guard(async { Ok(work.await) }).await?;
        Ok(LayerResult {
            layer,
            outcome,
            latency: began.elapsed(),
            detail,
            attempt,
            offset: began.saturating_duration_since(start),
        })
    }
}
