//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Process execution seam shared by every component."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
//! Every shell-out of the deployer goes through [`CommandExecutor`]. The
//! production implementation spawns processes with tokio; [`ScriptedExecutor`]
//! answers from canned replies and records what it was asked to run.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, trace};
use tsd_common::config::Secret;

use crate::error::{DeployError, ExecutorFailure, Result};

/// A single external command.
#[derive(Debug, Clone, Default)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the child. Values never appear in logs.
    pub env: Vec<(String, Secret)>,
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.env.push((key.into(), value));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Printable command line with environment values omitted.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if present, otherwise stdout; used as diagnostic text.
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion with captured output.
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput>;

    /// Run attached to the caller's terminal and return the exit code.
    async fn run_attached(&self, invocation: &CommandInvocation) -> Result<i32>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    fn command(invocation: &CommandInvocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).kill_on_drop(true);
        for (key, value) in &invocation.env {
            command.env(key, value.expose());
        }
        command
    }

    fn spawn_error(invocation: &CommandInvocation, err: std::io::Error) -> DeployError {
        DeployError::Executor {
            command: invocation.command_line(),
            failure: ExecutorFailure::Spawn(err.to_string()),
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        debug!(command = %invocation.command_line(), "running command");
        let child = Self::command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Self::spawn_error(invocation, err))?;

        let waiting = child.wait_with_output();
        let output = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, waiting).await.map_err(|_| {
                DeployError::Executor {
                    command: invocation.command_line(),
                    failure: ExecutorFailure::TimedOut(limit),
                }
            })?,
            None => waiting.await,
        }
        .map_err(|err| Self::spawn_error(invocation, err))?;

        let result = CommandOutput {
            exit_code: exit_code_of(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(command = %invocation.command_line(), exit_code = result.exit_code, "command finished");
        Ok(result)
    }

    async fn run_attached(&self, invocation: &CommandInvocation) -> Result<i32> {
        debug!(command = %invocation.command_line(), "running attached command");
        let mut child = Self::command(invocation)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| Self::spawn_error(invocation, err))?;
        let status = child
            .wait()
            .await
            .map_err(|err| Self::spawn_error(invocation, err))?;
        Ok(exit_code_of(status))
    }
}

/// Shell convention: a child killed by a signal reports `128 + signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Canned answer of a [`ScriptedExecutor`].
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub delay: Option<Duration>,
    pub unavailable: bool,
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// The program could not be spawned at all.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            exit_code: -1,
            ..Self::default()
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug)]
struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// In-memory executor answering by substring match on the command line.
///
/// The longest matching needle wins. Queued replies are consumed in order and
/// the last one repeats. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandInvocation>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for commands containing `needle`.
    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        let mut rules = self.rules.lock();
        match rules.iter_mut().find(|rule| rule.needle == needle) {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                needle: needle.to_owned(),
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    /// Every invocation seen so far, in order.
    pub fn calls(&self) -> Vec<CommandInvocation> {
        self.calls.lock().clone()
    }

    /// Number of recorded invocations whose command line contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.command_line().contains(needle))
            .count()
    }

    fn answer(&self, invocation: &CommandInvocation) -> Reply {
        self.calls.lock().push(invocation.clone());
        let line = invocation.command_line();
        let mut rules = self.rules.lock();
        let Some(rule) = rules
            .iter_mut()
            .filter(|rule| line.contains(&rule.needle))
            .max_by_key(|rule| rule.needle.len())
        else {
            return Reply::default();
        };
        if rule.replies.len() > 1 {
            rule.replies.pop_front().unwrap_or_default()
        } else {
            rule.replies.front().cloned().unwrap_or_default()
        }
    }

    async fn settle(invocation: &CommandInvocation, reply: &Reply) -> Result<()> {
        if let Some(delay) = reply.delay {
            match invocation.timeout {
                Some(limit) if delay > limit => {
                    tokio::time::sleep(limit).await;
                    return Err(DeployError::Executor {
                        command: invocation.command_line(),
                        failure: ExecutorFailure::TimedOut(limit),
                    });
                }
                _ => tokio::time::sleep(delay).await,
            }
        }
        if reply.unavailable {
            return Err(DeployError::Executor {
                command: invocation.command_line(),
                failure: ExecutorFailure::Spawn("No such file or directory (os error 2)".into()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        let reply = self.answer(invocation);
        Self::settle(invocation, &reply).await?;
        Ok(CommandOutput {
            exit_code: reply.exit_code,
            stdout: reply.stdout,
            stderr: reply.stderr,
        })
    }

    async fn run_attached(&self, invocation: &CommandInvocation) -> Result<i32> {
        let reply = self.answer(invocation);
        Self::settle(invocation, &reply).await?;
        Ok(reply.exit_code)
    }
}
