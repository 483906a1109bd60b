//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Command builder for the compose project of one deployment."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tsd_common::config::{DeploymentConfig, Secret};

use crate::error::Result;
use crate::executor::{CommandExecutor, CommandInvocation, CommandOutput};

/// `docker compose -f <file> -p <project> --env-file <resource>` bound to an executor.
#[derive(Clone)]
pub struct ComposeProject {
    program: String,
    file: PathBuf,
    project: String,
    env_file: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for ComposeProject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposeProject")
            .field("file", &self.file)
            .field("project", &self.project)
            .finish()
    }
}

impl ComposeProject {
    pub fn new(config: &DeploymentConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            program: "docker".to_owned(),
            file: config.project.compose_file.clone(),
            project: config.project.name.clone(),
            env_file: config.project.env_file.clone(),
            executor,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    /// Base invocation with the compose file and project pinned.
    pub fn command<I, S>(&self, args: I) -> CommandInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandInvocation::new(&self.program)
            .arg("compose")
            .arg("-f")
            .arg(self.file.display().to_string())
            .arg("-p")
            .arg(&self.project)
            .arg("--env-file")
            .arg(self.env_file.display().to_string())
            .args(args)
    }

    /// Invocation running `args` inside `service` without a TTY.
    ///
    /// Each entry of `env` is forwarded by name only, so its value travels
    /// through the docker client's environment and never through argv.
    pub fn exec_command(
        &self,
        service: &str,
        args: &[String],
        env: &[(String, Secret)],
    ) -> CommandInvocation {
        let mut head = vec!["exec".to_owned(), "-T".to_owned()];
        for (key, _) in env {
            head.push("-e".to_owned());
            head.push(key.clone());
        }
        head.push(service.to_owned());
        let mut invocation = self.command(head).args(args.iter().cloned());
        for (key, value) in env {
            invocation = invocation.env(key.clone(), value.clone());
        }
        invocation
    }

    pub async fn run<I, S>(&self, args: I, timeout: Option<Duration>) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executor.run(&self.command(args).timeout(timeout)).await
    }

    pub async fn run_attached<I, S>(&self, args: I) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executor.run_attached(&self.command(args)).await
    }

    pub async fn exec(
        &self,
        service: &str,
        args: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.executor
            .run(&self.exec_command(service, args, &[]).timeout(timeout))
            .await
    }

    pub async fn exec_with_env(
        &self,
        service: &str,
        args: &[String],
        env: &[(String, Secret)],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        self.executor
            .run(&self.exec_command(service, args, env).timeout(timeout))
            .await
    }

    /// Interactive exec with a TTY.
    pub async fn exec_attached(&self, service: &str, args: &[String]) -> Result<i32> {
        let mut head = vec!["exec".to_owned(), service.to_owned()];
        head.extend(args.iter().cloned());
        self.executor.run_attached(&self.command(head)).await
    }
}
