//! ---
//! tsd_section: "01-core-functionality"
//! tsd_subsection: "module"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "sqlcmd access to the database engine container."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::time::Duration;

use tsd_common::config::DatabaseConfig;

use crate::compose::ComposeProject;
use crate::error::Result;
use crate::executor::CommandOutput;

const PASSWORD_ENV: &str = "SQLCMDPASSWORD";

/// Bracket-quote an identifier for T-SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a Unicode string literal for T-SQL.
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

/// Runs batches through `sqlcmd` inside the database service.
#[derive(Debug, Clone)]
pub struct SqlClient {
    compose: ComposeProject,
    database: DatabaseConfig,
}

impl SqlClient {
    pub fn new(compose: ComposeProject, database: DatabaseConfig) -> Self {
        Self { compose, database }
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn compose(&self) -> &ComposeProject {
        &self.compose
    }

    /// Argument vector for `sqlcmd`; the password travels via `SQLCMDPASSWORD`.
    pub fn arguments(&self, batch: &str, database: Option<&str>) -> Vec<String> {
        let mut args = vec![
            self.database.sqlcmd_path.clone(),
            "-S".to_owned(),
            format!("{},{}", self.database.host, self.database.port),
            "-U".to_owned(),
            self.database.user.clone(),
            "-C".to_owned(),
            "-b".to_owned(),
            "-h".to_owned(),
            "-1".to_owned(),
            "-W".to_owned(),
        ];
        if let Some(name) = database {
            args.push("-d".to_owned());
            args.push(name.to_owned());
        }
        args.push("-Q".to_owned());
        args.push(format!("SET NOCOUNT ON; {}", batch));
        args
    }

    /// Execute a batch. A nonzero exit is returned, not raised.
    pub async fn execute(
        &self,
        batch: &str,
        database: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let env = [(PASSWORD_ENV.to_owned(), self.database.password.clone())];
        self.compose
            .exec_with_env(
                &self.database.service,
                &self.arguments(batch, database),
                &env,
                timeout,
            )
            .await
    }

    /// Interactive `sqlcmd` session against the application database.
    pub async fn shell(&self) -> Result<i32> {
        let args = vec![
            self.database.sqlcmd_path.clone(),
            "-S".to_owned(),
            format!("{},{}", self.database.host, self.database.port),
            "-U".to_owned(),
            self.database.user.clone(),
            "-C".to_owned(),
            "-d".to_owned(),
            self.database.name.clone(),
        ];
        let env = [(PASSWORD_ENV.to_owned(), self.database.password.clone())];
        let mut invocation = self
            .compose
            .exec_command(&self.database.service, &args, &env);
        // interactive: drop -T so the session gets a TTY
        invocation.args.retain(|arg| arg != "-T");
        self.compose.executor().run_attached(&invocation).await
    }
}
