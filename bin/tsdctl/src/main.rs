//! ---
//! tsd_section: "05-networking-external-interfaces"
//! tsd_subsection: "binary"
//! tsd_type: "source"
//! tsd_scope: "code"
//! tsd_description: "Operator CLI for the timesheet stack deployer."
//! tsd_version: "v0.1.0"
//! tsd_owner: "platform"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser, Subcommand, ValueEnum};
use tsd_common::logging::LogFormat;
use tsd_common::version::VersionInfo;

mod database;
mod exit;
mod session;
mod stack;

use session::{GlobalOptions, Session};

#[derive(Debug, Parser)]
#[command(
    name = "tsdctl",
    author,
    disable_version_flag = true,
    about = "Deploy and maintain the FamilyHub timesheet stack",
    long_about = None
)]
struct Cli {
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    /// Settings file (defaults to tsd.toml, then configs/tsd.toml).
    #[arg(long, value_name = "FILE", env = "TSD_CONFIG", global = true)]
    settings: Option<PathBuf>,

    /// Write Prometheus metrics of this run to FILE.
    #[arg(long = "metrics-file", value_name = "FILE", global = true)]
    metrics_file: Option<PathBuf>,

    /// Console log format.
    #[arg(long = "log-format", value_enum, global = true)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::StructuredJson,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the .env resource from its template if it does not exist.
    Init,
    /// Build, start, wait for the database and apply migrations.
    Deploy(stack::DeployArgs),
    /// Rebuild and redeploy, including static assets.
    Update,
    /// Build service images.
    Build,
    /// Start services in dependency order.
    Start,
    /// Stop all services.
    Stop,
    /// Restart all services.
    Restart,
    /// Show the live state of every declared service.
    Status(stack::StatusArgs),
    /// Show service logs.
    Logs(stack::LogsArgs),
    /// Open a Django shell in the web service.
    Shell,
    /// Open an interactive sqlcmd session.
    Dbshell,
    /// Provision the database and apply migrations.
    Migrate,
    /// Collect static assets of the web service.
    Collectstatic,
    /// Create a Django superuser interactively.
    Createsuperuser,
    /// Take a full database backup.
    #[command(name = "backup-db")]
    BackupDb,
    /// Restore the database from a backup artifact.
    #[command(name = "restore-db")]
    RestoreDb(database::ArtifactArgs),
    /// List backup artifacts, oldest first.
    #[command(name = "list-backups")]
    ListBackups(database::ListArgs),
    /// Delete one backup artifact.
    #[command(name = "delete-backup")]
    DeleteBackup(database::ArtifactArgs),
    /// Remove containers and networks of the stack.
    Clean(stack::CleanArgs),
    /// Aggregate web and database health.
    Health(stack::HealthArgs),
    /// Run every readiness layer and print the report.
    Diagnose,
    /// Poll the database until it answers a query.
    #[command(name = "wait-for-db")]
    WaitForDb(database::WaitArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().to_json());
        return ExitCode::SUCCESS;
    }
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };
    let options = GlobalOptions {
        settings: cli.settings,
        metrics_file: cli.metrics_file,
        log_format: cli.log_format.map(Into::into),
    };
    match run(options, command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            exit::code_for(&err)
        }
    }
}

async fn run(options: GlobalOptions, command: Commands) -> Result<ExitCode> {
    let session = Session::open(options)?;
    let result = dispatch(&session, command).await;
    session.finish();
    result
}

async fn dispatch(session: &Session, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Init => stack::init(session),
        Commands::Deploy(args) => stack::deploy(session, args).await,
        Commands::Update => stack::update(session).await,
        Commands::Build => stack::build(session).await,
        Commands::Start => stack::start(session).await,
        Commands::Stop => stack::stop(session).await,
        Commands::Restart => stack::restart(session).await,
        Commands::Status(args) => stack::status(session, args).await,
        Commands::Logs(args) => stack::logs(session, args).await,
        Commands::Shell => stack::manage_attached(session, &["shell"]).await,
        Commands::Createsuperuser => stack::manage_attached(session, &["createsuperuser"]).await,
        Commands::Collectstatic => stack::collect_static(session).await,
        Commands::Clean(args) => stack::clean(session, args).await,
        Commands::Health(args) => stack::health(session, args).await,
        Commands::Dbshell => database::dbshell(session).await,
        Commands::Migrate => database::migrate(session).await,
        Commands::BackupDb => database::backup(session).await,
        Commands::RestoreDb(args) => database::restore(session, args).await,
        Commands::ListBackups(args) => database::list(session, args).await,
        Commands::DeleteBackup(args) => database::delete(session, args).await,
        Commands::Diagnose => database::diagnose(session).await,
        Commands::WaitForDb(args) => database::wait(session, args).await,
    }
}
