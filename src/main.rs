use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use plugin_store::{AppConfig, AppStoreError, AppStoreService, FsRegistry, PluginRequest};

/// Manage host application plugins from the admin panel's backend.
#[derive(Debug, Parser)]
#[command(name = "plugin-store", version)]
struct Cli {
    /// Extra config file layered over the defaults and the user config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `general.base_path`.
    #[arg(long, global = true)]
    base_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a plugin package unless it is already present.
    Download(PluginArgs),
    Install(PluginArgs),
    Uninstall(PluginArgs),
    /// Print every discovered manifest as `name -> {status, version}`.
    List,
    /// Install a local archive; `-` reads it from stdin.
    Upload { archive: PathBuf },
}

// Fields stay optional so missing flags fail validation like empty ones.
#[derive(Debug, Args)]
struct PluginArgs {
    #[arg(long)]
    space: Option<String>,
    #[arg(long)]
    identifier: Option<String>,
    #[arg(long)]
    version: Option<String>,
}

impl From<PluginArgs> for PluginRequest {
    fn from(args: PluginArgs) -> Self {
        Self {
            space: args.space,
            identifier: args.identifier,
            version: args.version,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("plugin-store error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(base_path) = cli.base_path.as_deref() {
        config = config.with_base_path(base_path);
    }

    // Logs go to a file; stdout carries the JSON response.
    let _guard = init_logging(&config)?;
    tracing::info!("plugin-store starting in {}", config.base_path().display());

    let registry = FsRegistry::new(config.plugin_root(), config.mirror_path());
    let mut service = AppStoreService::from_config(registry, &config);

    let outcome: Result<Value, AppStoreError> = match cli.command {
        Command::Download(args) => service.download(&args.into()).map(|()| ok()),
        Command::Install(args) => service.install(&args.into()).map(|()| ok()),
        Command::Uninstall(args) => service.uninstall(&args.into()).map(|()| ok()),
        Command::List => Ok(json!({ "ok": true, "plugins": service.list_installed() })),
        Command::Upload { archive } => {
            let installed = if archive.as_os_str() == "-" {
                service.upload_and_install(io::stdin().lock())
            } else {
                let file = File::open(&archive)
                    .with_context(|| format!("opening upload {}", archive.display()))?;
                service.upload_and_install(file)
            };
            installed.map(|key| json!({ "ok": true, "plugin": key.to_string() }))
        }
    };

    match outcome {
        Ok(response) => {
            println!("{response}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::warn!(code = err.code(), "request failed: {err}");
            println!(
                "{}",
                json!({ "ok": false, "code": err.code(), "message": err.to_string() })
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn ok() -> Value {
    json!({ "ok": true })
}

fn init_logging(config: &AppConfig) -> Result<WorkerGuard> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "plugin-store.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(filter)
        .with_ansi(false)
        .init();

    Ok(guard)
}
