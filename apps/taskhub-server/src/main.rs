use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use modkit::runtime::{run, RunOptions, ShutdownOptions};
use modkit::{EventBus, ModuleCatalog, ModuleLoader, ModuleRuntime};
use modkit_bootstrap::{AppConfig, AppConfigProvider, CliArgs};

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod host;
mod registered_modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// TaskHub Server - modular task management backend
#[derive(Parser)]
#[command(name = "taskhub-server")]
#[command(about = "TaskHub Server - modular task management backend")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory scanned for feature modules (overrides config)
    #[arg(long)]
    modules_root: Option<PathBuf>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and list discoverable modules
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        modules_root: cli
            .modules_root
            .as_ref()
            .map(|p| p.to_string_lossy().to_string()),
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // defaults -> YAML -> env (APP__*) -> CLI
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    if args.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let logging_config = config.logging.clone().unwrap_or_default();
    modkit_bootstrap::init_logging(&logging_config, Path::new(&config.server.home_dir));
    tracing::info!(home_dir = %config.server.home_dir, "TaskHub Server starting");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
    }
}

fn build_runtime(config: &AppConfig) -> ModuleRuntime {
    let loader = ModuleLoader::new(config.runtime.modules_root_path(), ModuleCatalog::discover())
        .with_entry_file(config.runtime.entry_file.clone());

    ModuleRuntime::builder()
        .config(Arc::new(AppConfigProvider::new(config.clone())))
        .event_bus(EventBus::with_response_timeout(config.runtime.response_timeout()))
        .loader(loader)
        .build()
}

async fn run_server(config: AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let runtime = Arc::new(build_runtime(&config));
    tracing::info!(
        modules_root = %config.runtime.modules_root,
        "Bootstrapping modules"
    );

    run(RunOptions {
        runtime: Arc::clone(&runtime),
        shutdown: ShutdownOptions::Signals,
        host: Some(host::http_host(addr, runtime)),
    })
    .await
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration");
    let runtime = build_runtime(&config);
    let loader = runtime
        .loader()
        .context("runtime was built without a module loader")?;

    let report = loader.load_all().await?;
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);

    println!("Modules under {}:", loader.root().display());
    for loaded in &report.loaded {
        println!(
            "  ok    {} {} ({})",
            loaded.manifest.name,
            loaded.descriptor.version,
            loaded.source.path.display()
        );
    }
    for failure in &report.failures {
        println!("  FAIL  {} ({}): {}", failure.name, failure.path.display(), failure.error);
    }

    if !report.failures.is_empty() {
        anyhow::bail!("{} module(s) failed to load", report.failures.len());
    }
    Ok(())
}
