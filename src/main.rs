//! beacon - keeps a DNS record in sync with a UniFi gateway's uplink IP.

use anyhow::Context;
use beacon::build_info::BuildInfo;
use beacon::clients::{
    current_uplink_ip, ControllerApi, NextDnsNotifier, Route53RecordStore, UdmClient,
};
use beacon::config::Config;
use beacon::job::{JobSettings, ReconciliationJob, SecondaryOutcome, TickOutcome};
use beacon::scheduler::Scheduler;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Keeps a Route 53 record pointed at your UniFi gateway's uplink IP")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciler on its cron schedule until interrupted
    Daemon,

    /// Run a single reconciliation tick
    RunOnce,

    /// Show the controller's current uplink IP
    Status,

    /// Validate configuration and controller credentials
    Validate,

    /// Print an example configuration file
    ExampleConfig,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn get_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }

    let candidates = [
        Config::default_path().ok(),
        Some(PathBuf::from("/etc/beacon/config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for candidate in candidates.into_iter().flatten() {
        if candidate.exists() {
            return candidate;
        }
    }

    Config::default_path().unwrap_or_else(|_| PathBuf::from("config.toml"))
}

fn load_validated(path: &Path) -> anyhow::Result<Config> {
    let config = Config::load_from(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = get_config_path(cli.config);
    let build = BuildInfo::from_build_env();

    match cli.command {
        Commands::Daemon => {
            let config = load_validated(&config_path)?;
            cmd_daemon(config, &build).await?;
        }
        Commands::RunOnce => {
            let config = load_validated(&config_path)?;
            cmd_run_once(config, &build).await?;
        }
        Commands::Status => {
            let config = Config::load_from(&config_path)?;
            cmd_status(config, &build).await?;
        }
        Commands::Validate => {
            cmd_validate(&config_path, &build).await?;
        }
        Commands::ExampleConfig => {
            print!("{}", Config::example().to_toml()?);
        }
    }

    Ok(())
}

async fn build_job(config: &Config, build: &BuildInfo) -> ReconciliationJob {
    let controller = Arc::new(UdmClient::new(&config.controller, build));
    let records = Arc::new(Route53RecordStore::new(&config.route53).await);
    let notifier = Arc::new(NextDnsNotifier::new(&config.nextdns, build));

    ReconciliationJob::new(
        controller,
        records,
        notifier,
        JobSettings::from_config(config),
    )
}

async fn cmd_daemon(config: Config, build: &BuildInfo) -> anyhow::Result<()> {
    let job = Arc::new(build_job(&config, build).await);
    let scheduler = Scheduler::new(job, &config.scheduler)?;

    info!(
        user_agent = %build.user_agent(),
        cron = %config.scheduler.cron_expression,
        record = %config.route53.resource_record_upsert_name,
        "Starting beacon daemon"
    );
    scheduler.start()?;

    let signal = wait_for_shutdown().await?;
    info!("Received {}, shutting down", signal);

    scheduler.stop().await?;
    Ok(())
}

async fn cmd_run_once(config: Config, build: &BuildInfo) -> anyhow::Result<()> {
    let job = build_job(&config, build).await;

    match job.run().await {
        TickOutcome::Unchanged { ip } => {
            println!("{} already points at {}", config.route53.resource_record_upsert_name, ip);
        }
        TickOutcome::Updated {
            previous,
            ip,
            secondary,
        } => {
            println!(
                "{}: {} -> {}",
                config.route53.resource_record_upsert_name, previous, ip
            );
            match secondary {
                SecondaryOutcome::Notified => println!("NextDNS linked IP updated"),
                SecondaryOutcome::Failed(e) => println!("NextDNS linked IP update failed: {}", e),
                SecondaryOutcome::Disabled => {}
            }
        }
        TickOutcome::Aborted { stage, error } => {
            anyhow::bail!("Reconciliation aborted at {}: {}", stage, error);
        }
    }

    Ok(())
}

async fn cmd_status(config: Config, build: &BuildInfo) -> anyhow::Result<()> {
    let controller = UdmClient::new(&config.controller, build);

    println!("beacon {}", build.user_agent());
    println!("==============\n");

    let ip = current_uplink_ip(
        &controller,
        &config.controller.username,
        &config.controller.password,
    )
    .await;
    println!("Uplink IP: {}", ip.as_deref().unwrap_or("unknown"));
    println!(
        "Record:    {} (zone {})",
        config.route53.resource_record_upsert_name, config.route53.hosted_zone_id
    );

    Ok(())
}

async fn cmd_validate(config_path: &Path, build: &BuildInfo) -> anyhow::Result<()> {
    println!("Validating {}...\n", config_path.display());

    let config = load_validated(config_path)?;
    println!("  configuration: OK");

    let controller = UdmClient::new(&config.controller, build);
    print_prompt(
        &mut std::io::stdout(),
        &format!("  controller ({}): ", config.controller.api_base_url),
    )?;

    match controller
        .authenticate(&config.controller.username, &config.controller.password)
        .await
    {
        Ok(_) => println!("OK"),
        Err(e) => {
            println!("FAILED - {}", e);
            anyhow::bail!("Controller authentication failed");
        }
    }

    Ok(())
}

/// Write a prompt that precedes a slow operation and flush it right away.
fn print_prompt(out: &mut impl Write, prompt: &str) -> std::io::Result<()> {
    out.write_all(prompt.as_bytes())?;
    out.flush()
}

#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
