use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use lanscout::client::NetworkCallbacks;
use lanscout::discovery::DiscoveryOutcome;
use lanscout::App;
use lanscout_core::config::{LogFormat, LoggingConfig};
use lanscout_core::{AppConfig, NetworkNotification, ServiceKind};
use serde_json::json;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// lanscout - service discovery and connection resilience for local-network devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (optional; defaults apply when missing)
    #[arg(short, long, default_value = "config/lanscout.yaml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, env = "LANSCOUT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve every service and print the endpoints
    Resolve {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run one discovery scan for a service
    Discover {
        /// llm, transcription, speech-synthesis or backend
        service: ServiceKind,
    },

    /// Read network notifications as JSON lines from stdin and run the full layer
    Watch,

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(&args)?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.format = LogFormat::Json;
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;
    info!("Configuration loaded from {:?}", args.config);

    match args.command {
        Command::CheckConfig => {
            let rendered = serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Resolve { json } => resolve(config, json).await,
        Command::Discover { service } => discover(config, service).await,
        Command::Watch => watch(config).await,
    }
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;
    config.apply_env_overrides();
    Ok(config)
}

/// Installs the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.filter_directives()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);

    let installed = match (logging.format, logging.timestamps) {
        (LogFormat::Json, true) => builder.json().try_init(),
        (LogFormat::Json, false) => builder.json().without_time().try_init(),
        (LogFormat::Text, true) => builder.try_init(),
        (LogFormat::Text, false) => builder.without_time().try_init(),
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

async fn resolve(config: AppConfig, as_json: bool) -> Result<()> {
    let app = App::from_config(config).await.context("Failed to build application")?;
    app.registry().initialize().await;

    let snapshot = app.registry().snapshot();
    if as_json {
        let rendered = serde_json::to_string_pretty(&snapshot).context("Failed to render endpoints")?;
        println!("{}", rendered);
    } else {
        for kind in ServiceKind::ALL {
            let endpoint = app.registry().describe(kind);
            let url = if endpoint.url.is_empty() { "-" } else { endpoint.url.as_str() };
            println!(
                "{:<18} {:<36} {:<12} {}",
                kind,
                url,
                endpoint.origin,
                if endpoint.available { "available" } else { "unavailable" }
            );
        }
    }

    app.shutdown().await;
    Ok(())
}

async fn discover(config: AppConfig, service: ServiceKind) -> Result<()> {
    let app = App::from_config(config).await.context("Failed to build application")?;
    let plan = app.discovery().plan();
    info!(
        service = %service,
        priority_hosts = plan.priority.len(),
        sweep_hosts = plan.sweep.len(),
        "Starting discovery"
    );

    let outcome = app.discovery().discover(service).await;
    let stats = app.discovery().stats();
    app.shutdown().await;

    match outcome {
        DiscoveryOutcome::Discovered(endpoint) => {
            println!("{} {}", service, endpoint.url);
            info!(probes = stats.probes_issued, "Discovery finished");
            Ok(())
        }
        DiscoveryOutcome::NotFound => Err(anyhow!(
            "{} not found after {} probes",
            service,
            stats.probes_issued
        )),
        DiscoveryOutcome::InProgress => Err(anyhow!("another scan for {} is already running", service)),
    }
}

async fn watch(config: AppConfig) -> Result<()> {
    let app = App::from_config(config).await.context("Failed to build application")?;

    let events = app.monitor().add_callbacks(
        NetworkCallbacks::new()
            .on_connect(|status| print_event(json!({"event": "connect", "status": status})))
            .on_disconnect(|status| print_event(json!({"event": "disconnect", "status": status})))
            .on_reconnect(|info| {
                print_event(json!({
                    "event": "reconnect",
                    "offline_duration_ms": info.offline_duration.as_millis() as u64,
                    "needs_refresh": info.needs_refresh,
                }))
            })
            .on_stable(|status| print_event(json!({"event": "stable", "status": status})))
            .on_transport_change(|from, to| {
                print_event(json!({"event": "transport_change", "from": from, "to": to}))
            }),
    );

    app.start().await;
    info!("Watching for network notifications on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<NetworkNotification>(line) {
                    Ok(notification) => {
                        if !app.handle_network_change(notification) {
                            debug!("Notification debounced");
                        }
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed notification"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    events.dispose();
    app.settle().await;
    app.shutdown().await;
    Ok(())
}

fn print_event(event: serde_json::Value) {
    println!("{}", event);
}
