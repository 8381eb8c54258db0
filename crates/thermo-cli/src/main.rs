//! thermo - command-line client for networked thermostats
//!
//! Read and change thermostat state, call device methods, and watch live
//! updates from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thermo_client::{
    CallArgs, ChangeOrigin, ClientConfig, ConnectionState, ModelEvent, PropertyChange,
    SyncOutcome, Thermostat, ThermostatBuilder,
};
use thermo_core::PropertyValue;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

/// How long a one-shot command waits for the first connection
const CONNECT_WAIT: Duration = Duration::from_secs(10);

/// thermo - talk to a networked thermostat
#[derive(Parser)]
#[command(name = "thermo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Thermostat address (host or host:port)
    #[arg(short, long, global = true, env = "THERMO_ADDRESS")]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Per-call response timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the full device state
    State,

    /// Call a device method
    Call {
        /// Method name
        method: String,

        /// Parameters as JSON (array for positional, object for named)
        params: Option<String>,
    },

    /// Print one property
    Get {
        /// Property name
        property: String,
    },

    /// Change a property and wait for the device to confirm it
    Set {
        /// Property name
        property: String,

        /// New value (JSON, bare words are taken as text)
        value: String,
    },

    /// Print connection changes and property updates until Ctrl+C
    Watch,

    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs)?;

    let config = config::load(cli.config.as_deref())?;
    let config = config::with_overrides(config, cli.address, cli.timeout_ms)?;

    // Needs no connection
    if let Commands::Config { save } = cli.command {
        return show_config(&config, save, cli.config.as_deref());
    }

    let address = config.address.clone();
    let thermostat = ThermostatBuilder::from_config(config)
        .open()
        .await
        .context("Failed to start thermostat client")?;

    let result = match cli.command {
        Commands::Watch => watch(&thermostat).await,
        command => run_once(&thermostat, &address, command).await,
    };

    thermostat.close().await;
    result
}

fn show_config(config: &ClientConfig, save: bool, path: Option<&Path>) -> Result<()> {
    print!("{}", toml::to_string_pretty(config).context("Failed to serialize config")?);

    if save {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(config::default_config_file);
        config::save(config, &path)?;
        println!("{} Saved to {}", "OK".green().bold(), path.display());
    }
    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

async fn run_once(thermostat: &Thermostat, address: &str, command: Commands) -> Result<()> {
    thermostat
        .wait_connected(CONNECT_WAIT)
        .await
        .with_context(|| format!("Could not reach thermostat at {}", address))?;

    match command {
        Commands::State => {
            let state = thermostat.get_state().await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }

        Commands::Call { method, params } => {
            let args = match params {
                Some(raw) => CallArgs::from_json(
                    serde_json::from_str(&raw).context("Parameters must be valid JSON")?,
                ),
                None => CallArgs::None,
            };
            let result = thermostat.call(&method, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Get { property } => {
            // Local-only properties are not part of the device state
            let state = thermostat.get_state().await?;
            match state.get(&property) {
                Some(value) => println!("{}", value),
                None => println!("{}", thermostat.get(&property)?),
            }
        }

        Commands::Set { property, value } => {
            let value = parse_value(&value)?;
            let outcome = thermostat.set(&property, value.clone()).await?;
            let current = thermostat.get(&property)?;

            match outcome {
                SyncOutcome::Confirmed => {
                    println!("{} {} = {}", "OK".green().bold(), property.yellow(), current)
                }
                SyncOutcome::RolledBack { echoed } => {
                    let echoed = echoed
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "no answer".into());
                    bail!(
                        "Thermostat rejected {} = {} (reported {}), still {}",
                        property,
                        value,
                        echoed,
                        current
                    );
                }
                SyncOutcome::LocalOnly => {
                    println!("{} {} = {} (not synced)", "OK".yellow().bold(), property, current)
                }
            }
        }

        Commands::Watch => watch(thermostat).await?,

        Commands::Config { save } => show_config(thermostat.config(), save, None)?,
    }

    Ok(())
}

async fn watch(thermostat: &Thermostat) -> Result<()> {
    println!(
        "{} Watching {} (Ctrl+C to stop)",
        "thermo".cyan().bold(),
        thermostat.address().yellow()
    );

    let _state_sub = thermostat.on_connection_state_changed(|state| {
        let label = match state {
            ConnectionState::Connected => "connected".green(),
            ConnectionState::Connecting => "connecting".yellow(),
            ConnectionState::Disconnected => "disconnected".red(),
        };
        println!("{} {}", "STATE".cyan(), label);
    });

    let _change_sub = thermostat.subscribe(print_change);

    // Notifications that are not property updates only reach the listener
    thermostat.set_listener(|event| {
        if let ModelEvent::Notification(note) = event {
            if note.as_update().is_none() {
                println!("{} {}", "NOTE".cyan(), Value::Object(note.body().clone()));
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    info!("Received shutdown signal");
    thermostat.clear_listener();

    Ok(())
}

fn print_change(change: &PropertyChange) {
    let origin = match change.origin {
        ChangeOrigin::Local => "local".normal(),
        ChangeOrigin::Remote => "device".blue(),
        ChangeOrigin::Rollback => "rollback".red(),
    };
    println!(
        "{} {} = {} (was {}) [{}]",
        "SET".cyan(),
        change.name.yellow(),
        change.value,
        change.old,
        origin
    );
}

/// Parse a command-line value as JSON, taking anything unparseable as text
fn parse_value(raw: &str) -> Result<PropertyValue> {
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    match value {
        Value::Bool(b) => Ok(PropertyValue::Bool(b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(PropertyValue::Int(i)),
            None => n
                .as_f64()
                .map(PropertyValue::Float)
                .context("Number out of range"),
        },
        Value::String(s) => Ok(PropertyValue::Text(s)),
        other => bail!("Unsupported value: {}", other),
    }
}
