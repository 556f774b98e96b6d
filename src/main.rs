//! sermatec - Command-line client for Sermatec hybrid solar inverters
//!
//! Connects to one inverter, runs a single command and prints the result.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use sermatec_client::{Client, Config};
use sermatec_protocol::Protocol;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sermatec")]
#[command(about = "Query and configure Sermatec hybrid solar inverters")]
#[command(version)]
struct Cli {
    /// Inverter hostname or IP address (defaults to SERMATEC_HOST)
    host: Option<String>,

    /// Inverter API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Print protocol debug output
    #[arg(short, long)]
    verbose: bool,

    /// PCU version to assume instead of asking the inverter
    #[arg(long)]
    pcu_version: Option<u32>,

    /// JSON protocol description replacing the bundled one
    #[arg(long)]
    protocol_file: Option<PathBuf>,

    /// YAML translation table replacing the bundled one
    #[arg(long)]
    translations: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query data by command name
    Get {
        /// Command short name (e.g. batteryStatus)
        name: String,
    },

    /// Configure a parameter
    Set {
        /// Parameter tag (see `list switches|numbers|selects`)
        tag: String,

        /// New value
        value: String,
    },

    /// List supported sensors and parameters
    List {
        #[arg(value_enum)]
        kind: ListKind,
    },

    /// Query the inverter with a custom command code
    Customget {
        /// Single-byte command, decimal or 0x-prefixed hex
        #[arg(value_parser = commands::parse_command_code)]
        code: u8,

        /// Print the response bytes instead of decoding them
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    Sensors,
    Binarysensors,
    Switches,
    Numbers,
    Selects,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = Config::load().map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if let Some(host) = cli.host {
        config.connection.host = Some(host);
    }
    if let Some(port) = cli.port {
        config.connection.port = port;
    }
    if let Some(path) = cli.protocol_file {
        config.protocol.schema_file = Some(path);
    }
    if let Some(path) = cli.translations {
        config.protocol.translations_file = Some(path);
    }

    match &config.protocol.schema_file {
        Some(path) => tracing::info!("Using protocol file {}", path.display()),
        None => tracing::debug!("Using bundled protocol description"),
    }
    let protocol = Protocol::load(
        config.protocol.schema_file.as_deref(),
        config.protocol.translations_file.as_deref(),
        &config.protocol.language,
    )
    .map_err(|e| {
        tracing::error!("Failed to load protocol description: {}", e);
        e
    })?;
    let connection = config.connection_config()?;
    let addr = connection.addr();
    let client = Client::new(connection, Arc::new(protocol));

    eprintln!("{} {}...", "Connecting to".dimmed(), addr.cyan());
    if let Err(e) = client.connect(cli.pcu_version).await {
        tracing::error!("Failed to connect to {}: {}", addr, e);
        eprintln!("{}: {}", "Connection failed".red(), e);
        std::process::exit(1);
    }
    eprintln!(
        "{} (PCU version {})",
        "Connected".green(),
        client.version().to_string().yellow()
    );

    let result = commands::execute(&client, cli.command).await;
    client.disconnect().await;
    tracing::debug!("Disconnected from {}", addr);

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
