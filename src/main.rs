//! replinit - Idempotent MongoDB Replica Set Bootstrapper
//!
//! Initiates a replica set on a fresh mongod, and does nothing on a node
//! that is already configured.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mongodb::bson::{Bson, Document};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replinit::bootstrap::{bootstrap, BootstrapOptions};
use replinit::config::{BootstrapConfig, CheckPolicy, LoggingConfig};
use replinit::error::{Error, Result};
use replinit::node::{MongoNode, ReplicaSetAdmin};

/// replinit - Idempotent MongoDB Replica Set Bootstrapper
#[derive(Parser)]
#[command(name = "replinit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target node address (host:port), overrides node.address
    #[arg(short, long)]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides logging.level
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initiate the replica set unless the node is already configured
    Run {
        /// Treat any error during the configuration check as "not initiated"
        #[arg(long)]
        lenient: bool,

        /// Do not wait for the node to become primary
        #[arg(long)]
        no_wait: bool,
    },

    /// Print the node's current replica set configuration
    Check,

    /// Write a configuration file template
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "replinit.toml")]
        output: PathBuf,

        /// Node address to write into the template
        #[arg(long, default_value = "mongo_db_node_01:27017")]
        node: String,

        /// Replica set name to write into the template
        #[arg(long, default_value = "docker-replicaset")]
        set_name: String,
    },

    /// Validate configuration file
    Validate,

    /// Show the effective configuration and the initiate document
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match cli.command {
        Commands::Init { .. } => None,
        _ => Some(load_config(cli.config.as_ref(), cli.address.as_deref())),
    };

    // Initialize logging
    let logging = loaded
        .as_ref()
        .and_then(|r| r.as_ref().ok())
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging);

    let config = match loaded {
        Some(Ok(c)) => Some(c),
        Some(Err(e)) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e);
        }
        None => None,
    };

    match (cli.command, config) {
        (Commands::Init { output, node, set_name }, _) => run_init(output, node, set_name),
        (Commands::Run { lenient, no_wait }, Some(config)) => {
            run_bootstrap(config, lenient, no_wait).await
        }
        (Commands::Check, Some(config)) => run_check(config).await,
        (Commands::Validate, Some(config)) => run_validate(&config, cli.config.as_ref()),
        (Commands::Info, Some(config)) => run_info(&config),
        (_, None) => Err(Error::Internal("configuration was not loaded".into())),
    }
}

/// Load the config file (or defaults) and apply command line overrides
fn load_config(path: Option<&PathBuf>, address: Option<&str>) -> Result<BootstrapConfig> {
    let mut config = BootstrapConfig::load(path)?;
    if let Some(address) = address {
        config.node.address = address.to_string();
        config.node.uri = None;
        config.validate()?;
    }
    Ok(config)
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Bootstrap the replica set
async fn run_bootstrap(config: BootstrapConfig, lenient: bool, no_wait: bool) -> Result<()> {
    let mut options = BootstrapOptions::from(&config.bootstrap);
    if lenient {
        options.check_policy = CheckPolicy::Lenient;
    }
    if no_wait {
        options.wait_for_primary = false;
    }

    tracing::info!(
        "Bootstrapping replica set '{}' on {}",
        config.replica_set.id,
        config.display_address()
    );

    let node = MongoNode::connect(&config).await?;
    let result = bootstrap(&node, &config.replica_set, options).await;
    node.close().await;

    match result {
        Ok(outcome) => {
            tracing::info!("Bootstrap finished: {}", outcome);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Bootstrap failed: {}", e);
            Err(e)
        }
    }
}

/// Print the current replica set configuration
async fn run_check(config: BootstrapConfig) -> Result<()> {
    let node = MongoNode::connect(&config).await?;
    let result = node.current_config().await;
    node.close().await;

    match result {
        Ok(current) => {
            println!("{}", to_pretty_json(current)?);
            Ok(())
        }
        Err(Error::NotInitiated) => {
            eprintln!("✗ Replica set on {} is not initiated", config.display_address());
            Err(Error::NotInitiated)
        }
        Err(e) => {
            eprintln!("✗ Failed to read replica set configuration: {}", e);
            Err(e)
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf, node: String, set_name: String) -> Result<()> {
    let config_content = format!(r#"# replinit Configuration
# Generated configuration file

[node]
address = "{node}"
# uri = "mongodb://admin:changeme@{node}/?authSource=admin"
direct_connection = true
connect_timeout_secs = 10
server_selection_timeout_secs = 30
app_name = "replinit"

[replica_set]
id = "{set_name}"

[[replica_set.members]]
id = 0
host = "{node}"
# priority = 1.0
# votes = 1

[bootstrap]
# strict: only a "not initiated" answer triggers initiation
# lenient: any error during the check triggers initiation
check_policy = "strict"
check_attempts = 5
retry_backoff_ms = 500
max_backoff_ms = 8000
wait_for_primary = true
primary_timeout_secs = 60
poll_interval_ms = 500

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("Then bootstrap with: replinit --config {} run", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config: &BootstrapConfig, path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(p) => println!("✓ Configuration is valid: {}", p.display()),
        None => println!("✓ Built-in configuration is valid"),
    }
    println!("  Node:         {}", config.display_address());
    println!("  Replica Set:  {}", config.replica_set.id);
    println!("  Members:      {}", config.replica_set.members.len());
    println!("  Check Policy: {}", config.bootstrap.check_policy);
    Ok(())
}

/// Show the effective configuration
fn run_info(config: &BootstrapConfig) -> Result<()> {
    println!("replinit Configuration");
    println!("======================");
    println!();
    println!("Node:");
    println!("  Address:            {}", config.display_address());
    println!("  Direct Connection:  {}", config.node.direct_connection);
    println!("  Connect Timeout:    {:?}", config.connect_timeout());
    println!("  Selection Timeout:  {:?}", config.server_selection_timeout());
    println!();
    println!("Bootstrap:");
    println!("  Check Policy:       {}", config.bootstrap.check_policy);
    println!("  Check Attempts:     {}", config.bootstrap.check_attempts);
    println!("  Wait For Primary:   {}", config.bootstrap.wait_for_primary);
    println!("  Primary Timeout:    {} s", config.bootstrap.primary_timeout_secs);
    println!();
    println!("replSetInitiate document:");
    println!("{}", to_pretty_json(config.replica_set.to_document())?);

    Ok(())
}

fn to_pretty_json(document: Document) -> Result<String> {
    let value = Bson::Document(document).into_relaxed_extjson();
    serde_json::to_string_pretty(&value).map_err(|e| Error::Internal(e.to_string()))
}
