//! # Command Line Interface
//!
//! Drives one [`CredentialLifecycleManager`] per invocation: acquire a lease,
//! rotate a root credential, probe the datastore, inspect the broker, or
//! bootstrap the broker's database secrets engine.

pub mod output;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::config::AppConfig;
use crate::datastore::{Credential, TlsMode};
use crate::lifecycle::CredentialLifecycleManager;
use crate::observability::init_observability;
use crate::secrets::{DatastoreConnectionRequest, RoleRequest, SecretString, VaultBrokerClient};
use output::{OutputFormat, RotationView, StatusView};

#[derive(Parser)]
#[command(name = "leaseguard")]
#[command(about = "Lifecycle tooling for broker-issued database credentials")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (table or json)
    #[arg(short, long, global = true, default_value = "table")]
    pub output: OutputFormat,

    /// Broker address override (defaults to VAULT_ADDR)
    #[arg(long, global = true)]
    pub vault_addr: Option<String>,

    /// Datastore host override
    #[arg(long, global = true)]
    pub db_host: Option<String>,

    /// Datastore port override
    #[arg(long, global = true)]
    pub db_port: Option<u16>,

    /// Datastore TLS mode override
    #[arg(long, global = true)]
    pub sslmode: Option<TlsMode>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Acquire a lease for a role and print it
    Lease {
        role: String,

        /// Print the issued password
        #[arg(long)]
        show_secret: bool,

        /// Connect with the new lease after acquiring it
        #[arg(long)]
        verify: bool,
    },

    /// Rotate the root credential of a datastore connection
    Rotate {
        /// Datastore connection name (defaults to LEASEGUARD_DATASTORE)
        datastore: Option<String>,
    },

    /// Attempt a datastore connection with an explicit credential
    Probe {
        #[arg(long)]
        username: String,

        /// Environment variable holding the password
        #[arg(long, default_value = "LEASEGUARD_PROBE_PASSWORD")]
        password_env: String,
    },

    /// Show the broker's view of a datastore connection
    Status {
        /// Datastore connection name (defaults to LEASEGUARD_DATASTORE)
        datastore: Option<String>,
    },

    /// Mount the database engine, configure a datastore connection and write a role
    Bootstrap {
        /// Datastore connection name (defaults to LEASEGUARD_DATASTORE)
        #[arg(long)]
        datastore: Option<String>,

        /// Connection URL template, e.g. postgresql://{{username}}:{{password}}@db:5432/testdb
        #[arg(long)]
        connection_url: String,

        /// Root username the broker manages
        #[arg(long)]
        root_username: String,

        /// Environment variable holding the root password
        #[arg(long, default_value = "LEASEGUARD_ROOT_PASSWORD")]
        root_password_env: String,

        /// Role to create
        #[arg(long)]
        role: String,

        /// Creation statement (repeatable); defaults to a login role with DML grants
        #[arg(long = "creation-statement")]
        creation_statements: Vec<String>,

        /// Default lease TTL in seconds
        #[arg(long, default_value_t = 3600)]
        default_ttl: u64,

        /// Maximum lease TTL in seconds
        #[arg(long, default_value_t = 86400)]
        max_ttl: u64,
    },
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    if let Some(address) = cli.vault_addr {
        config.broker.address = address;
    }
    if let Some(host) = cli.db_host {
        config.endpoint.host = host;
    }
    if let Some(port) = cli.db_port {
        config.endpoint.port = port;
    }
    if let Some(mode) = cli.sslmode {
        config.endpoint.tls.mode = mode;
    }

    // Already installed (e.g. integration tests); keep going.
    let _ = init_observability(&config.observability);
    config.validate().context("Invalid configuration")?;
    crate::observability::log_config_info(&config);

    match cli.command {
        Commands::Lease { role, show_secret, verify } => {
            let clm = CredentialLifecycleManager::from_config(&config).await?;
            let lease = clm.acquire_lease(&role).await?;
            output::print_lease(&lease, show_secret, cli.output)?;
            if verify {
                let attempt = clm.connect(&lease, &config.endpoint).await;
                output::print_attempt(&attempt, cli.output)?;
                if !attempt.outcome.is_success() {
                    bail!("Lease credential was not accepted: {}", attempt.outcome);
                }
            }
        }
        Commands::Rotate { datastore } => {
            let datastore = datastore.unwrap_or_else(|| config.lifecycle.datastore.clone());
            let clm = CredentialLifecycleManager::from_config(&config).await?;
            let report = clm.rotate_root(&datastore).await?;
            // Leases issued by earlier invocations are unknown to this process
            // and would keep authenticating, so revoke them at the broker.
            let revoked_roles = clm.revoke_outstanding_leases(&datastore).await.with_context(|| {
                format!("Root of '{}' rotated, but outstanding leases were not revoked", datastore)
            })?;
            output::print_rotation(
                &RotationView::new(&report.receipt, &revoked_roles),
                cli.output,
            )?;
        }
        Commands::Probe { username, password_env } => {
            let password = std::env::var(&password_env)
                .with_context(|| format!("Environment variable {} is not set", password_env))?;
            let credential = Credential::new(username, SecretString::new(password));
            let clm = CredentialLifecycleManager::from_config(&config).await?;
            let attempt = clm.probe(&credential, &config.endpoint).await;
            output::print_attempt(&attempt, cli.output)?;
            if !attempt.outcome.is_success() {
                bail!("Probe did not succeed: {}", attempt.outcome);
            }
        }
        Commands::Status { datastore } => {
            let datastore = datastore.unwrap_or_else(|| config.lifecycle.datastore.clone());
            let broker = VaultBrokerClient::new(&config.broker)?;
            let health = broker.health().await?;
            let clm = CredentialLifecycleManager::from_config(&config).await?;
            let connection = clm.datastore_info(&datastore).await?;
            let local = clm.status(&datastore).await;
            output::print_status(
                &StatusView { broker: &health, connection: &connection, local: &local },
                cli.output,
            )?;
        }
        Commands::Bootstrap {
            datastore,
            connection_url,
            root_username,
            root_password_env,
            role,
            creation_statements,
            default_ttl,
            max_ttl,
        } => {
            let datastore = datastore.unwrap_or_else(|| config.lifecycle.datastore.clone());
            let root_password = std::env::var(&root_password_env).with_context(|| {
                format!("Environment variable {} is not set", root_password_env)
            })?;

            let broker = VaultBrokerClient::new(&config.broker)?;
            let mounted = broker.enable_database_engine().await?;

            let connection =
                DatastoreConnectionRequest::postgres(&datastore, connection_url, root_username, root_password)
                    .allow_role(&role);
            broker.configure_datastore(&connection).await?;

            let mut role_request = RoleRequest::new(&role, &datastore);
            if !creation_statements.is_empty() {
                role_request.creation_statements = creation_statements;
            }
            role_request.default_ttl = Duration::from_secs(default_ttl);
            role_request.max_ttl = Duration::from_secs(max_ttl);
            broker.write_role(&role_request).await?;

            println!(
                "Bootstrapped datastore '{}' with role '{}' (engine {})",
                datastore,
                role,
                if mounted { "mounted" } else { "already mounted" }
            );
        }
    }

    Ok(())
}
