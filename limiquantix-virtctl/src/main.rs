//! # limiquantix virtctl
//!
//! Operator CLI over `limiquantix-virt`: inspect the host, manage domains
//! and secrets through a libvirt daemon, or against the in-memory daemon
//! with `--dev`.
//!
//! ## Usage
//! ```bash
//! limiquantix-virtctl --uri qemu:///system list --all
//! limiquantix-virtctl --dev define web-01.xml
//! ```

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use limiquantix_virt::{Connection, Connector, Driver, MockDriver};

mod cli;
mod commands;
mod config;

use cli::Args;
use commands::Output;
use config::{Config, DriverKind, DEFAULT_CONFIG_PATH};

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration; an explicit path must exist, the default may not
    let (config, source) = match &args.config {
        Some(path) => (Config::load(path)?, Some(path.display().to_string())),
        None => match Config::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => (cfg, Some(DEFAULT_CONFIG_PATH.to_string())),
            Err(_) => (Config::default(), None),
        },
    };
    let config = config.with_cli_overrides(&args);

    // Initialize logging
    limiquantix_common::init_logging_with(config.logging.format, &config.logging.level)?;

    match source {
        Some(path) => info!(config_path = %path, "Configuration loaded"),
        None => info!("No config file found, using CLI arguments and defaults"),
    }

    let connector = Connector::new(driver(config.driver)?).with_config(config.connection.clone());
    info!(
        driver = %connector.driver_name(),
        uri = %connector.default_uri(),
        "Connecting"
    );

    let conn = connector.open_default()?;
    let result = execute(&conn, &args);

    if let Err(e) = conn.close() {
        warn!(error = %e, "Failed to close connection");
    }

    if let Err(ref e) = result {
        error!(error = %e, "Command failed");
    }
    result
}

fn execute(conn: &Connection, args: &Args) -> Result<()> {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    commands::run(conn, &args.command, &mut Output::new(args.json, &mut lock))
}

fn driver(kind: DriverKind) -> Result<Arc<dyn Driver>> {
    match kind {
        DriverKind::Mock => {
            info!("Using mock driver (development mode)");
            Ok(Arc::new(MockDriver::new()))
        }
        #[cfg(feature = "libvirt")]
        DriverKind::Libvirt => Ok(Arc::new(limiquantix_virt::LibvirtDriver::new())),
        #[cfg(not(feature = "libvirt"))]
        DriverKind::Libvirt => anyhow::bail!("built without libvirt support; rebuild with --features libvirt or use --dev"),
    }
}
