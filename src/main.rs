use std::env::consts::{ARCH, FAMILY, OS};

use anyhow::{Context, Error};
use clap::Parser;
use tracing::trace;

use crate::chan::{init_logger, Cli, ScrapeConfig};
use crate::program::Program;

mod chan;
mod program;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    if cli.write_default_config {
        ScrapeConfig::write_default(&cli.config)
            .with_context(|| format!("Failed to write {}", cli.config.display()))?;
        println!("Wrote default config to {}", cli.config.display());
        return Ok(());
    }

    let config = ScrapeConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    // Held until exit so buffered log lines are flushed
    let _logger = init_logger(&config.logging, &config.log_dir(), cli.verbose)
        .context("Failed to initialize logging")?;
    log_system_information();

    Program::new(cli, config).run().await
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
