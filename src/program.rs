use std::env::current_dir;
use std::io::{self, IsTerminal};

use anyhow::{Context, Error};
use console::{style, Term};
use tracing::{info, trace, warn};

use crate::chan::{
    init_orchestrator, prompt_locator, resolve_locators, BatchSummary, Cli, ScrapeConfig,
    ThreadOutcome,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A program class that handles the flow of one archiver invocation.
pub(crate) struct Program {
    cli: Cli,
    config: ScrapeConfig,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(cli: Cli, config: ScrapeConfig) -> Self {
        Self { cli, config }
    }

    /// Runs the archiver. Per-thread failures are reported, not returned.
    pub(crate) async fn run(self) -> Result<(), Error> {
        Term::stdout().set_title("chan archiver");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        if let Ok(dir) = current_dir() {
            trace!("Program Working Directory: {}", dir.display());
        }

        let run = self.cli.run_config();
        let attachments_root = self.config.attachments_dir();
        let mut locators = resolve_locators(&run, &attachments_root)?;

        if run.is_empty() {
            if io::stdin().is_terminal() {
                locators.push(prompt_locator()?);
            } else {
                warn!("No thread locators given and stdin is not a terminal");
            }
        }

        if locators.is_empty() {
            info!("Nothing to scrape");
            println!("No threads to scrape.");
            return Ok(());
        }

        let orchestrator = init_orchestrator(&self.config)
            .context("Failed to set up the scraper")?
            .with_progress(io::stderr().is_terminal());

        let summary = orchestrator
            .run(&locators)
            .await
            .with_context(|| format!("Failed to update {}", orchestrator.failure_log().path().display()))?;

        print_summary(&summary);
        Ok(())
    }
}

fn print_summary(summary: &BatchSummary) {
    for (locator, outcome) in &summary.threads {
        let line = format!("{}: {}", locator, outcome);
        let styled = match outcome {
            ThreadOutcome::Completed(report) if report.fetch.failed.is_empty() => style(line).green(),
            ThreadOutcome::Completed(_) | ThreadOutcome::Skipped => style(line).yellow(),
            ThreadOutcome::MetadataUnavailable(_) | ThreadOutcome::Aborted(_) => style(line).red(),
        };
        println!("{}", styled);

        if let ThreadOutcome::Completed(report) = outcome {
            for failure in &report.fetch.failed {
                println!("    {} {}", style("failed").red(), failure.locator);
            }
        }
    }

    let elapsed = summary.finished_at - summary.started_at;
    println!(
        "\n{} {} threads completed, {} skipped, {} unavailable, {} aborted; {} attachments downloaded, {} failed ({}s)",
        style("Done.").bold(),
        summary.completed(),
        summary.skipped(),
        summary.unavailable(),
        summary.aborted(),
        summary.attachments_downloaded(),
        summary.attachments_failed(),
        elapsed.num_seconds()
    );
}
