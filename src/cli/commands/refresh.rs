use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::config::AppConfig;

#[derive(Args)]
pub struct RefreshArgs {
    /// Print the snapshot as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(config: &AppConfig, args: RefreshArgs) -> Result<()> {
    let mut coordinator = super::build_coordinator(config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.set_message(format!(
        "Ingesting order events ({}s settling window)...",
        config.settle_secs
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = coordinator.refresh().await;
    spinner.finish_and_clear();
    let snapshot = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        super::print_snapshot(&snapshot);
        let stats = coordinator.stats();
        if stats.malformed > 0 {
            tracing::warn!(
                malformed = stats.malformed,
                "Some order events were dropped as malformed"
            );
        }
    }

    Ok(())
}
