use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use std::time::Duration;

use crate::config::AppConfig;

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between refresh cycles
    #[arg(long, default_value_t = 60)]
    pub interval: u64,
}

pub async fn execute(config: &AppConfig, args: WatchArgs) -> Result<()> {
    let mut coordinator = super::build_coordinator(config)?;

    println!(
        "{}",
        format!(
            "Watching account value every {}s. Press Ctrl-C to stop.",
            args.interval
        )
        .bright_blue()
    );

    loop {
        match coordinator.refresh().await {
            Ok(snapshot) => {
                println!();
                super::print_snapshot(&snapshot);
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Refresh failed; will retry next interval");
            }
            Err(e) => return Err(e.into()),
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n{}", "Stopped.".yellow());
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(args.interval)) => {}
        }
    }

    Ok(())
}
