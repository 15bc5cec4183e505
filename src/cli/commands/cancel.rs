use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use crate::config::AppConfig;
use crate::core::traits::TradeActions;

#[derive(Args)]
pub struct CancelArgs {
    /// Currency whose open orders should be cancelled, e.g. BTC
    pub currency: String,

    /// Confirm cancellation
    #[arg(long)]
    pub yes: bool,
}

pub async fn execute(config: &AppConfig, args: CancelArgs) -> Result<()> {
    let currency = args.currency.to_uppercase();
    if !args.yes {
        println!(
            "{}",
            format!(
                "⚠️  This cancels every open {} order. Use --yes to confirm.",
                currency
            )
            .yellow()
        );
        return Ok(());
    }

    let client = super::build_rest_client(config)?;
    let cancelled = client.cancel_orders(&currency).await?;

    if cancelled.is_empty() {
        println!("{}", format!("No open {} orders to cancel.", currency).yellow());
    } else {
        println!(
            "{}",
            format!("✅ Cancelled {} {} orders.", cancelled.len(), currency).bright_green()
        );
    }
    Ok(())
}
