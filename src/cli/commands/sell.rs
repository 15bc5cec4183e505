use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use crate::config::AppConfig;
use crate::core::traits::TradeActions;

#[derive(Args)]
pub struct SellArgs {
    /// Currency to liquidate, e.g. BTC
    pub currency: String,

    /// Confirm the market sell
    #[arg(long)]
    pub yes: bool,
}

pub async fn execute(config: &AppConfig, args: SellArgs) -> Result<()> {
    let currency = args.currency.to_uppercase();
    if !args.yes {
        println!(
            "{}",
            format!(
                "⚠️  This market-sells your entire free {} balance. Use --yes to confirm.",
                currency
            )
            .yellow()
        );
        return Ok(());
    }

    let client = super::build_rest_client(config)?;
    client.market_sell_all(&currency).await?;

    println!(
        "{}",
        format!("✅ Market sell submitted for {}.", currency).bright_green()
    );
    Ok(())
}
