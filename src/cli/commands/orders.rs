use anyhow::Result;
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Table};
use owo_colors::OwoColorize;

use crate::config::AppConfig;
use crate::types::Side;

#[derive(Args)]
pub struct OrdersArgs {
    /// Only show orders for this currency
    pub currency: Option<String>,
}

pub async fn execute(config: &AppConfig, args: OrdersArgs) -> Result<()> {
    let mut coordinator = super::build_coordinator(config)?;
    coordinator.refresh().await?;

    let mut open = coordinator.open_orders();
    if let Some(currency) = &args.currency {
        let currency = currency.to_uppercase();
        open.retain(|o| o.product.base == currency);
    }
    open.sort_by(|a, b| a.created_at.cmp(&b.created_at));

    if open.is_empty() {
        println!("{}", "No open orders found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} open orders:", open.len()).bright_green()
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Order ID", "Product", "Side", "Price", "Remaining", "Created",
    ]);

    for order in &open {
        let order_id = if order.id.len() > 12 {
            format!("{}...", &order.id[..12])
        } else {
            order.id.clone()
        };
        let side = match order.side {
            Side::Buy => "BUY".bright_green().to_string(),
            Side::Sell => "SELL".bright_red().to_string(),
        };
        let price = order
            .limit_price
            .map(|p| format!("${}", p))
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(order_id),
            Cell::new(order.product.to_string()),
            Cell::new(side),
            Cell::new(price).set_alignment(CellAlignment::Right),
            Cell::new(order.remaining_quantity.to_string()).set_alignment(CellAlignment::Right),
            Cell::new(order.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!("{table}");
    Ok(())
}
