//! Command implementations

pub mod cancel;
pub mod orders;
pub mod refresh;
pub mod sell;
pub mod watch;

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Table};
use owo_colors::OwoColorize;
use std::sync::Arc;

use crate::auth_env::ApiCredentials;
use crate::config::AppConfig;
use crate::core::coordinator::{RefreshConfig, RefreshCoordinator};
use crate::core::valuation::PotentialValueSnapshot;
use crate::exchange::{RestClient, RestConfig};
use crate::ws::{WsClient, WsConfig};

/// Wire up the coordinator against the real transport and REST provider
pub fn build_coordinator(config: &AppConfig) -> Result<RefreshCoordinator> {
    let credentials = ApiCredentials::from_env()?;

    let feed = WsClient::new(
        WsConfig {
            url: config.ws_url.clone(),
            ..Default::default()
        },
        credentials.clone(),
    );
    let rest = RestClient::new(
        RestConfig {
            base_url: config.rest_url.clone(),
            page_limit: config.page_limit,
            request_timeout_secs: config.request_timeout_secs,
        },
        credentials,
    )?;

    Ok(RefreshCoordinator::new(
        Box::new(feed),
        Arc::new(rest),
        RefreshConfig {
            channel: config.channel.clone(),
            settle_secs: config.settle_secs,
        },
    ))
}

/// Build the signed REST client for the destructive action commands
pub fn build_rest_client(config: &AppConfig) -> Result<RestClient> {
    let credentials = ApiCredentials::from_env()?;
    Ok(RestClient::new(
        RestConfig {
            base_url: config.rest_url.clone(),
            page_limit: config.page_limit,
            request_timeout_secs: config.request_timeout_secs,
        },
        credentials,
    )?)
}

/// Print the ranked valuation table and the account total
pub fn print_snapshot(snapshot: &PotentialValueSnapshot) {
    if snapshot.rows.is_empty() {
        println!("{}", "No holdings or open orders found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Currency",
        "Current Value",
        "Potential Gain",
        "Open Orders",
    ]);

    for row in &snapshot.rows {
        table.add_row(vec![
            Cell::new(&row.currency),
            Cell::new(format!("${}", row.current_value.round_dp(2)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("${}", row.potential_gain.round_dp(2)))
                .set_alignment(CellAlignment::Right),
            Cell::new(row.open_orders).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("{table}");
    println!(
        "{} {}",
        "Total potential value:".bright_white(),
        format!("${}", snapshot.total.round_dp(2)).bright_green()
    );
}
