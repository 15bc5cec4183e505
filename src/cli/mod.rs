//! CLI module for ordertools
//!
//! Argument parsing with clap and a structured command pattern: each
//! subcommand lives in `commands/` with its own `Args` struct and `execute`
//! function.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use commands::cancel::CancelArgs;
use commands::orders::OrdersArgs;
use commands::refresh::RefreshArgs;
use commands::sell::SellArgs;
use commands::watch::WatchArgs;

use crate::config::AppConfig;
use crate::logging;

#[derive(Parser)]
#[command(name = "ordertools")]
#[command(version)]
#[command(about = "Track holdings and open orders, ranked by potential account value", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use the sandbox environment
    #[arg(long, global = true)]
    pub sandbox: bool,

    /// Optional YAML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Optional log file (console logging is always on)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one refresh cycle and print the ranked valuation table
    Refresh(RefreshArgs),

    /// Refresh repeatedly until Ctrl-C
    Watch(WatchArgs),

    /// Run one refresh cycle and list the open orders
    Orders(OrdersArgs),

    /// Cancel all open orders for a currency
    Cancel(CancelArgs),

    /// Market-sell the entire free balance of a currency
    Sell(SellArgs),
}

impl Cli {
    /// Resolve the effective configuration, including the sandbox override
    fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if self.sandbox {
            config.rest_url = "https://api-sandbox.coinbase.com".to_string();
            config.ws_url = "wss://advanced-trade-ws-sandbox.coinbase.com".to_string();
        }
        Ok(config)
    }

    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        logging::init_logging(self.verbose, self.log_file.as_deref())?;
        let config = self.load_config()?;

        match self.command {
            Commands::Refresh(args) => commands::refresh::execute(&config, args).await,
            Commands::Watch(args) => commands::watch::execute(&config, args).await,
            Commands::Orders(args) => commands::orders::execute(&config, args).await,
            Commands::Cancel(args) => commands::cancel::execute(&config, args).await,
            Commands::Sell(args) => commands::sell::execute(&config, args).await,
        }
    }
}
