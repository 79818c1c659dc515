pub mod cli;
pub mod core;
pub mod pipeline;
pub mod providers;
pub mod store;

use crate::core::config::AppConfig;
use crate::pipeline::Pipeline;
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

pub enum AppCommand {
    Returns {
        portfolio: Option<String>,
        days: u32,
    },
    Correlation {
        portfolio: Option<String>,
        tickers: Vec<String>,
    },
    Quote {
        tickers: Vec<String>,
    },
    Sync {
        portfolio: Option<String>,
        tickers: Vec<String>,
        days: u32,
    },
    Watch {
        portfolio: Option<String>,
        days: u32,
        interval_secs: u64,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("barline starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let pipeline = Pipeline::from_config(&config)?;
    let result = match command {
        AppCommand::Returns { portfolio, days } => {
            let portfolio = config.portfolio(portfolio.as_deref())?;
            cli::returns::run(&pipeline, portfolio, days).await
        }
        AppCommand::Correlation { portfolio, tickers } => {
            let tickers = cli::resolve_tickers(&config, portfolio.as_deref(), &tickers)?;
            cli::correlation::run(&pipeline, &tickers).await
        }
        AppCommand::Quote { tickers } => {
            let tickers = cli::resolve_tickers(&config, None, &tickers)?;
            cli::quote::run(&pipeline, &tickers).await
        }
        AppCommand::Sync {
            portfolio,
            tickers,
            days,
        } => {
            let tickers = cli::resolve_tickers(&config, portfolio.as_deref(), &tickers)?;
            cli::sync::run(&pipeline, &tickers, days).await
        }
        AppCommand::Watch {
            portfolio,
            days,
            interval_secs,
        } => {
            let portfolio = config.portfolio(portfolio.as_deref())?;
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            cli::watch::run(
                &pipeline,
                portfolio,
                days,
                Duration::from_secs(interval_secs.max(1)),
                shutdown,
            )
            .await
            .map(|recomputes| debug!("Watch stopped after {} recomputes", recomputes))
        }
    };

    pipeline.shutdown().await;
    result
}
