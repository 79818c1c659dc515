pub mod correlation;
pub mod quote;
pub mod returns;
pub mod setup;
pub mod sync;
pub mod ui;
pub mod watch;

use crate::core::bar::normalize_tickers;
use crate::core::config::AppConfig;
use anyhow::{Result, bail};

/// Explicit tickers win; otherwise the tickers of the named (or first) portfolio.
pub fn resolve_tickers(
    config: &AppConfig,
    portfolio: Option<&str>,
    tickers: &[String],
) -> Result<Vec<String>> {
    let resolved = if tickers.is_empty() {
        normalize_tickers(&config.portfolio(portfolio)?.tickers())
    } else {
        normalize_tickers(tickers)
    };
    if resolved.is_empty() {
        bail!("No tickers to work with");
    }
    Ok(resolved)
}
