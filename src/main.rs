use anyhow::Result;
use barline::cli::setup::setup;
use barline::core::bar::MAX_LOOKBACK_DAYS;
use barline::core::log::init_logging;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for barline::AppCommand {
    fn from(cmd: Commands) -> barline::AppCommand {
        match cmd {
            Commands::Returns { portfolio, days } => barline::AppCommand::Returns { portfolio, days },
            Commands::Correlation { portfolio, tickers } => {
                barline::AppCommand::Correlation { portfolio, tickers }
            }
            Commands::Quote { tickers } => barline::AppCommand::Quote { tickers },
            Commands::Sync {
                portfolio,
                tickers,
                days,
            } => barline::AppCommand::Sync {
                portfolio,
                tickers,
                days,
            },
            Commands::Watch {
                portfolio,
                days,
                interval,
            } => barline::AppCommand::Watch {
                portfolio,
                days,
                interval_secs: interval,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

fn days_in_range() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(1..=i64::from(MAX_LOOKBACK_DAYS))
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Display the weighted daily return series of a portfolio
    Returns {
        /// Portfolio name, defaults to the first configured one
        #[arg(short, long)]
        portfolio: Option<String>,
        /// Trading days to look back
        #[arg(short, long, default_value_t = 30, value_parser = days_in_range())]
        days: u32,
    },
    /// Display the pairwise correlation matrix
    Correlation {
        #[arg(short, long, conflicts_with = "tickers")]
        portfolio: Option<String>,
        /// Comma-separated tickers instead of a portfolio
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,
    },
    /// Display latest quotes
    Quote {
        /// Tickers to quote, defaults to the first portfolio's holdings
        tickers: Vec<String>,
    },
    /// Fetch bars from the provider into the local store
    Sync {
        #[arg(short, long, conflicts_with = "tickers")]
        portfolio: Option<String>,
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,
        #[arg(short, long, default_value_t = 252, value_parser = days_in_range())]
        days: u32,
    },
    /// Keep syncing and print the portfolio value whenever new bars arrive
    Watch {
        #[arg(short, long)]
        portfolio: Option<String>,
        #[arg(short, long, default_value_t = 30, value_parser = days_in_range())]
        days: u32,
        /// Seconds between syncs
        #[arg(short, long, default_value_t = 300)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => barline::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
