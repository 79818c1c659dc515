//! Logging setup for the CLI.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, filter::Targets, fmt, prelude::*};

/// Dependencies kept at WARN even in verbose mode.
const QUIET_TARGETS: [&str; 4] = ["fjall", "lsm_tree", "hyper_util", "reqwest"];

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the level
/// picked from `verbose`.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let targets = QUIET_TARGETS.iter().fold(
        Targets::new()
            .with_default(LevelFilter::WARN)
            .with_target("barline", level),
        |targets, target| targets.with_target(*target, LevelFilter::WARN),
    );

    let registry = tracing_subscriber::registry().with(
        fmt::layer()
            .pretty()
            .without_time()
            .with_target(verbose),
    );
    let result = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => registry.with(env_filter).try_init(),
        Err(_) => registry.with(targets).try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}
