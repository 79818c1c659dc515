use crate::core::bar::{Allocation, DateRange};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Portfolio {
    pub name: String,
    pub allocations: Vec<Allocation>,
}

impl Portfolio {
    pub fn tickers(&self) -> Vec<String> {
        self.allocations.iter().map(|a| a.ticker.clone()).collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct YahooProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AggregationProviderConfig {
    pub base_url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub yahoo: Option<YahooProviderConfig>,
    #[serde(default)]
    pub aggregation: Option<AggregationProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            yahoo: Some(YahooProviderConfig {
                base_url: "https://query1.finance.yahoo.com".to_string(),
            }),
            aggregation: None,
        }
    }
}

/// Tuning knobs for tiered retrieval and analytics.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tickers per persistent-store query.
    pub store_batch_size: usize,
    /// Stored rows required before a ticker is served from the store.
    pub min_bars: usize,
    /// Fraction of expected trading days required from the store, on top of `min_bars`.
    pub completeness_ratio: f64,
    /// Pause between consecutive remote fetches.
    pub api_delay_ms: u64,
    pub cache_ttl_secs: u64,
    pub quote_ttl_secs: u64,
    pub correlation_period_days: u32,
    pub correlation_write_through: bool,
    pub notional_base: f64,
    pub write_back_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            store_batch_size: 10,
            min_bars: 20,
            completeness_ratio: 0.0,
            api_delay_ms: 250,
            cache_ttl_secs: 900,
            quote_ttl_secs: 60,
            correlation_period_days: 252,
            correlation_write_through: true,
            notional_base: 100_000.0,
            write_back_capacity: 64,
        }
    }
}

impl PipelineConfig {
    /// Rows the store must hold for `range` before its data is trusted.
    ///
    /// Never more than the range can hold, so short ranges stay servable.
    pub fn completeness_threshold(&self, range: &DateRange) -> usize {
        let expected = range.expected_trading_days();
        let floor = self.min_bars.min(expected);
        let proportional = (expected as f64 * self.completeness_ratio).ceil() as usize;
        floor.max(proportional).max(1)
    }

    pub fn api_delay(&self) -> Duration {
        Duration::from_millis(self.api_delay_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }

    pub fn quote_ttl(&self) -> Duration {
        Duration::from_secs(self.quote_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub portfolios: Vec<Portfolio>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "barline", "barline")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "barline", "barline")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn yahoo_base_url(&self) -> &str {
        self.providers
            .yahoo
            .as_ref()
            .map_or("https://query1.finance.yahoo.com", |p| &p.base_url)
    }

    /// Named portfolio, or the first one when `name` is `None`.
    pub fn portfolio(&self, name: Option<&str>) -> Result<&Portfolio> {
        match name {
            Some(name) => self
                .portfolios
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .with_context(|| format!("Portfolio not found: {name}")),
            None => self
                .portfolios
                .first()
                .context("No portfolios defined in configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bar::WeightUnit;
    use crate::core::bar::test_support::date;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
portfolios:
  - name: "Core"
    allocations:
      - ticker: "AAPL"
        weight: 60
      - ticker: "MSFT"
        weight: 40
  - name: "Bonds"
    allocations:
      - ticker: "BND"
        weight: 1.0
        unit: fraction
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.portfolios.len(), 2);
        assert_eq!(config.portfolios[0].name, "Core");
        assert_eq!(config.portfolios[0].tickers(), vec!["AAPL", "MSFT"]);
        assert_eq!(config.portfolios[0].allocations[0].unit, None);
        assert_eq!(
            config.portfolios[1].allocations[0].unit,
            Some(WeightUnit::Fraction)
        );

        assert!(config.providers.yahoo.is_some());
        assert!(config.providers.aggregation.is_none());
        assert_eq!(config.pipeline.store_batch_size, 10);
        assert_eq!(config.pipeline.min_bars, 20);
        assert_eq!(config.pipeline.correlation_period_days, 252);
        assert_eq!(config.pipeline.notional_base, 100_000.0);
    }

    #[test]
    fn test_config_with_providers_and_pipeline() {
        let yaml_str = r#"
portfolios: []
providers:
  yahoo:
    base_url: "http://example.com/yahoo"
  aggregation:
    base_url: "http://example.com/rpc"
pipeline:
  api_delay_ms: 0
  min_bars: 5
data_path: "/tmp/barline"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(config.yahoo_base_url(), "http://example.com/yahoo");
        assert_eq!(
            config.providers.aggregation.unwrap().base_url,
            "http://example.com/rpc"
        );
        assert_eq!(config.pipeline.api_delay_ms, 0);
        assert_eq!(config.pipeline.min_bars, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.pipeline.store_batch_size, 10);
        assert_eq!(config.data_path.as_deref(), Some("/tmp/barline"));
    }

    #[test]
    fn test_completeness_threshold() {
        let config = PipelineConfig::default();
        let year = DateRange::new(date("2024-01-01"), date("2024-12-31")).unwrap();
        assert_eq!(config.completeness_threshold(&year), 20);

        // One trading week can never hold 20 bars
        let week = DateRange::new(date("2024-01-01"), date("2024-01-05")).unwrap();
        assert_eq!(config.completeness_threshold(&week), 5);

        let proportional = PipelineConfig {
            completeness_ratio: 0.5,
            ..PipelineConfig::default()
        };
        let expected = year.expected_trading_days();
        assert_eq!(
            proportional.completeness_threshold(&year),
            (expected as f64 * 0.5).ceil() as usize
        );
    }

    #[test]
    fn test_portfolio_lookup() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
portfolios:
  - name: "Growth"
    allocations: []
  - name: "Income"
    allocations: []
"#,
        )
        .unwrap();
        assert_eq!(config.portfolio(None).unwrap().name, "Growth");
        assert_eq!(config.portfolio(Some("income")).unwrap().name, "Income");
        assert!(config.portfolio(Some("missing")).is_err());
    }
}
