use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::core::bar::{Bar, DateRange, Quote, normalize_ticker};
use crate::core::provider::{BarProvider, QuoteProvider};
use crate::providers::util::with_retry;

const RETRIES: usize = 3;
const RETRY_DELAY_MS: u64 = 500;

fn day_start_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Daily bars and quotes from the Yahoo Finance chart and quote endpoints.
pub struct YahooFinanceProvider {
    base_url: String,
    client: reqwest::Client,
}

impl YahooFinanceProvider {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("barline/0.1")
            .build()
            .unwrap_or_default();
        YahooFinanceProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, label: &str) -> Result<T> {
        debug!("Requesting {}", url);
        let response = with_retry(|| self.client.get(url).send(), RETRIES, RETRY_DELAY_MS)
            .await
            .with_context(|| format!("Request error for {label}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {} for {}", response.status(), label));
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse JSON response for {label}"))
    }

    async fn fetch_chart(&self, ticker: &str, query: &str) -> Result<ChartItem> {
        let url = format!("{}/v8/finance/chart/{}?{}", self.base_url, ticker, query);
        let data: ChartResponse = self.get_json(&url, &format!("symbol: {ticker}")).await?;
        if let Some(error) = data.chart.error {
            return Err(anyhow!(
                "Provider error for symbol {}: {}",
                ticker,
                error.description.unwrap_or(error.code)
            ));
        }
        data.chart
            .result
            .and_then(|items| items.into_iter().next())
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", ticker))
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    currency: Option<String>,
    chart_previous_close: Option<f64>,
    regular_market_time: Option<i64>,
    /// Exchange offset from UTC in seconds.
    gmtoffset: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<QuoteIndicator>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteIndicator {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<f64>>>,
}

fn value_at(values: &Option<Vec<Option<f64>>>, index: usize) -> Option<f64> {
    values.as_ref().and_then(|v| v.get(index).copied().flatten())
}

/// Converts a chart item into bars, skipping sessions without a close.
fn extract_bars(ticker: &str, item: &ChartItem) -> Vec<Bar> {
    let (Some(timestamps), Some(quote)) = (
        item.timestamp.as_ref(),
        item.indicators.as_ref().and_then(|i| i.quote.first()),
    ) else {
        return Vec::new();
    };
    // Session dates are exchange-local
    let offset = item.meta.gmtoffset.unwrap_or_default();

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let close = value_at(&quote.close, i)?;
            let date = DateTime::from_timestamp(ts.checked_add(offset)?, 0)?.date_naive();
            Some(Bar {
                ticker: ticker.to_string(),
                date,
                open: value_at(&quote.open, i).unwrap_or(close),
                high: value_at(&quote.high, i).unwrap_or(close),
                low: value_at(&quote.low, i).unwrap_or(close),
                close,
                volume: value_at(&quote.volume, i).unwrap_or_default(),
                vwap: None,
                daily_return: None,
            })
        })
        .collect()
}

#[async_trait]
impl BarProvider for YahooFinanceProvider {
    #[instrument(name = "YahooBarFetch", skip(self, ticker, range), fields(ticker = %ticker, range = %range))]
    async fn fetch_bars(&self, ticker: &str, range: &DateRange) -> Result<Vec<Bar>> {
        let ticker = normalize_ticker(ticker);
        let query = format!(
            "period1={}&period2={}&interval=1d&events=history",
            day_start_timestamp(range.start()),
            day_start_timestamp(range.end() + Duration::days(1)),
        );
        let item = self.fetch_chart(&ticker, &query).await?;
        let bars = extract_bars(&ticker, &item);
        debug!("Fetched {} bars for {}", bars.len(), ticker);
        Ok(bars)
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QuoteEnvelope {
    quote_response: QuoteResponse,
}

#[derive(Deserialize, Debug)]
struct QuoteResponse {
    result: Vec<QuoteItem>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QuoteItem {
    symbol: String,
    regular_market_price: Option<f64>,
    regular_market_change: Option<f64>,
    regular_market_change_percent: Option<f64>,
    regular_market_time: Option<i64>,
    currency: Option<String>,
}

fn timestamp_or_now(ts: Option<i64>) -> DateTime<Utc> {
    ts.and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl QuoteProvider for YahooFinanceProvider {
    #[instrument(name = "YahooQuoteFetch", skip(self, ticker), fields(ticker = %ticker))]
    async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        let ticker = normalize_ticker(ticker);
        let item = self.fetch_chart(&ticker, "interval=1d&range=1d").await?;
        let price = item
            .meta
            .regular_market_price
            .ok_or_else(|| anyhow!("No market price for symbol: {}", ticker))?;

        let (change, change_percent) = match item.meta.chart_previous_close {
            Some(prev) if prev > 0.0 => (Some(price - prev), Some((price - prev) / prev * 100.0)),
            _ => (None, None),
        };

        Ok(Quote {
            ticker,
            price,
            change,
            change_percent,
            currency: item.meta.currency,
            timestamp: timestamp_or_now(item.meta.regular_market_time),
        })
    }

    #[instrument(name = "YahooBatchQuoteFetch", skip(self, tickers), fields(count = tickers.len()))]
    async fn fetch_quotes(&self, tickers: &[String]) -> Result<HashMap<String, Quote>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }
        let symbols = tickers
            .iter()
            .map(|t| normalize_ticker(t))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/v7/finance/quote?symbols={}", self.base_url, symbols);
        let data: QuoteEnvelope = self.get_json(&url, &format!("symbols: {symbols}")).await?;

        let quotes = data
            .quote_response
            .result
            .into_iter()
            .filter_map(|item| {
                let price = item.regular_market_price?;
                let ticker = normalize_ticker(&item.symbol);
                Some((
                    ticker.clone(),
                    Quote {
                        ticker,
                        price,
                        change: item.regular_market_change,
                        change_percent: item.regular_market_change_percent,
                        currency: item.currency,
                        timestamp: timestamp_or_now(item.regular_market_time),
                    },
                ))
            })
            .collect();
        Ok(quotes)
    }
}
