//! Market data domain types: tickers, bars, series and date ranges.

use crate::core::error::PipelineError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;

/// Canonical form of a ticker symbol: trimmed and uppercase.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Normalizes a ticker list, dropping blanks and duplicates while keeping the
/// first-seen order.
pub fn normalize_tickers<S: AsRef<str>>(tickers: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .iter()
        .map(|t| normalize_ticker(t.as_ref()))
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// One OHLCV record for a ticker on a single trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vwap: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_return: Option<f64>,
}

/// Tier a series was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    Cache,
    Store,
    Api,
}

impl Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                DataSource::Cache => "cache",
                DataSource::Store => "store",
                DataSource::Api => "api",
            }
        )
    }
}

/// Longest lookback, in trading days, that [`DateRange::lookback`] honors.
pub const MAX_LOOKBACK_DAYS: u32 = 25_200;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidInput(format!(
                "range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A range ending at `end` wide enough to hold roughly `trading_days`
    /// sessions, plus a week of slack for holidays.
    ///
    /// `trading_days` is capped at [`MAX_LOOKBACK_DAYS`] and the start
    /// saturates at the earliest representable date.
    pub fn lookback(end: NaiveDate, trading_days: u32) -> Self {
        let calendar_days = i64::from(trading_days.min(MAX_LOOKBACK_DAYS)) * 365 / 252 + 7;
        let start = Duration::try_days(calendar_days)
            .and_then(|span| end.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of weekdays in the range.
    pub fn expected_trading_days(&self) -> usize {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .count()
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A per-request view of one ticker's bars. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSeries {
    pub ticker: String,
    pub bars: Vec<Bar>,
    pub source: DataSource,
    /// First and last bar dates, `None` for an empty series.
    pub data_range: Option<DateRange>,
    pub last_updated: DateTime<Utc>,
}

impl TickerSeries {
    /// Builds a series from bars that are already sanitized.
    pub fn new(ticker: &str, bars: Vec<Bar>, source: DataSource) -> Self {
        let data_range = match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some(DateRange {
                start: first.date,
                end: last.date,
            }),
            _ => None,
        };
        Self {
            ticker: ticker.to_string(),
            bars,
            source,
            data_range,
            last_updated: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: DataSource) -> Self {
        self.source = source;
        self
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// `(date, daily_return)` pairs for every bar carrying a return.
    pub fn returns(&self) -> Vec<(NaiveDate, f64)> {
        self.bars
            .iter()
            .filter_map(|b| b.daily_return.map(|r| (b.date, r)))
            .collect()
    }
}

/// Clips bars to `range`, sorts them ascending, removes duplicate dates (the
/// last occurrence wins) and fills in missing daily returns from the prior close.
pub fn sanitize_bars(mut bars: Vec<Bar>, range: &DateRange) -> Vec<Bar> {
    bars.retain(|b| range.contains(b.date) && b.close.is_finite());
    // Stable sort keeps input order within a date, so dedup keeps the last one.
    bars.sort_by_key(|b| b.date);
    let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match deduped.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => deduped.push(bar),
        }
    }

    let mut prev_close: Option<f64> = None;
    for bar in deduped.iter_mut() {
        if bar.daily_return.is_none()
            && let Some(prev) = prev_close
            && prev > 0.0
        {
            bar.daily_return = Some(bar.close / prev - 1.0);
        }
        prev_close = Some(bar.close);
    }
    deduped
}

/// Inferred or declared unit of an allocation weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Fraction,
    Percent,
}

/// A ticker plus its portfolio weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub ticker: String,
    pub weight: f64,
    #[serde(default)]
    pub unit: Option<WeightUnit>,
}

impl Allocation {
    pub fn new(ticker: &str, weight: f64) -> Self {
        Self {
            ticker: ticker.to_string(),
            weight,
            unit: None,
        }
    }
}

/// Weighted portfolio return and value series.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PortfolioReturnSeries {
    pub dates: Vec<NaiveDate>,
    pub returns: Vec<f64>,
    pub values: Vec<f64>,
}

impl PortfolioReturnSeries {
    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Cumulative return over the whole series.
    pub fn total_return(&self) -> Option<f64> {
        match (self.values.first(), self.values.last()) {
            (Some(first), Some(last)) if self.values.len() > 1 && *first != 0.0 => {
                Some(last / first - 1.0)
            }
            _ => None,
        }
    }
}

/// Symmetric pairwise correlation matrix over `tickers`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub tickers: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Identity matrix over `tickers`.
    pub fn identity(tickers: Vec<String>) -> Self {
        let n = tickers.len();
        let values = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self { tickers, values }
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.tickers.iter().position(|t| t == a)?;
        let j = self.tickers.iter().position(|t| t == b)?;
        Some(self.values[i][j])
    }

    /// Sets both `(i, j)` and `(j, i)`.
    pub fn set_pair(&mut self, i: usize, j: usize, value: f64) {
        self.values[i][j] = value;
        self.values[j][i] = value;
    }
}

/// Latest quote for a ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: f64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub currency: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One persisted pairwise correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub ticker_a: String,
    pub ticker_b: String,
    pub period_days: u32,
    pub correlation: f64,
}
