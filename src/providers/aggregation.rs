use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::bar::DateRange;
use crate::core::provider::AggregationProvider;
use crate::providers::util::with_retry;

/// Client for the server-side `portfolio_returns` function.
pub struct HttpAggregationProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAggregationProvider {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("barline/0.1")
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Serialize, Debug)]
struct PortfolioReturnsRequest<'a> {
    tickers: &'a [String],
    weights: &'a [f64],
    start_date: NaiveDate,
    end_date: NaiveDate,
}

#[derive(Deserialize, Debug)]
struct PortfolioReturnRow {
    date: NaiveDate,
    portfolio_return: Option<f64>,
}

#[async_trait]
impl AggregationProvider for HttpAggregationProvider {
    #[instrument(name = "PortfolioReturnsRpc", skip(self, weights, range), fields(range = %range))]
    async fn portfolio_returns(
        &self,
        tickers: &[String],
        weights: &[f64],
        range: &DateRange,
    ) -> Result<Vec<(NaiveDate, f64)>> {
        let url = format!("{}/rpc/portfolio_returns", self.base_url);
        let body = PortfolioReturnsRequest {
            tickers,
            weights,
            start_date: range.start(),
            end_date: range.end(),
        };

        let response = with_retry(|| self.client.post(&url).json(&body).send(), 1, 250)
            .await
            .context("Aggregation request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("Aggregation HTTP error: {}", response.status()));
        }

        let rows: Vec<PortfolioReturnRow> = response
            .json()
            .await
            .context("Failed to parse aggregation response")?;
        debug!("Aggregation returned {} rows", rows.len());

        Ok(rows
            .into_iter()
            .filter_map(|row| row.portfolio_return.map(|r| (row.date, r)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bar::test_support::date;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_portfolio_returns_rows() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/portfolio_returns"))
            .and(body_json(json!({
                "tickers": ["AAA", "BBB"],
                "weights": [0.6, 0.4],
                "start_date": "2024-01-01",
                "end_date": "2024-01-31"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"date": "2024-01-02", "portfolio_return": 0.006},
                {"date": "2024-01-03", "portfolio_return": null},
                {"date": "2024-01-04", "portfolio_return": 0.016}
            ])))
            .mount(&mock_server)
            .await;

        let provider = HttpAggregationProvider::new(&mock_server.uri());
        let range = DateRange::new(date("2024-01-01"), date("2024-01-31")).unwrap();
        let rows = provider
            .portfolio_returns(&["AAA".to_string(), "BBB".to_string()], &[0.6, 0.4], &range)
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![(date("2024-01-02"), 0.006), (date("2024-01-04"), 0.016)]
        );
    }

    #[tokio::test]
    async fn test_portfolio_returns_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc/portfolio_returns"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let provider = HttpAggregationProvider::new(&mock_server.uri());
        let range = DateRange::new(date("2024-01-01"), date("2024-01-31")).unwrap();
        let err = provider
            .portfolio_returns(&["AAA".to_string()], &[1.0], &range)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Aggregation HTTP error: 404 Not Found");
    }
}
