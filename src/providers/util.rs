use anyhow::Error;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Whether a response status is worth retrying (rate limiting or server trouble).
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Retries an HTTP request on transport errors and retryable statuses.
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds between retry attempts
///
/// # Returns
/// The last response received, or the transport error after all attempts.
/// A retryable status on the final attempt is returned as-is for the caller
/// to report.
pub async fn with_retry<F, Fut>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<Response, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(response) if is_retryable(response.status()) && attempt <= retries => {
                debug!(
                    "Attempt {}/{} returned {}. Retrying...",
                    attempt,
                    retries,
                    response.status()
                );
            }
            Ok(response) => return Ok(response),
            Err(err) => {
                if attempt > retries {
                    return Err(err.into());
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
            }
        }
        attempt += 1;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/flaky", mock_server.uri());
        let response = with_retry(|| client.get(&url).send(), 3, 1).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/down", mock_server.uri());
        let response = with_retry(|| client.get(&url).send(), 2, 1).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/missing", mock_server.uri());
        let response = with_retry(|| client.get(&url).send(), 3, 1).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
