//! HTTP client for the accrual authority.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument, warn};

use loyalty_common::{parse_retry_after, OrderNumber};

use crate::error::{AccrualError, AccrualResult};
use crate::provider::AccrualProvider;
use crate::report::AccrualReport;

/// Talks to `GET {base_url}/api/orders/{number}`.
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    client: reqwest::Client,
    base_url: String,
    default_retry_after: Duration,
}

impl HttpAccrualClient {
    /// Create a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AccrualResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AccrualError::Config(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(AccrualError::Config("accrual address is empty".into()));
        }

        Ok(Self {
            client,
            base_url,
            default_retry_after: loyalty_common::constants::default_retry_after(),
        })
    }

    /// Suspension used when a 429 reply carries no usable `Retry-After`.
    pub fn with_default_retry_after(mut self, interval: Duration) -> Self {
        self.default_retry_after = interval;
        self
    }

    /// The base address of the authority.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }
}

/// Turn an authority reply into a report or an error.
pub fn interpret(
    number: &OrderNumber,
    status: u16,
    retry_after: Option<&str>,
    body: &[u8],
    default_retry_after: Duration,
) -> AccrualResult<AccrualReport> {
    match status {
        200 => serde_json::from_slice(body).map_err(|e| AccrualError::Decode(e.to_string())),
        204 => Err(AccrualError::NotRegistered(number.to_string())),
        429 => Err(AccrualError::RateLimited {
            retry_after: retry_after
                .and_then(parse_retry_after)
                .unwrap_or(default_retry_after),
        }),
        other => Err(AccrualError::UnexpectedStatus(other)),
    }
}

fn transport_error(err: reqwest::Error) -> AccrualError {
    if err.is_timeout() {
        AccrualError::Timeout
    } else {
        AccrualError::Network(err.to_string())
    }
}

#[async_trait]
impl AccrualProvider for HttpAccrualClient {
    fn name(&self) -> &str {
        "HTTP"
    }

    #[instrument(skip(self), fields(number = %number))]
    async fn fetch(&self, number: &OrderNumber) -> AccrualResult<AccrualReport> {
        let response = self
            .client
            .get(self.order_url(number))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(transport_error)?;

        let result = interpret(
            number,
            status,
            retry_after.as_deref(),
            &body,
            self.default_retry_after,
        );
        match &result {
            Ok(report) => debug!(status = ?report.status, "Accrual report received"),
            Err(e) => warn!(http_status = status, error = %e, "Accrual call failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AccrualStatus;
    use rust_decimal_macros::dec;

    fn number() -> OrderNumber {
        OrderNumber::from_trusted("12345678903")
    }

    const DEFAULT: Duration = Duration::from_secs(60);

    #[test]
    fn test_interpret_ok() {
        let body = br#"{"order":"12345678903","status":"PROCESSED","accrual":500}"#;
        let report = interpret(&number(), 200, None, body, DEFAULT).unwrap();
        assert_eq!(report.status, AccrualStatus::Processed);
        assert_eq!(report.accrual, Some(dec!(500)));
    }

    #[test]
    fn test_interpret_not_registered() {
        assert_eq!(
            interpret(&number(), 204, None, b"", DEFAULT),
            Err(AccrualError::NotRegistered("12345678903".into()))
        );
    }

    #[test]
    fn test_interpret_rate_limited() {
        let err = interpret(&number(), 429, Some("5"), b"", DEFAULT).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));

        let err = interpret(&number(), 429, Some("later"), b"", DEFAULT).unwrap_err();
        assert_eq!(err.retry_after(), Some(DEFAULT));

        let err = interpret(&number(), 429, None, b"", DEFAULT).unwrap_err();
        assert_eq!(err.retry_after(), Some(DEFAULT));
    }

    #[test]
    fn test_interpret_failures() {
        assert_eq!(
            interpret(&number(), 500, None, b"", DEFAULT),
            Err(AccrualError::UnexpectedStatus(500))
        );
        assert!(matches!(
            interpret(&number(), 200, None, b"not json", DEFAULT),
            Err(AccrualError::Decode(_))
        ));
    }

    #[test]
    fn test_client_url() {
        let client =
            HttpAccrualClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(
            client.order_url(&number()),
            "http://localhost:8080/api/orders/12345678903"
        );
        assert!(HttpAccrualClient::new("", Duration::from_secs(1)).is_err());
    }
}
