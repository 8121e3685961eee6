//! HTTP adapter for the external accrual service.
//!
//! One endpoint is consumed: `GET {base}/api/orders/{number}`.
//!
//! Status-code contract:
//! - 200 → decoded [`AccrualReply`]; an undecodable body is a decode error
//! - 204 → the service has not registered the order yet
//! - 429 → back-pressure; `Retry-After` is surfaced but advisory
//! - anything else (500 included) and transport failures → [`AccrualError`]
//!
//! No caching, no retries: each call is a stateless GET. Retry policy lives
//! with the caller's tick cadence, not here.

use async_trait::async_trait;
use loy_reconcile::{AccrualError, AccrualSource, FetchOutcome};
use loy_schemas::AccrualReply;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use tracing::debug;

/// reqwest-backed accrual reader.
#[derive(Clone, Debug)]
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualClient {
    /// `base_url` with or without a trailing slash, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn order_url(&self, number: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }

    /// Query the accrual verdict for one order number.
    pub async fn fetch_order(&self, number: &str) -> Result<FetchOutcome, AccrualError> {
        let url = self.order_url(number);
        debug!(%url, "querying accrual service");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AccrualError::Transport(e.to_string()))?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| AccrualError::Transport(e.to_string()))?;
                decode_reply(&body).map(FetchOutcome::Received)
            }
            StatusCode::NO_CONTENT => Ok(FetchOutcome::NotYetKnown),
            StatusCode::TOO_MANY_REQUESTS => Ok(FetchOutcome::RateLimited {
                retry_after_secs: retry_after_secs(resp.headers()),
            }),
            other => Err(AccrualError::Api {
                status: other.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl AccrualSource for AccrualClient {
    async fn fetch(&self, number: &str) -> Result<FetchOutcome, AccrualError> {
        self.fetch_order(number).await
    }
}

/// Decode a 200 body. Split out of the transport path so the wire shape is
/// testable without a server.
pub fn decode_reply(body: &[u8]) -> Result<AccrualReply, AccrualError> {
    serde_json::from_slice(body).map_err(|e| AccrualError::Decode(e.to_string()))
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use loy_schemas::AccrualStatus;

    #[test]
    fn order_url_joins_and_strips_trailing_slash() {
        let client = AccrualClient::new("http://localhost:8080/");
        assert_eq!(
            client.order_url("12345678903"),
            "http://localhost:8080/api/orders/12345678903"
        );

        let client = AccrualClient::new("http://accrual.internal:8080");
        assert_eq!(
            client.order_url("42"),
            "http://accrual.internal:8080/api/orders/42"
        );
    }

    #[test]
    fn decode_reply_accepts_the_documented_shape() {
        let reply =
            decode_reply(br#"{"order":"12345678903","status":"PROCESSED","accrual":500}"#).unwrap();
        assert_eq!(reply.status, AccrualStatus::Processed);
        assert!(reply.accrual.is_some());
    }

    #[test]
    fn decode_reply_rejects_garbage() {
        let err = decode_reply(b"not json at all").unwrap_err();
        assert!(matches!(err, AccrualError::Decode(_)));
    }

    #[test]
    fn retry_after_parses_integer_seconds_only() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(RETRY_AFTER, "60".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), Some(60));

        // HTTP-date form is allowed upstream; we treat it as absent.
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after_secs(&headers), None);

        assert_eq!(retry_after_secs(&reqwest::header::HeaderMap::new()), None);
    }
}
