//! The accrual adapter against a real HTTP server (httpmock): one test per
//! documented upstream response.

use std::str::FromStr;

use httpmock::prelude::*;
use loy_accrual::AccrualClient;
use loy_reconcile::{AccrualError, FetchOutcome};
use loy_schemas::AccrualStatus;
use rust_decimal::Decimal;

#[tokio::test]
async fn ok_with_accrual_decodes_to_received() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"order":"12345678903","status":"PROCESSED","accrual":729.98}"#);
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let outcome = client.fetch_order("12345678903").await.unwrap();

    mock.assert_async().await;
    match outcome {
        FetchOutcome::Received(reply) => {
            assert_eq!(reply.order, "12345678903");
            assert_eq!(reply.status, AccrualStatus::Processed);
            assert_eq!(reply.accrual, Some(Decimal::from_str("729.98").unwrap()));
        }
        other => panic!("expected Received, got {other:?}"),
    }
}

#[tokio::test]
async fn ok_without_accrual_field_still_decodes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/79927398713");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"order":"79927398713","status":"REGISTERED"}"#);
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let outcome = client.fetch_order("79927398713").await.unwrap();

    match outcome {
        FetchOutcome::Received(reply) => {
            assert_eq!(reply.status, AccrualStatus::Registered);
            assert_eq!(reply.accrual, None);
        }
        other => panic!("expected Received, got {other:?}"),
    }
}

#[tokio::test]
async fn no_content_maps_to_not_yet_known() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(204);
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let outcome = client.fetch_order("12345678903").await.unwrap();

    assert_eq!(outcome, FetchOutcome::NotYetKnown);
}

#[tokio::test]
async fn too_many_requests_surfaces_advisory_retry_after() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(429).header("Retry-After", "60");
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let outcome = client.fetch_order("12345678903").await.unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::RateLimited {
            retry_after_secs: Some(60)
        }
    );
}

#[tokio::test]
async fn too_many_requests_without_header_is_still_rate_limited() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(429);
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let outcome = client.fetch_order("12345678903").await.unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::RateLimited {
            retry_after_secs: None
        }
    );
}

#[tokio::test]
async fn server_error_is_an_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(500);
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let err = client.fetch_order("12345678903").await.unwrap_err();

    assert!(matches!(err, AccrualError::Api { status: 500 }));
}

#[tokio::test]
async fn malformed_200_body_is_a_decode_error_not_a_panic() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/12345678903");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"order":"12345678903","status":"HALF-DONE"}"#);
        })
        .await;

    let client = AccrualClient::new(server.base_url());
    let err = client.fetch_order("12345678903").await.unwrap_err();

    assert!(matches!(err, AccrualError::Decode(_)));
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    // Nothing listens on this port.
    let client = AccrualClient::new("http://127.0.0.1:9");
    let err = client.fetch_order("12345678903").await.unwrap_err();

    assert!(matches!(err, AccrualError::Transport(_)));
}
