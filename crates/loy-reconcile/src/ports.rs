use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use loy_schemas::{AccrualReply, BalanceCredit, OrderUpdate, PendingOrder};

// ---------------------------------------------------------------------------
// Accrual port
// ---------------------------------------------------------------------------

/// Outcome of one accrual query that is not a failure.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    /// 200: the service has a verdict (possibly still in progress upstream).
    Received(AccrualReply),
    /// 204: the service has not registered this order yet; leave it untouched.
    NotYetKnown,
    /// 429: back-pressure. Ends the current tick; `retry_after_secs` is
    /// advisory only and is not honored precisely.
    RateLimited { retry_after_secs: Option<u64> },
}

/// Errors from the accrual adapter. A single failing order never aborts the
/// batch; the engine logs these and moves on.
#[derive(Debug)]
pub enum AccrualError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream answered with an unexpected status code (500 etc.).
    Api { status: u16 },
    /// A 200 body that could not be decoded.
    Decode(String),
}

impl fmt::Display for AccrualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccrualError::Transport(msg) => write!(f, "transport error: {msg}"),
            AccrualError::Api { status } => write!(f, "accrual api error status={status}"),
            AccrualError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for AccrualError {}

/// Read access to the external accrual service. Implementations are stateless
/// per call (GET semantics) and must not cache.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    async fn fetch(&self, number: &str) -> Result<FetchOutcome, AccrualError>;
}

// ---------------------------------------------------------------------------
// Storage port
// ---------------------------------------------------------------------------

/// The persistence contract the engine needs, and nothing more.
///
/// Batch operations are atomic from the caller's point of view: either every
/// listed row is committed or none is. That boundary lives inside the
/// implementation; the engine only calls each once per tick.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// All orders whose status is not yet terminal, in stable storage order.
    async fn list_unresolved(&self) -> Result<Vec<PendingOrder>>;

    /// Atomic batch status/accrual write.
    async fn update_orders(&self, updates: &[OrderUpdate]) -> Result<()>;

    /// Atomic batch balance credit. Callers only pass credits for orders that
    /// turned PROCESSED in this tick, which is what makes crediting
    /// exactly-once: a terminal order never re-enters `list_unresolved`.
    async fn credit_balances(&self, credits: &[BalanceCredit]) -> Result<()>;
}
