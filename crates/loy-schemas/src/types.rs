use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque owner identity issued by the account collaborator.
pub type UserId = i64;

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an order as persisted: NEW → PROCESSING → {PROCESSED, INVALID}.
///
/// PROCESSED and INVALID are terminal; terminal orders are excluded from
/// reconciliation forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(UnknownStatus {
                status: other.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

/// A status string read back from storage (or a peer) that we do not model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownStatus {
    pub status: String,
}

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown order status: {:?}", self.status)
    }
}

impl std::error::Error for UnknownStatus {}

// ---------------------------------------------------------------------------
// Accrual service reply
// ---------------------------------------------------------------------------

/// Processing state reported by the external accrual service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

/// Decoded 200 body of `GET /api/orders/{number}` on the accrual service.
///
/// `accrual` is present only once the upstream has computed a reward; absent
/// means zero as far as the order table is concerned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccrualReply {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Persisted rows and batch-write shapes
// ---------------------------------------------------------------------------

/// The slice of an order the reconciliation engine works from: its number and
/// who gets credited if it resolves to PROCESSED.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOrder {
    pub number: String,
    pub owner: UserId,
}

/// One row of the per-tick batch status write.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderUpdate {
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Decimal,
}

/// One row of the per-tick batch balance credit.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceCredit {
    pub owner: UserId,
    pub amount: Decimal,
}

/// Full order row as returned to the user-facing listing API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRow {
    pub number: String,
    #[serde(skip_serializing, default)]
    pub owner: UserId,
    pub status: OrderStatus,
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

/// Per-user loyalty balance. `current` only ever grows through reconciliation
/// credits and shrinks through withdrawals; it never goes negative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// A recorded withdrawal against an order number.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}
