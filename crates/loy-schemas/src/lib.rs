//! loy-schemas
//!
//! Shared domain types for the loyalty backend:
//! - order numbers and their Luhn well-formedness check
//! - order / balance / withdrawal rows as persisted
//! - the accrual service reply shape
//!
//! Type-only crate. No IO, no async, no globals.

pub mod luhn;

mod number;
mod types;

pub use number::{InvalidOrderNumber, OrderNumber};
pub use types::*;
