//! loy-reconcile
//!
//! Order reconciliation core.
//!
//! Architectural decisions:
//! - All IO behind injected ports: `OrderStore` (persistence) and
//!   `AccrualSource` (the external accrual service). No globals.
//! - One tick = fetch unresolved orders, poll accrual per order, one atomic
//!   batch status write, one atomic batch balance credit.
//! - 204 leaves an order untouched; 429 ends the tick early but keeps what
//!   was already collected; a 5xx or transport failure skips one order only.
//! - Ticks never overlap; shutdown lets the in-flight tick finish.
//! - No cross-tick state: every tick starts from a fresh unresolved scan.

mod engine;
mod ports;
mod scheduler;

pub use engine::{map_status, ReconcileEngine, TickReport};
pub use ports::{AccrualError, AccrualSource, FetchOutcome, OrderStore};
pub use scheduler::{ReconcileScheduler, SchedulerHandle};
