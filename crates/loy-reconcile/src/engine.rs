use std::collections::BTreeMap;
use std::sync::Arc;

use loy_schemas::{luhn, AccrualStatus, BalanceCredit, OrderStatus, OrderUpdate, UserId};
use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::ports::{AccrualSource, FetchOutcome, OrderStore};

/// Map an accrual-service status onto the persisted order status.
///
/// REGISTERED and PROCESSING both mean "keep polling"; PROCESSED and INVALID
/// are terminal.
pub fn map_status(status: AccrualStatus) -> OrderStatus {
    match status {
        AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
        AccrualStatus::Processed => OrderStatus::Processed,
        AccrualStatus::Invalid => OrderStatus::Invalid,
    }
}

/// What one tick did. Returned for logging and assertions, then discarded:
/// the engine carries nothing between ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Accrual queries issued this tick.
    pub polled: usize,
    /// 204 responses: orders the upstream has not registered yet.
    pub not_ready: usize,
    /// Orders skipped on a per-order failure (transport, 5xx, bad body).
    pub skipped: usize,
    /// Rows in the committed status batch (0 when the batch failed or was empty).
    pub updates: usize,
    /// Rows in the committed credit batch.
    pub credits: usize,
    /// The tick ended early on a 429.
    pub rate_limited: bool,
}

impl TickReport {
    pub fn polled_anything(&self) -> bool {
        self.polled > 0
    }
}

/// The per-tick reconciliation engine. Holds its two ports and nothing else.
pub struct ReconcileEngine {
    store: Arc<dyn OrderStore>,
    accrual: Arc<dyn AccrualSource>,
}

impl ReconcileEngine {
    pub fn new(store: Arc<dyn OrderStore>, accrual: Arc<dyn AccrualSource>) -> Self {
        Self { store, accrual }
    }

    /// Run one reconciliation pass.
    ///
    /// Never returns an error: every failure mode is logged and resolved by
    /// the next scheduled tick re-reading the unresolved set.
    pub async fn run_tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let pending = match self.store.list_unresolved().await {
            Ok(pending) => pending,
            Err(err) => {
                error!(error = %format!("{err:#}"), "unresolved-order scan failed; tick abandoned");
                return report;
            }
        };
        if pending.is_empty() {
            return report;
        }

        // Working set for this tick only. Owner rides along so PROCESSED
        // results can be turned into credits after the status batch commits.
        let mut resolved: Vec<(OrderUpdate, UserId)> = Vec::new();

        for order in &pending {
            // Intake is the enforcing boundary for the checksum; a bad stored
            // number is an intake bug. Still poll it: the accrual service
            // answers INVALID and the order resolves terminally instead of
            // being re-polled forever.
            if !luhn::is_valid(&order.number) {
                warn!(number = %order.number, "stored order number fails checksum");
            }

            let outcome = self.accrual.fetch(&order.number).await;
            report.polled += 1;

            match outcome {
                Ok(FetchOutcome::Received(reply)) => {
                    let accrual = reply.accrual.unwrap_or(Decimal::ZERO);
                    if accrual.is_sign_negative() {
                        error!(
                            number = %order.number,
                            %accrual,
                            "negative accrual from upstream; order skipped"
                        );
                        report.skipped += 1;
                        continue;
                    }
                    resolved.push((
                        OrderUpdate {
                            number: order.number.clone(),
                            status: map_status(reply.status),
                            accrual,
                        },
                        order.owner,
                    ));
                }
                Ok(FetchOutcome::NotYetKnown) => {
                    report.not_ready += 1;
                }
                Ok(FetchOutcome::RateLimited { retry_after_secs }) => {
                    warn!(
                        retry_after_secs,
                        "accrual service rate-limited; ending tick early"
                    );
                    report.rate_limited = true;
                    break;
                }
                Err(err) => {
                    warn!(number = %order.number, error = %err, "accrual query failed; order skipped");
                    report.skipped += 1;
                }
            }
        }

        if resolved.is_empty() {
            return report;
        }

        let updates: Vec<OrderUpdate> = resolved.iter().map(|(u, _)| u.clone()).collect();
        if let Err(err) = self.store.update_orders(&updates).await {
            error!(
                rows = updates.len(),
                error = %format!("{err:#}"),
                "batch status write failed; tick abandoned, retried next cycle"
            );
            return report;
        }
        report.updates = updates.len();

        // One credit row per owner per tick. Per-order exactly-once holds
        // because an order enters this set only in the tick that marks it
        // PROCESSED, and terminal orders never reappear in step 1.
        let mut per_owner: BTreeMap<UserId, Decimal> = BTreeMap::new();
        for (update, owner) in &resolved {
            if update.status == OrderStatus::Processed && update.accrual > Decimal::ZERO {
                *per_owner.entry(*owner).or_default() += update.accrual;
            }
        }
        let credits: Vec<BalanceCredit> = per_owner
            .into_iter()
            .map(|(owner, amount)| BalanceCredit { owner, amount })
            .collect();

        if !credits.is_empty() {
            if let Err(err) = self.store.credit_balances(&credits).await {
                // The status batch is already committed, so this cannot be
                // replayed from a fresh unresolved scan. Loud log, not retry.
                error!(
                    rows = credits.len(),
                    error = %format!("{err:#}"),
                    "batch balance credit failed after status commit"
                );
                return report;
            }
            report.credits = credits.len();
        }

        report
    }
}
