//! loy-db
//!
//! PostgreSQL adapter: the reconciliation engine's `OrderStore` port plus the
//! surrounding operations the loyalty service needs (user provisioning, order
//! intake, balance read, withdrawals).
//!
//! Conventions:
//! - plain `sqlx::query` + binds, `Context` on every await
//! - monetary columns are NUMERIC, bound as `rust_decimal::Decimal`
//! - "no rows" is an outcome (`Option`, outcome enums), never folded into the
//!   error channel; an `Err` always means the query itself failed

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use loy_reconcile::OrderStore;
use loy_schemas::{
    Balance, BalanceCredit, OrderNumber, OrderRow, OrderStatus, OrderUpdate, PendingOrder, UserId,
    Withdrawal,
};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tracing::warn;

pub const ENV_DB_URL: &str = "LOY_DATABASE_URL";

/// Connect to Postgres using LOY_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Schema bootstrap
// ---------------------------------------------------------------------------

const CREATE_USERS: &str = r#"
create table if not exists users (
    id                 bigint primary key generated always as identity,
    login              varchar(200) not null unique,
    balance_current    numeric(20, 4) not null default 0 check (balance_current >= 0),
    balance_withdrawn  numeric(20, 4) not null default 0
)
"#;

const CREATE_ORDERS: &str = r#"
create table if not exists orders (
    number       varchar(64) primary key,
    user_id      bigint not null references users (id),
    status       varchar(16) not null default 'NEW',
    accrual      numeric(20, 4) not null default 0,
    uploaded_at  timestamptz not null default now()
)
"#;

const CREATE_ORDERS_UNRESOLVED_IDX: &str = r#"
create index if not exists orders_unresolved_idx
    on orders (uploaded_at)
    where status in ('NEW', 'PROCESSING')
"#;

const CREATE_WITHDRAWALS: &str = r#"
create table if not exists withdrawals (
    number        varchar(64) primary key,
    user_id       bigint not null references users (id),
    sum           numeric(20, 4) not null,
    processed_at  timestamptz not null default now()
)
"#;

/// Create the tables and indexes if they do not exist. Idempotent; safe to
/// run on every startup. Not a migration system; the schema has one shape.
pub async fn bootstrap_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await.context("bootstrap begin failed")?;
    for statement in [
        CREATE_USERS,
        CREATE_ORDERS,
        CREATE_ORDERS_UNRESOLVED_IDX,
        CREATE_WITHDRAWALS,
    ] {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .context("bootstrap statement failed")?;
    }
    tx.commit().await.context("bootstrap commit failed")
}

// ---------------------------------------------------------------------------
// Outcome enums (no-rows/conflict cases are results, not errors)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateUserOutcome {
    Created(UserId),
    LoginTaken,
}

/// Intake triage for an order number, mirroring the service's 202/200/409 split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntakeOutcome {
    Accepted,
    AlreadyUploadedBySelf,
    AlreadyUploadedByAnother,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Applied,
    InsufficientFunds,
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// Cloneable handle over the pool. All mutation of reconciliation-owned
/// fields (order status/accrual, balance credits) goes through here.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Provision a user by login. Password/credential handling belongs to the
    /// account collaborator; this table only anchors ownership and balance.
    pub async fn create_user(&self, login: &str) -> Result<CreateUserOutcome> {
        let res = sqlx::query("insert into users (login) values ($1) returning id")
            .bind(login)
            .fetch_one(&self.pool)
            .await;

        match res {
            Ok(row) => Ok(CreateUserOutcome::Created(
                row.try_get::<i64, _>("id").context("users.id")?,
            )),
            Err(e) if is_unique_violation(&e) => Ok(CreateUserOutcome::LoginTaken),
            Err(e) => Err(anyhow::Error::new(e).context("create_user insert failed")),
        }
    }

    /// Accept a new order number for `owner` with status NEW.
    ///
    /// Race-free triage: the insert and the conflict check are one statement,
    /// so two concurrent submissions of the same number cannot both be
    /// Accepted.
    pub async fn submit_order(
        &self,
        owner: UserId,
        number: &OrderNumber,
    ) -> Result<IntakeOutcome> {
        let inserted = sqlx::query(
            r#"
            insert into orders (number, user_id, status, accrual)
            values ($1, $2, 'NEW', 0)
            on conflict (number) do nothing
            "#,
        )
        .bind(number.as_str())
        .bind(owner)
        .execute(&self.pool)
        .await
        .context("submit_order insert failed")?;

        if inserted.rows_affected() == 1 {
            return Ok(IntakeOutcome::Accepted);
        }

        let row = sqlx::query("select user_id from orders where number = $1")
            .bind(number.as_str())
            .fetch_one(&self.pool)
            .await
            .context("submit_order conflict lookup failed")?;
        let holder: i64 = row.try_get("user_id").context("orders.user_id")?;

        if holder == owner {
            Ok(IntakeOutcome::AlreadyUploadedBySelf)
        } else {
            Ok(IntakeOutcome::AlreadyUploadedByAnother)
        }
    }

    /// All orders uploaded by `owner`, oldest first.
    pub async fn orders_for_user(&self, owner: UserId) -> Result<Vec<OrderRow>> {
        let rows = sqlx::query(
            r#"
            select number, user_id, status, accrual, uploaded_at
            from orders
            where user_id = $1
            order by uploaded_at asc, number asc
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("orders_for_user query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let status: String = r.try_get("status").context("orders.status")?;
            out.push(OrderRow {
                number: r.try_get("number").context("orders.number")?,
                owner: r.try_get("user_id").context("orders.user_id")?,
                status: OrderStatus::parse(&status).map_err(|e| anyhow!(e))?,
                accrual: r.try_get("accrual").context("orders.accrual")?,
                uploaded_at: r.try_get("uploaded_at").context("orders.uploaded_at")?,
            });
        }
        Ok(out)
    }

    /// Current/withdrawn balance for `owner`; `None` means no such user,
    /// distinct from a failed query.
    pub async fn balance(&self, owner: UserId) -> Result<Option<Balance>> {
        let row = sqlx::query(
            "select balance_current, balance_withdrawn from users where id = $1",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .context("balance query failed")?;

        match row {
            Some(r) => Ok(Some(Balance {
                current: r.try_get("balance_current").context("users.balance_current")?,
                withdrawn: r
                    .try_get("balance_withdrawn")
                    .context("users.balance_withdrawn")?,
            })),
            None => Ok(None),
        }
    }

    /// Debit `sum` points against `order_number` for `owner`.
    ///
    /// The balance row is taken FOR UPDATE so a concurrent reconcile credit
    /// cannot be lost, and the `balance_current >= 0` check constraint backs
    /// up the explicit funds test.
    pub async fn withdraw(
        &self,
        owner: UserId,
        order_number: &OrderNumber,
        sum: Decimal,
    ) -> Result<WithdrawOutcome> {
        if sum <= Decimal::ZERO {
            return Err(anyhow!("withdrawal sum must be positive, got {sum}"));
        }

        let mut tx = self.pool.begin().await.context("withdraw begin failed")?;

        let row = sqlx::query("select balance_current from users where id = $1 for update")
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await
            .context("withdraw balance lock failed")?
            .ok_or_else(|| anyhow!("withdraw: unknown user {owner}"))?;
        let current: Decimal = row.try_get("balance_current").context("users.balance_current")?;

        if current < sum {
            // Dropping the transaction releases the row lock.
            return Ok(WithdrawOutcome::InsufficientFunds);
        }

        sqlx::query(
            r#"
            update users
            set balance_current = balance_current - $2,
                balance_withdrawn = balance_withdrawn + $2
            where id = $1
            "#,
        )
        .bind(owner)
        .bind(sum)
        .execute(&mut *tx)
        .await
        .context("withdraw debit failed")?;

        sqlx::query("insert into withdrawals (number, user_id, sum) values ($1, $2, $3)")
            .bind(order_number.as_str())
            .bind(owner)
            .bind(sum)
            .execute(&mut *tx)
            .await
            .context("withdraw record insert failed")?;

        tx.commit().await.context("withdraw commit failed")?;
        Ok(WithdrawOutcome::Applied)
    }

    /// Withdrawal history for `owner`, oldest first.
    pub async fn withdrawals_for_user(&self, owner: UserId) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            r#"
            select number, sum, processed_at
            from withdrawals
            where user_id = $1
            order by processed_at asc, number asc
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .context("withdrawals_for_user query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(Withdrawal {
                order: r.try_get("number").context("withdrawals.number")?,
                sum: r.try_get("sum").context("withdrawals.sum")?,
                processed_at: r
                    .try_get("processed_at")
                    .context("withdrawals.processed_at")?,
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// OrderStore port implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for PgStore {
    async fn list_unresolved(&self) -> Result<Vec<PendingOrder>> {
        let rows = sqlx::query(
            r#"
            select number, user_id
            from orders
            where status in ('NEW', 'PROCESSING')
            order by uploaded_at asc, number asc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list_unresolved query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(PendingOrder {
                number: r.try_get("number").context("orders.number")?,
                owner: r.try_get("user_id").context("orders.user_id")?,
            });
        }
        Ok(out)
    }

    async fn update_orders(&self, updates: &[OrderUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("update_orders begin failed")?;
        for u in updates {
            let res = sqlx::query("update orders set status = $1, accrual = $2 where number = $3")
                .bind(u.status.as_str())
                .bind(u.accrual)
                .bind(&u.number)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("update_orders failed for order {}", u.number))?;
            if res.rows_affected() == 0 {
                // An unresolved order vanished between scan and write. Orders
                // are never deleted, so this points at a bug upstream of us.
                warn!(number = %u.number, "update_orders matched no row");
            }
        }
        tx.commit().await.context("update_orders commit failed")
    }

    async fn credit_balances(&self, credits: &[BalanceCredit]) -> Result<()> {
        if credits.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("credit_balances begin failed")?;
        for c in credits {
            // The row-level lock taken by UPDATE serializes this against a
            // concurrent withdrawal's FOR UPDATE; neither write can be lost.
            let res = sqlx::query(
                "update users set balance_current = balance_current + $2 where id = $1",
            )
            .bind(c.owner)
            .bind(c.amount)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("credit_balances failed for user {}", c.owner))?;
            if res.rows_affected() == 0 {
                return Err(anyhow!("credit_balances: unknown user {}", c.owner));
            }
        }
        tx.commit().await.context("credit_balances commit failed")
    }
}

/// Detect a Postgres unique-constraint violation (SQLSTATE 23505).
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}
