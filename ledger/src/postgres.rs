//! PostgreSQL ledger store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use loyalty_common::{OperationType, OrderNumber, OrderStatus, Points, UserId};

use crate::balance::{Balance, BalanceProjector};
use crate::entry::{LedgerEntry, Transition};
use crate::error::{is_unique_violation, LedgerError, LedgerResult};
use crate::store::LedgerStore;
use crate::user::User;

/// Open a connection pool.
pub async fn connect(url: &str, max_connections: u32) -> LedgerResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;
    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn migrate(pool: &PgPool) -> LedgerResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Ledger schema is up to date");
    Ok(())
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: i64,
    number: String,
    user_id: i64,
    operation_type: String,
    status: String,
    amount: Decimal,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let operation = row
            .operation_type
            .parse::<OperationType>()
            .map_err(|e| LedgerError::Corrupt(format!("order {}: {e}", row.id)))?;
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| LedgerError::Corrupt(format!("order {}: {e}", row.id)))?;

        Ok(LedgerEntry {
            id: row.id,
            number: OrderNumber::from_trusted(row.number),
            user_id: UserId::new(row.user_id),
            operation,
            status,
            amount: Points::new(row.amount),
            uploaded_at: row.uploaded_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    login: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::new(row.id),
            login: row.login,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

fn decode_all(rows: Vec<OrderRow>) -> LedgerResult<Vec<LedgerEntry>> {
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

/// Ledger store backed by PostgreSQL.
///
/// Order uniqueness comes from the `(number, operation_type)` unique
/// constraint. Balance-affecting writes lock the owner's `users` row with
/// `SELECT ... FOR UPDATE` and re-project the balance before committing.
/// Settlement locks the order row first and the user row second; withdrawal
/// only locks the user row, so the two never wait on each other in a cycle.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> LedgerResult<()> {
        let locked: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id.get())
            .fetch_optional(&mut **tx)
            .await?;

        match locked {
            Some(_) => Ok(()),
            None => Err(LedgerError::NotFound(format!("user {user_id}"))),
        }
    }

    async fn project(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> LedgerResult<Balance> {
        let (current, withdrawn): (Decimal, Decimal) =
            sqlx::query_as(BalanceProjector::PROJECTION_SQL)
                .bind(user_id.get())
                .fetch_one(&mut **tx)
                .await?;

        Ok(Balance {
            current: Points::new(current),
            withdrawn: Points::new(withdrawn),
        })
    }

    async fn refresh_balance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> LedgerResult<Points> {
        let cached: Decimal = sqlx::query_scalar(BalanceProjector::REFRESH_SQL)
            .bind(user_id.get())
            .fetch_one(&mut **tx)
            .await?;
        Ok(Points::new(cached))
    }

    /// Explain why a guarded status update touched no rows.
    async fn classify_noop(&self, number: &OrderNumber) -> LedgerResult<Transition> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM orders WHERE number = $1 AND operation_type = 'ACCRUAL'",
        )
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let status = status
            .ok_or_else(|| LedgerError::NotFound(format!("order {number}")))?
            .parse::<OrderStatus>()
            .map_err(|e| LedgerError::Corrupt(e.to_string()))?;

        if status.is_final() {
            Ok(Transition::AlreadySettled(status))
        } else {
            Ok(Transition::Unchanged)
        }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    #[instrument(skip(self, password_hash))]
    async fn register_user(&self, login: &str, password_hash: &str) -> LedgerResult<UserId> {
        let result: Result<i64, sqlx::Error> =
            sqlx::query_scalar("INSERT INTO users (login, password_hash) VALUES ($1, $2) RETURNING id")
                .bind(login)
                .bind(password_hash)
                .fetch_one(&self.pool)
                .await;

        match result {
            Ok(id) => {
                info!(user_id = id, "User registered");
                Ok(UserId::new(id))
            }
            Err(e) if is_unique_violation(&e) => Err(LedgerError::DuplicateLogin(login.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_user_by_login(&self, login: &str) -> LedgerResult<User> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, login, password_hash, created_at FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::from)
            .ok_or_else(|| LedgerError::NotFound(format!("user {login:?}")))
    }

    async fn find_order(&self, number: &OrderNumber) -> LedgerResult<LedgerEntry> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, user_id, operation_type, status, amount, uploaded_at
            FROM orders
            WHERE number = $1 AND operation_type = 'ACCRUAL'
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| LedgerError::NotFound(format!("order {number}")))?
            .try_into()
    }

    #[instrument(skip(self), fields(number = %number))]
    async fn insert_order(
        &self,
        number: &OrderNumber,
        user_id: UserId,
        operation: OperationType,
    ) -> LedgerResult<LedgerEntry> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            INSERT INTO orders (number, user_id, operation_type, status, amount)
            VALUES ($1, $2, $3, 'NEW', 0)
            ON CONFLICT ON CONSTRAINT orders_number_operation_key DO NOTHING
            RETURNING id, number, user_id, operation_type, status, amount, uploaded_at
            "#,
        )
        .bind(number.as_str())
        .bind(user_id.get())
        .bind(operation.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!(user_id = %user_id, operation = %operation, "Order inserted");
                row.try_into()
            }
            None => Err(LedgerError::DuplicateNumber(number.clone())),
        }
    }

    async fn list_pending_orders(&self, limit: usize) -> LedgerResult<Vec<OrderNumber>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let numbers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT number
            FROM orders
            WHERE operation_type = 'ACCRUAL'
              AND status IN ('NEW', 'PROCESSING', 'REGISTERED')
            ORDER BY uploaded_at, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers.into_iter().map(OrderNumber::from_trusted).collect())
    }

    #[instrument(skip(self), fields(number = %number))]
    async fn set_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
    ) -> LedgerResult<Transition> {
        match status {
            OrderStatus::Invalid => return self.set_order_invalid(number).await,
            OrderStatus::Processed => return self.set_order_processed(number, Points::ZERO).await,
            _ => {}
        }

        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET status = $2
            WHERE number = $1
              AND operation_type = 'ACCRUAL'
              AND status IN ('NEW', 'PROCESSING', 'REGISTERED')
              AND status <> $2
            RETURNING id
            "#,
        )
        .bind(number.as_str())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(_) => {
                debug!(status = %status, "Order status updated");
                Ok(Transition::Applied)
            }
            None => self.classify_noop(number).await,
        }
    }

    #[instrument(skip(self), fields(number = %number))]
    async fn set_order_invalid(&self, number: &OrderNumber) -> LedgerResult<Transition> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE orders
            SET status = 'INVALID'
            WHERE number = $1
              AND operation_type = 'ACCRUAL'
              AND status IN ('NEW', 'PROCESSING', 'REGISTERED')
            RETURNING id
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(_) => {
                info!("Order marked invalid");
                Ok(Transition::Applied)
            }
            None => self.classify_noop(number).await,
        }
    }

    #[instrument(skip(self), fields(number = %number, amount = %amount))]
    async fn set_order_processed(
        &self,
        number: &OrderNumber,
        amount: Points,
    ) -> LedgerResult<Transition> {
        let mut tx = self.pool.begin().await?;

        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, user_id, operation_type, status, amount, uploaded_at
            FROM orders
            WHERE number = $1 AND operation_type = 'ACCRUAL'
            FOR UPDATE
            "#,
        )
        .bind(number.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let entry: LedgerEntry = row
            .ok_or_else(|| LedgerError::NotFound(format!("order {number}")))?
            .try_into()?;

        if entry.status.is_final() {
            tx.rollback().await?;
            debug!(status = %entry.status, "Order already settled");
            return Ok(Transition::AlreadySettled(entry.status));
        }

        sqlx::query("UPDATE orders SET status = 'PROCESSED', amount = $2 WHERE id = $1")
            .bind(entry.id)
            .bind(amount.value())
            .execute(&mut *tx)
            .await?;

        Self::lock_user(&mut tx, entry.user_id).await?;
        let balance = Self::refresh_balance(&mut tx, entry.user_id).await?;

        tx.commit().await?;

        info!(user_id = %entry.user_id, balance = %balance, "Order processed");
        Ok(Transition::Applied)
    }

    async fn current_balance(&self, user_id: UserId) -> LedgerResult<Balance> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
            .bind(user_id.get())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Err(LedgerError::NotFound(format!("user {user_id}")));
        }

        let balance = Self::project(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(balance)
    }

    #[instrument(skip(self), fields(user_id = %user_id, number = %number, sum = %sum))]
    async fn record_withdrawal(
        &self,
        user_id: UserId,
        number: &OrderNumber,
        sum: Points,
    ) -> LedgerResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        Self::lock_user(&mut tx, user_id).await?;
        let balance = Self::project(&mut tx, user_id).await?;

        if !balance.has_sufficient_funds(sum) {
            tx.rollback().await?;
            warn!(available = %balance.current, "Withdrawal rejected: insufficient funds");
            return Err(LedgerError::InsufficientFunds {
                required: sum,
                available: balance.current,
            });
        }

        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            INSERT INTO orders (number, user_id, operation_type, status, amount)
            VALUES ($1, $2, 'WITHDRAWAL', 'PROCESSED', $3)
            ON CONFLICT ON CONSTRAINT orders_number_operation_key DO NOTHING
            RETURNING id, number, user_id, operation_type, status, amount, uploaded_at
            "#,
        )
        .bind(number.as_str())
        .bind(user_id.get())
        .bind(sum.value())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(LedgerError::DuplicateNumber(number.clone()));
        };
        let entry = LedgerEntry::try_from(row)?;

        let remaining = Self::refresh_balance(&mut tx, user_id).await?;
        tx.commit().await?;

        info!(remaining = %remaining, "Withdrawal recorded");
        Ok(entry)
    }

    async fn list_orders(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, user_id, operation_type, status, amount, uploaded_at
            FROM orders
            WHERE user_id = $1 AND operation_type = 'ACCRUAL'
            ORDER BY uploaded_at, id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }

    async fn list_withdrawals(&self, user_id: UserId) -> LedgerResult<Vec<LedgerEntry>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, number, user_id, operation_type, status, amount, uploaded_at
            FROM orders
            WHERE user_id = $1 AND operation_type = 'WITHDRAWAL'
            ORDER BY uploaded_at, id
            "#,
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        decode_all(rows)
    }
}
