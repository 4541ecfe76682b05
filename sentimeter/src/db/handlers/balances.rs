use crate::{
    db::{
        errors::{DbError, Result},
        models::balances::{BalanceTransactionCreateDBRequest, DeductOutcome, RefundOutcome},
    },
    ledger::{BalanceTransaction, Credit, CreditGrant, Deduction, HostBalance, Refund, TransactionType, refund_description},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, FromRow, PgConnection};
use uuid::Uuid;

/// Partial unique index allowing at most one refund per referenced deduction
pub const SINGLE_REFUND_INDEX: &str = "idx_balance_transactions_single_refund";

const HOST_COLUMNS: &str = "host, balance, total_credits_added, total_credits_used, active, notes, created_at, last_updated";
const TRANSACTION_COLUMNS: &str =
    "id, host, transaction_type, amount, balance_after, description, reference, performed_by, created_at";

// Database entity model for a host account
#[derive(Debug, Clone, FromRow)]
struct HostBalanceRow {
    host: String,
    balance: Decimal,
    total_credits_added: Decimal,
    total_credits_used: Decimal,
    active: bool,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl From<HostBalanceRow> for HostBalance {
    fn from(row: HostBalanceRow) -> Self {
        Self {
            host: row.host,
            balance: row.balance,
            total_credits_added: row.total_credits_added,
            total_credits_used: row.total_credits_used,
            active: row.active,
            notes: row.notes,
            created_at: row.created_at,
            last_updated: row.last_updated,
        }
    }
}

// Database entity model for a balance transaction
#[derive(Debug, Clone, FromRow)]
struct BalanceTransactionRow {
    id: Uuid,
    host: String,
    transaction_type: TransactionType,
    amount: Decimal,
    balance_after: Decimal,
    description: Option<String>,
    reference: Option<String>,
    performed_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BalanceTransactionRow> for BalanceTransaction {
    fn from(row: BalanceTransactionRow) -> Self {
        Self {
            id: row.id,
            host: row.host,
            timestamp: row.created_at,
            amount: row.amount,
            transaction_type: row.transaction_type,
            balance_after: row.balance_after,
            description: row.description,
            reference: row.reference,
            performed_by: row.performed_by,
        }
    }
}

pub struct Balances<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Balances<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get_host(&mut self, host: &str) -> Result<Option<HostBalance>> {
        let row = sqlx::query_as::<_, HostBalanceRow>(&format!("SELECT {HOST_COLUMNS} FROM host_balances WHERE host = $1"))
            .bind(host)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(row.map(Into::into))
    }

    pub async fn list_hosts(&mut self) -> Result<Vec<HostBalance>> {
        let rows = sqlx::query_as::<_, HostBalanceRow>(&format!("SELECT {HOST_COLUMNS} FROM host_balances ORDER BY host"))
            .fetch_all(&mut *self.db)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn get_transaction(&mut self, id: Uuid) -> Result<Option<BalanceTransaction>> {
        let row = sqlx::query_as::<_, BalanceTransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM balance_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    /// List a host's transactions, newest first
    pub async fn list_transactions(&mut self, host: &str, skip: i64, limit: i64) -> Result<Vec<BalanceTransaction>> {
        let rows = sqlx::query_as::<_, BalanceTransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM balance_transactions
             WHERE host = $1
             ORDER BY created_at DESC, id DESC
             OFFSET $2 LIMIT $3"
        ))
        .bind(host)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count_transactions(&mut self, host: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM balance_transactions WHERE host = $1")
            .bind(host)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }

    /// Deduct `amount` if and only if the balance covers it.
    ///
    /// The conditional update is the serialization point: concurrent deductions against
    /// one host cannot both pass the `balance >= amount` predicate on a stale value.
    pub async fn deduct(&mut self, host: &str, amount: Decimal, description: &str, reference: Option<&str>) -> Result<DeductOutcome> {
        let mut tx = self.db.begin().await?;

        let balance: Option<Decimal> = sqlx::query_scalar(
            "UPDATE host_balances
             SET balance = balance - $2,
                 total_credits_used = total_credits_used + $2,
                 last_updated = NOW()
             WHERE host = $1 AND balance >= $2
             RETURNING balance",
        )
        .bind(host)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = balance else {
            let current: Option<Decimal> = sqlx::query_scalar("SELECT balance FROM host_balances WHERE host = $1")
                .bind(host)
                .fetch_optional(&mut *tx)
                .await?;

            return Ok(match current {
                None => DeductOutcome::HostNotFound,
                Some(balance) => DeductOutcome::Insufficient { balance },
            });
        };

        let transaction_id = Self::insert_transaction(
            &mut tx,
            &BalanceTransactionCreateDBRequest {
                host: host.to_string(),
                transaction_type: TransactionType::Deduct,
                amount: -amount,
                balance_after: balance,
                description: Some(description.to_string()),
                reference: reference.map(str::to_string),
                performed_by: None,
            },
        )
        .await?;

        tx.commit().await?;

        Ok(DeductOutcome::Deducted(Deduction {
            balance,
            deducted: amount,
            transaction_id,
        }))
    }

    /// Credit an account, creating it when absent
    pub async fn credit(&mut self, grant: &CreditGrant) -> Result<Credit> {
        let mut tx = self.db.begin().await?;

        let balance: Decimal = sqlx::query_scalar(
            "INSERT INTO host_balances (host, balance, total_credits_added)
             VALUES ($1, $2, $2)
             ON CONFLICT (host) DO UPDATE
             SET balance = host_balances.balance + EXCLUDED.balance,
                 total_credits_added = host_balances.total_credits_added + EXCLUDED.total_credits_added,
                 last_updated = NOW()
             RETURNING balance",
        )
        .bind(&grant.host)
        .bind(grant.amount)
        .fetch_one(&mut *tx)
        .await?;

        let transaction_id = Self::insert_transaction(
            &mut tx,
            &BalanceTransactionCreateDBRequest {
                host: grant.host.clone(),
                transaction_type: TransactionType::Add,
                amount: grant.amount,
                balance_after: balance,
                description: grant.description.clone(),
                reference: grant.reference.clone(),
                performed_by: grant.performed_by.clone(),
            },
        )
        .await?;

        tx.commit().await?;

        Ok(Credit {
            balance,
            added: grant.amount,
            transaction_id,
        })
    }

    /// Refund a deduction in full, at most once
    pub async fn refund(&mut self, transaction_id: Uuid, reason: Option<&str>, performed_by: Option<&str>) -> Result<RefundOutcome> {
        let mut tx = self.db.begin().await?;

        // Lock the original row so concurrent refunds of it queue up behind us
        let original = sqlx::query_as::<_, BalanceTransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM balance_transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(original) = original else {
            return Ok(RefundOutcome::TransactionNotFound);
        };
        if original.transaction_type != TransactionType::Deduct {
            return Ok(RefundOutcome::NotRefundable);
        }

        let reference = transaction_id.to_string();
        let already_refunded: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM balance_transactions WHERE transaction_type = 'refund' AND reference = $1)",
        )
        .bind(&reference)
        .fetch_one(&mut *tx)
        .await?;
        if already_refunded {
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        let refunded = original.amount.abs();
        let balance: Decimal = sqlx::query_scalar(
            "UPDATE host_balances
             SET balance = balance + $2,
                 total_credits_used = GREATEST(total_credits_used - $2, 0),
                 last_updated = NOW()
             WHERE host = $1
             RETURNING balance",
        )
        .bind(&original.host)
        .bind(refunded)
        .fetch_one(&mut *tx)
        .await?;

        let inserted = Self::insert_transaction(
            &mut tx,
            &BalanceTransactionCreateDBRequest {
                host: original.host.clone(),
                transaction_type: TransactionType::Refund,
                amount: refunded,
                balance_after: balance,
                description: Some(refund_description(transaction_id, reason)),
                reference: Some(reference),
                performed_by: performed_by.map(str::to_string),
            },
        )
        .await;

        let refund_transaction_id = match inserted {
            Ok(id) => id,
            Err(e) if e.is_unique_violation_on(SINGLE_REFUND_INDEX) => return Ok(RefundOutcome::AlreadyRefunded),
            Err(e) => return Err(e),
        };

        tx.commit().await?;

        Ok(RefundOutcome::Refunded(Refund {
            balance,
            refunded,
            transaction_id,
            refund_transaction_id,
        }))
    }

    /// Update an account's active flag, and its notes when provided
    pub async fn update_status(&mut self, host: &str, active: bool, notes: Option<&str>) -> Result<Option<HostBalance>> {
        let row = sqlx::query_as::<_, HostBalanceRow>(&format!(
            "UPDATE host_balances
             SET active = $2, notes = COALESCE($3, notes), last_updated = NOW()
             WHERE host = $1
             RETURNING {HOST_COLUMNS}"
        ))
        .bind(host)
        .bind(active)
        .bind(notes)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert_transaction(conn: &mut PgConnection, request: &BalanceTransactionCreateDBRequest) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO balance_transactions
                 (id, host, transaction_type, amount, balance_after, description, reference, performed_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(id)
        .bind(&request.host)
        .bind(request.transaction_type)
        .bind(request.amount)
        .bind(request.balance_after)
        .bind(&request.description)
        .bind(&request.reference)
        .bind(&request.performed_by)
        .execute(conn)
        .await?;

        if result.rows_affected() != 1 {
            return Err(DbError::Other(anyhow::anyhow!("Failed to record balance transaction for {}", request.host)));
        }

        Ok(id)
    }
}
