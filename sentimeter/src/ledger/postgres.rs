//! Durable ledger backed by the `host_balances` and `balance_transactions` tables.

use super::{BalanceCheck, BalanceLedger, Credit, CreditGrant, Deduction, HostBalance, LedgerError, Refund, Result, TransactionPage, validate_amount};
use crate::db::{
    errors::DbError,
    handlers::Balances,
    models::balances::{DeductOutcome, RefundOutcome},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A balance column overflowing `NUMERIC(20, 6)` is the host's limit, not a storage fault.
fn over_limit(host: &str, err: LedgerError) -> LedgerError {
    match err {
        LedgerError::Storage(DbError::OutOfRange { .. }) => LedgerError::BalanceLimitExceeded(host.to_string()),
        other => other,
    }
}

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceLedger for PostgresLedger {
    #[instrument(skip(self, required), err)]
    async fn check_balance(&self, host: &str, required: Decimal) -> Result<BalanceCheck> {
        let mut conn = self.pool.acquire().await?;
        let account = Balances::new(&mut conn).get_host(host).await?;
        Ok(BalanceCheck::evaluate(account.as_ref(), required))
    }

    #[instrument(skip(self, description, amount), fields(amount = %amount), err)]
    async fn deduct_credits(&self, host: &str, amount: Decimal, description: &str, reference: Option<&str>) -> Result<Deduction> {
        let amount = validate_amount(amount)?;

        let mut conn = self.pool.acquire().await?;
        match Balances::new(&mut conn).deduct(host, amount, description, reference).await? {
            DeductOutcome::Deducted(deduction) => {
                debug!(balance = %deduction.balance, "Deducted credits");
                Ok(deduction)
            }
            DeductOutcome::HostNotFound => Err(LedgerError::HostNotFound(host.to_string())),
            DeductOutcome::Insufficient { balance } => Err(LedgerError::InsufficientBalance { balance, required: amount }),
        }
    }

    #[instrument(skip_all, fields(host = %grant.host, amount = %grant.amount), err)]
    async fn add_credits(&self, grant: &CreditGrant) -> Result<Credit> {
        let grant = CreditGrant {
            amount: validate_amount(grant.amount)?,
            ..grant.clone()
        };

        let mut conn = self.pool.acquire().await?;
        Balances::new(&mut conn)
            .credit(&grant)
            .await
            .map_err(|err| over_limit(&grant.host, err.into()))
    }

    #[instrument(skip(self), err)]
    async fn refund_transaction(&self, transaction_id: Uuid, reason: Option<&str>, performed_by: Option<&str>) -> Result<Refund> {
        let mut conn = self.pool.acquire().await?;
        match Balances::new(&mut conn).refund(transaction_id, reason, performed_by).await? {
            RefundOutcome::Refunded(refund) => Ok(refund),
            RefundOutcome::TransactionNotFound => Err(LedgerError::TransactionNotFound(transaction_id)),
            RefundOutcome::NotRefundable => Err(LedgerError::NotRefundable(transaction_id)),
            RefundOutcome::AlreadyRefunded => Err(LedgerError::AlreadyRefunded(transaction_id)),
        }
    }

    async fn get_host_balance(&self, host: &str) -> Result<Option<HostBalance>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Balances::new(&mut conn).get_host(host).await?)
    }

    async fn get_transaction_history(&self, host: &str, skip: i64, limit: i64) -> Result<TransactionPage> {
        let mut conn = self.pool.acquire().await?;
        let mut repo = Balances::new(&mut conn);

        let transactions = repo.list_transactions(host, skip, limit).await?;
        let total_count = repo.count_transactions(host).await?;

        Ok(TransactionPage { transactions, total_count })
    }

    async fn get_all_hosts(&self) -> Result<Vec<HostBalance>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Balances::new(&mut conn).list_hosts().await?)
    }

    #[instrument(skip(self), err)]
    async fn update_host_status(&self, host: &str, active: bool, notes: Option<&str>) -> Result<HostBalance> {
        let mut conn = self.pool.acquire().await?;
        Balances::new(&mut conn)
            .update_status(host, active, notes)
            .await?
            .ok_or_else(|| LedgerError::HostNotFound(host.to_string()))
    }
}
