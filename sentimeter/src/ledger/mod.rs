//! Prepaid balance ledger, one account per calling host.
//!
//! The ledger is the only component that mutates balances or appends balance
//! transactions. Sufficiency is re-validated atomically at deduction time, so two
//! concurrent deductions can never take a balance below zero even though the
//! pre-flight [`BalanceLedger::check_balance`] holds no reservation.
//!
//! Three implementations are selected once at startup by [`create_ledger`]:
//!
//! - [`PostgresLedger`]: durable, conditional `UPDATE … WHERE balance >= $amount`
//! - [`InMemoryLedger`]: per-host entry locks, for development and tests
//! - [`UnmeteredLedger`]: billing disabled, every check passes and nothing is recorded

pub mod memory;
pub mod models;
pub mod postgres;
pub mod unmetered;

pub use memory::InMemoryLedger;
pub use models::{BalanceCheck, BalanceTransaction, Credit, CreditGrant, Deduction, HostBalance, Refund, TransactionPage, TransactionType};
pub use postgres::PostgresLedger;
pub use unmetered::UnmeteredLedger;

use crate::db::errors::DbError;
use crate::pricing::round_money;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount must be less than {}", MAX_AMOUNT)]
    AmountTooLarge,

    #[error("Balance for host {0} would exceed {max}", max = MAX_AMOUNT)]
    BalanceLimitExceeded(String),

    #[error("Host {0} not found")]
    HostNotFound(String),

    #[error("Insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: Decimal, required: Decimal },

    #[error("Transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("Transaction {0} is not a deduction and cannot be refunded")]
    NotRefundable(Uuid),

    #[error("Transaction {0} has already been refunded")]
    AlreadyRefunded(Uuid),

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.into())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Pre-flight check. Never fails for unknown or inactive hosts, those are reported
    /// in the returned [`BalanceCheck`].
    async fn check_balance(&self, host: &str, required: Decimal) -> Result<BalanceCheck>;

    /// Atomically deduct `amount`, appending one `deduct` transaction.
    async fn deduct_credits(&self, host: &str, amount: Decimal, description: &str, reference: Option<&str>) -> Result<Deduction>;

    /// Add credits, creating the account on first use and appending one `add` transaction.
    async fn add_credits(&self, grant: &CreditGrant) -> Result<Credit>;

    /// Refund a deduction in full. Each deduction can be refunded at most once.
    async fn refund_transaction(&self, transaction_id: Uuid, reason: Option<&str>, performed_by: Option<&str>) -> Result<Refund>;

    async fn get_host_balance(&self, host: &str) -> Result<Option<HostBalance>>;

    /// Newest first, with the total number of transactions for the host.
    async fn get_transaction_history(&self, host: &str, skip: i64, limit: i64) -> Result<TransactionPage>;

    async fn get_all_hosts(&self) -> Result<Vec<HostBalance>>;

    async fn update_host_status(&self, host: &str, active: bool, notes: Option<&str>) -> Result<HostBalance>;
}

/// Upper bound (exclusive) for any stored amount or balance: 14 integer digits, matching
/// the `NUMERIC(20, 6)` columns.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x107A_4000, 0x5AF3, 0, false, 0);

/// Round `amount` to money scale and check it is positive and storable.
pub(crate) fn validate_amount(amount: Decimal) -> Result<Decimal> {
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    if amount >= MAX_AMOUNT {
        return Err(LedgerError::AmountTooLarge);
    }
    Ok(amount)
}

/// `current + amount`, or [`LedgerError::BalanceLimitExceeded`] past [`MAX_AMOUNT`].
pub(crate) fn checked_credit(host: &str, current: Decimal, amount: Decimal) -> Result<Decimal> {
    current
        .checked_add(amount)
        .filter(|total| *total < MAX_AMOUNT)
        .ok_or_else(|| LedgerError::BalanceLimitExceeded(host.to_string()))
}

pub(crate) fn refund_description(transaction_id: Uuid, reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.trim().is_empty() => format!("Refund of {transaction_id}: {reason}"),
        _ => format!("Refund of {transaction_id}"),
    }
}

/// Build the ledger selected by configuration.
///
/// With billing disabled the unmetered ledger is used regardless of storage, otherwise
/// accounts live in Postgres when a pool is available and in memory when not.
pub fn create_ledger(billing_enabled: bool, pool: Option<PgPool>) -> Arc<dyn BalanceLedger> {
    match (billing_enabled, pool) {
        (false, _) => {
            info!("Billing disabled, using unmetered ledger");
            Arc::new(UnmeteredLedger)
        }
        (true, Some(pool)) => {
            info!("Using Postgres balance ledger");
            Arc::new(PostgresLedger::new(pool))
        }
        (true, None) => {
            info!("Using in-memory balance ledger");
            Arc::new(InMemoryLedger::new())
        }
    }
}
