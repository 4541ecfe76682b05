//! Database models for host balances and balance transactions.

use crate::ledger::{Deduction, Refund, TransactionType};
use rust_decimal::Decimal;

/// Database request for appending a balance transaction
#[derive(Debug, Clone)]
pub struct BalanceTransactionCreateDBRequest {
    pub host: String,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub performed_by: Option<String>,
}

/// Outcome of a conditional deduction
#[derive(Debug, Clone, PartialEq)]
pub enum DeductOutcome {
    Deducted(Deduction),
    HostNotFound,
    Insufficient { balance: Decimal },
}

/// Outcome of a refund attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RefundOutcome {
    Refunded(Refund),
    TransactionNotFound,
    NotRefundable,
    AlreadyRefunded,
}
