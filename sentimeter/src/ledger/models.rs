//! Balance ledger records and operation outcomes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Transaction type, stored as TEXT in the database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Add,
    Deduct,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HostBalance {
    pub host: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_credits_added: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_credits_used: Decimal,
    pub active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl HostBalance {
    /// A fresh, active account with a zero balance.
    pub fn open(host: &str) -> Self {
        let now = Utc::now();
        Self {
            host: host.to_string(),
            balance: Decimal::ZERO,
            total_credits_added: Decimal::ZERO,
            total_credits_used: Decimal::ZERO,
            active: true,
            notes: None,
            created_at: now,
            last_updated: now,
        }
    }
}

/// One append-only ledger entry. `amount` is signed: negative for deductions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceTransaction {
    pub id: Uuid,
    pub host: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub performed_by: Option<String>,
}

/// Result of a pre-flight balance check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceCheck {
    pub sufficient: bool,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub balance: Decimal,
    pub host_exists: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BalanceCheck {
    pub const HOST_NOT_FOUND: &'static str = "Host not found. Please add credits to create an account.";
    pub const HOST_INACTIVE: &'static str = "Host account is inactive";
    pub const INSUFFICIENT: &'static str = "Insufficient balance";

    /// Evaluate an optional account against a required amount.
    pub fn evaluate(account: Option<&HostBalance>, required: Decimal) -> Self {
        match account {
            None => Self {
                sufficient: false,
                balance: Decimal::ZERO,
                host_exists: false,
                active: false,
                error: Some(Self::HOST_NOT_FOUND.to_string()),
            },
            Some(account) if !account.active => Self {
                sufficient: false,
                balance: account.balance,
                host_exists: true,
                active: false,
                error: Some(Self::HOST_INACTIVE.to_string()),
            },
            Some(account) => {
                let sufficient = account.balance >= required;
                Self {
                    sufficient,
                    balance: account.balance,
                    host_exists: true,
                    active: true,
                    error: (!sufficient).then(|| Self::INSUFFICIENT.to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deduction {
    pub balance: Decimal,
    pub deducted: Decimal,
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub added: Decimal,
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub refunded: Decimal,
    /// The deduction that was refunded
    pub transaction_id: Uuid,
    pub refund_transaction_id: Uuid,
}

/// A credit grant. Creates the host account when it does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct CreditGrant {
    pub host: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub performed_by: Option<String>,
}

impl CreditGrant {
    pub fn new(host: impl Into<String>, amount: Decimal) -> Self {
        Self {
            host: host.into(),
            amount,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPage {
    pub transactions: Vec<BalanceTransaction>,
    pub total_count: i64,
}
