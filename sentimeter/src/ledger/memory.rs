//! In-memory ledger for development and tests.
//!
//! Each host's account sits behind its own `DashMap` shard entry. Holding the entry
//! guard for the whole check-and-mutate serializes operations per host, which gives
//! the same guarantee as the Postgres conditional update. Guards are never held across
//! an await point. Lock order is always account entry, then the transaction log.

use super::{
    BalanceCheck, BalanceLedger, BalanceTransaction, Credit, CreditGrant, Deduction, HostBalance, LedgerError, Refund, Result,
    TransactionPage, TransactionType, checked_credit, refund_description, validate_amount,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: DashMap<String, HostBalance>,
    transactions: RwLock<Vec<BalanceTransaction>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_transaction(&self, id: Uuid) -> Option<BalanceTransaction> {
        self.transactions.read().iter().find(|tx| tx.id == id).cloned()
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn check_balance(&self, host: &str, required: Decimal) -> Result<BalanceCheck> {
        let account = self.accounts.get(host);
        Ok(BalanceCheck::evaluate(account.as_deref(), required))
    }

    #[instrument(skip(self, description, amount), fields(amount = %amount), err)]
    async fn deduct_credits(&self, host: &str, amount: Decimal, description: &str, reference: Option<&str>) -> Result<Deduction> {
        let amount = validate_amount(amount)?;

        let mut account = self
            .accounts
            .get_mut(host)
            .ok_or_else(|| LedgerError::HostNotFound(host.to_string()))?;

        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: account.balance,
                required: amount,
            });
        }

        let now = Utc::now();
        account.balance -= amount;
        account.total_credits_used += amount;
        account.last_updated = now;

        let transaction = BalanceTransaction {
            id: Uuid::new_v4(),
            host: host.to_string(),
            timestamp: now,
            amount: -amount,
            transaction_type: TransactionType::Deduct,
            balance_after: account.balance,
            description: Some(description.to_string()),
            reference: reference.map(str::to_string),
            performed_by: None,
        };
        let deduction = Deduction {
            balance: account.balance,
            deducted: amount,
            transaction_id: transaction.id,
        };
        self.transactions.write().push(transaction);

        debug!(balance = %deduction.balance, "Deducted credits");
        Ok(deduction)
    }

    #[instrument(skip_all, fields(host = %grant.host, amount = %grant.amount), err)]
    async fn add_credits(&self, grant: &CreditGrant) -> Result<Credit> {
        let amount = validate_amount(grant.amount)?;

        let mut account = self
            .accounts
            .entry(grant.host.clone())
            .or_insert_with(|| HostBalance::open(&grant.host));

        let balance = checked_credit(&grant.host, account.balance, amount)?;
        let total_added = checked_credit(&grant.host, account.total_credits_added, amount)?;

        let now = Utc::now();
        account.balance = balance;
        account.total_credits_added = total_added;
        account.last_updated = now;

        let transaction = BalanceTransaction {
            id: Uuid::new_v4(),
            host: grant.host.clone(),
            timestamp: now,
            amount,
            transaction_type: TransactionType::Add,
            balance_after: account.balance,
            description: grant.description.clone(),
            reference: grant.reference.clone(),
            performed_by: grant.performed_by.clone(),
        };
        let credit = Credit {
            balance: account.balance,
            added: amount,
            transaction_id: transaction.id,
        };
        self.transactions.write().push(transaction);

        Ok(credit)
    }

    #[instrument(skip(self), err)]
    async fn refund_transaction(&self, transaction_id: Uuid, reason: Option<&str>, performed_by: Option<&str>) -> Result<Refund> {
        let original = self
            .find_transaction(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
        if original.transaction_type != TransactionType::Deduct {
            return Err(LedgerError::NotRefundable(transaction_id));
        }

        // Refunds for one deduction always target the same host, so the account entry
        // serializes the already-refunded check below.
        let mut account = self
            .accounts
            .get_mut(&original.host)
            .ok_or_else(|| LedgerError::HostNotFound(original.host.clone()))?;

        let mut transactions = self.transactions.write();
        let reference = transaction_id.to_string();
        if transactions
            .iter()
            .any(|tx| tx.transaction_type == TransactionType::Refund && tx.reference.as_deref() == Some(reference.as_str()))
        {
            return Err(LedgerError::AlreadyRefunded(transaction_id));
        }

        let refunded = original.amount.abs();
        let balance = checked_credit(&original.host, account.balance, refunded)?;
        let now = Utc::now();
        account.balance = balance;
        account.total_credits_used = (account.total_credits_used - refunded).max(Decimal::ZERO);
        account.last_updated = now;

        let refund = BalanceTransaction {
            id: Uuid::new_v4(),
            host: original.host.clone(),
            timestamp: now,
            amount: refunded,
            transaction_type: TransactionType::Refund,
            balance_after: account.balance,
            description: Some(refund_description(transaction_id, reason)),
            reference: Some(reference),
            performed_by: performed_by.map(str::to_string),
        };
        let outcome = Refund {
            balance: account.balance,
            refunded,
            transaction_id,
            refund_transaction_id: refund.id,
        };
        transactions.push(refund);

        Ok(outcome)
    }

    async fn get_host_balance(&self, host: &str) -> Result<Option<HostBalance>> {
        Ok(self.accounts.get(host).map(|account| account.clone()))
    }

    async fn get_transaction_history(&self, host: &str, skip: i64, limit: i64) -> Result<TransactionPage> {
        let transactions = self.transactions.read();
        let for_host: Vec<&BalanceTransaction> = transactions.iter().rev().filter(|tx| tx.host == host).collect();

        Ok(TransactionPage {
            total_count: for_host.len() as i64,
            transactions: for_host
                .into_iter()
                .skip(skip.max(0) as usize)
                .take(limit.max(0) as usize)
                .cloned()
                .collect(),
        })
    }

    async fn get_all_hosts(&self) -> Result<Vec<HostBalance>> {
        let mut hosts: Vec<HostBalance> = self.accounts.iter().map(|entry| entry.value().clone()).collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(hosts)
    }

    async fn update_host_status(&self, host: &str, active: bool, notes: Option<&str>) -> Result<HostBalance> {
        let mut account = self
            .accounts
            .get_mut(host)
            .ok_or_else(|| LedgerError::HostNotFound(host.to_string()))?;

        account.active = active;
        if let Some(notes) = notes {
            account.notes = Some(notes.to_string());
        }
        account.last_updated = Utc::now();
        Ok(account.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn funded(host: &str, amount: &str) -> InMemoryLedger {
        let ledger = InMemoryLedger::new();
        ledger.add_credits(&CreditGrant::new(host, dec(amount))).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_add_credits_creates_account() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.get_host_balance("a.com").await.unwrap().is_none());

        let credit = ledger.add_credits(&CreditGrant::new("a.com", dec("10"))).await.unwrap();
        assert_eq!(credit.balance, dec("10"));

        let account = ledger.get_host_balance("a.com").await.unwrap().unwrap();
        assert!(account.active);
        assert_eq!(account.total_credits_added, dec("10"));

        let history = ledger.get_transaction_history("a.com", 0, 10).await.unwrap();
        assert_eq!(history.total_count, 1);
        assert_eq!(history.transactions[0].transaction_type, TransactionType::Add);
        assert_eq!(history.transactions[0].balance_after, dec("10"));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amounts() {
        let ledger = funded("a.com", "1").await;
        assert!(matches!(
            ledger.add_credits(&CreditGrant::new("a.com", Decimal::ZERO)).await,
            Err(LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            ledger.deduct_credits("a.com", dec("-1"), "x", None).await,
            Err(LedgerError::InvalidAmount)
        ));
    }

    #[tokio::test]
    async fn test_oversized_credits_are_rejected() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.add_credits(&CreditGrant::new("a.com", Decimal::from_scientific("7e28").unwrap())).await,
            Err(LedgerError::AmountTooLarge)
        ));
        assert!(ledger.get_host_balance("a.com").await.unwrap().is_none());

        let near_limit = dec("60000000000000");
        ledger.add_credits(&CreditGrant::new("a.com", near_limit)).await.unwrap();
        let err = ledger.add_credits(&CreditGrant::new("a.com", near_limit)).await.unwrap_err();
        assert!(matches!(err, LedgerError::BalanceLimitExceeded(_)));

        let account = ledger.get_host_balance("a.com").await.unwrap().unwrap();
        assert_eq!(account.balance, near_limit);
        assert_eq!(account.total_credits_added, near_limit);
        assert_eq!(ledger.get_transaction_history("a.com", 0, 10).await.unwrap().total_count, 1);
    }

    #[tokio::test]
    async fn test_credits_are_rounded_to_money_scale() {
        let ledger = InMemoryLedger::new();
        let credit = ledger.add_credits(&CreditGrant::new("a.com", dec("1.0000004"))).await.unwrap();
        assert_eq!(credit.added, dec("1"));
        assert_eq!(credit.balance, dec("1"));

        let history = ledger.get_transaction_history("a.com", 0, 10).await.unwrap();
        assert_eq!(history.transactions[0].amount, dec("1"));
    }

    #[tokio::test]
    async fn test_deduct_and_insufficient() {
        let ledger = funded("a.com", "1").await;

        let deduction = ledger.deduct_credits("a.com", dec("0.4"), "Analysis", Some("analysis:abc")).await.unwrap();
        assert_eq!(deduction.balance, dec("0.6"));

        let err = ledger.deduct_credits("a.com", dec("0.7"), "Analysis", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let err = ledger.deduct_credits("b.com", dec("0.1"), "Analysis", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::HostNotFound(_)));

        let account = ledger.get_host_balance("a.com").await.unwrap().unwrap();
        assert_eq!(account.balance, dec("0.6"));
        assert_eq!(account.total_credits_used, dec("0.4"));

        let history = ledger.get_transaction_history("a.com", 0, 10).await.unwrap();
        assert_eq!(history.total_count, 2);
        // Newest first
        assert_eq!(history.transactions[0].transaction_type, TransactionType::Deduct);
        assert_eq!(history.transactions[0].amount, dec("-0.4"));
        assert_eq!(history.transactions[0].reference.as_deref(), Some("analysis:abc"));
    }

    #[tokio::test]
    async fn test_concurrent_deductions_never_overdraw() {
        let ledger = Arc::new(funded("a.com", "1").await);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.deduct_credits("a.com", dec("0.1"), "Analysis", None).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        let account = ledger.get_host_balance("a.com").await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_refund_once() {
        let ledger = funded("a.com", "1").await;
        let deduction = ledger.deduct_credits("a.com", dec("0.25"), "Analysis", None).await.unwrap();

        let refund = ledger
            .refund_transaction(deduction.transaction_id, Some("bad output"), Some("admin"))
            .await
            .unwrap();
        assert_eq!(refund.refunded, dec("0.25"));
        assert_eq!(refund.balance, dec("1"));

        let account = ledger.get_host_balance("a.com").await.unwrap().unwrap();
        assert_eq!(account.total_credits_used, Decimal::ZERO);

        let err = ledger.refund_transaction(deduction.transaction_id, None, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyRefunded(_)));

        let history = ledger.get_transaction_history("a.com", 0, 10).await.unwrap();
        let refund_tx = &history.transactions[0];
        assert_eq!(refund_tx.transaction_type, TransactionType::Refund);
        assert_eq!(refund_tx.reference, Some(deduction.transaction_id.to_string()));
        assert_eq!(refund_tx.performed_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_only_deductions_are_refundable() {
        let ledger = InMemoryLedger::new();
        let credit = ledger.add_credits(&CreditGrant::new("a.com", dec("1"))).await.unwrap();

        assert!(matches!(
            ledger.refund_transaction(credit.transaction_id, None, None).await,
            Err(LedgerError::NotRefundable(_))
        ));
        assert!(matches!(
            ledger.refund_transaction(Uuid::new_v4(), None, None).await,
            Err(LedgerError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inactive_host_fails_check() {
        let ledger = funded("a.com", "5").await;
        let account = ledger.update_host_status("a.com", false, Some("suspended")).await.unwrap();
        assert!(!account.active);
        assert_eq!(account.notes.as_deref(), Some("suspended"));

        let check = ledger.check_balance("a.com", dec("0.01")).await.unwrap();
        assert!(!check.sufficient);
        assert!(check.host_exists);
        assert!(!check.active);

        assert!(matches!(
            ledger.update_host_status("missing.com", true, None).await,
            Err(LedgerError::HostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let ledger = funded("a.com", "1").await;
        for _ in 0..4 {
            ledger.deduct_credits("a.com", dec("0.1"), "Analysis", None).await.unwrap();
        }
        ledger.add_credits(&CreditGrant::new("b.com", dec("1"))).await.unwrap();

        let page = ledger.get_transaction_history("a.com", 1, 2).await.unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.transactions.len(), 2);
        assert!(page.transactions.iter().all(|tx| tx.host == "a.com"));

        let hosts = ledger.get_all_hosts().await.unwrap();
        assert_eq!(hosts.iter().map(|h| h.host.as_str()).collect::<Vec<_>>(), vec!["a.com", "b.com"]);
    }
}
