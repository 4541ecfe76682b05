//! Ledger used when billing is disabled.
//!
//! Every balance check passes and deductions succeed without recording anything.
//! Administrative operations report that no accounts exist.

use super::{BalanceCheck, BalanceLedger, Credit, CreditGrant, Deduction, HostBalance, LedgerError, Refund, Result, TransactionPage};
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct UnmeteredLedger;

#[async_trait]
impl BalanceLedger for UnmeteredLedger {
    async fn check_balance(&self, _host: &str, _required: Decimal) -> Result<BalanceCheck> {
        Ok(BalanceCheck {
            sufficient: true,
            balance: Decimal::ZERO,
            host_exists: true,
            active: true,
            error: None,
        })
    }

    async fn deduct_credits(&self, _host: &str, amount: Decimal, _description: &str, _reference: Option<&str>) -> Result<Deduction> {
        Ok(Deduction {
            balance: Decimal::ZERO,
            deducted: amount,
            transaction_id: Uuid::nil(),
        })
    }

    async fn add_credits(&self, grant: &CreditGrant) -> Result<Credit> {
        Err(LedgerError::HostNotFound(grant.host.clone()))
    }

    async fn refund_transaction(&self, transaction_id: Uuid, _reason: Option<&str>, _performed_by: Option<&str>) -> Result<Refund> {
        Err(LedgerError::TransactionNotFound(transaction_id))
    }

    async fn get_host_balance(&self, _host: &str) -> Result<Option<HostBalance>> {
        Ok(None)
    }

    async fn get_transaction_history(&self, _host: &str, _skip: i64, _limit: i64) -> Result<TransactionPage> {
        Ok(TransactionPage {
            transactions: Vec::new(),
            total_count: 0,
        })
    }

    async fn get_all_hosts(&self) -> Result<Vec<HostBalance>> {
        Ok(Vec::new())
    }

    async fn update_host_status(&self, host: &str, _active: bool, _notes: Option<&str>) -> Result<HostBalance> {
        Err(LedgerError::HostNotFound(host.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_everything_is_allowed() {
        let ledger = UnmeteredLedger;
        let check = ledger.check_balance("anyone.com", Decimal::from(1_000_000)).await.unwrap();
        assert!(check.sufficient);

        let deduction = ledger.deduct_credits("anyone.com", Decimal::ONE, "Analysis", None).await.unwrap();
        assert_eq!(deduction.deducted, Decimal::ONE);
        assert!(ledger.get_all_hosts().await.unwrap().is_empty());
    }
}
