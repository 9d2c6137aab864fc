//! Worker accounts and the token audit log

use super::{Account, LedgerStore, Transaction, TransactionKind};
use chrono::Utc;
use hydra_common::{HydraError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Balance bookkeeping over a [`LedgerStore`]
#[derive(Clone)]
pub struct AccountLedger {
    store: Arc<dyn LedgerStore>,
}

impl AccountLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create the account if missing. Returns the account and whether it was created.
    ///
    /// Registering an existing worker never touches its balance.
    pub fn register(&self, worker_id: &str) -> Result<(Account, bool)> {
        let created = self.store.create_account(worker_id, Utc::now())?;
        if created {
            info!("Registered worker {}", worker_id);
        } else {
            debug!("Worker {} already registered", worker_id);
        }
        Ok((self.account(worker_id)?, created))
    }

    /// Look up an account; `UnknownWorker` if absent
    pub fn account(&self, worker_id: &str) -> Result<Account> {
        self.store
            .get_account(worker_id)?
            .ok_or_else(|| HydraError::UnknownWorker(worker_id.to_string()))
    }

    /// Add `amount` to the balance. Returns the new balance.
    pub fn credit(
        &self,
        worker_id: &str,
        amount: f64,
        kind: TransactionKind,
        reason: impl Into<String>,
    ) -> Result<f64> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(HydraError::invalid_input(format!(
                "Credit amount must be non-negative, got {}",
                amount
            )));
        }
        self.store.apply_transaction(
            &Transaction {
                worker_id: worker_id.to_string(),
                delta: amount,
                kind,
                reason: reason.into(),
                timestamp: Utc::now(),
            },
            false,
        )
    }

    /// Subtract `amount` iff the balance covers it, as one atomic step.
    ///
    /// On `InsufficientBalance` nothing changes and no audit row is written.
    pub fn debit_if_sufficient(
        &self,
        worker_id: &str,
        amount: f64,
        kind: TransactionKind,
        reason: impl Into<String>,
    ) -> Result<f64> {
        if !(amount.is_finite() && amount >= 0.0) {
            return Err(HydraError::invalid_input(format!(
                "Debit amount must be non-negative, got {}",
                amount
            )));
        }
        self.store.apply_transaction(
            &Transaction {
                worker_id: worker_id.to_string(),
                delta: -amount,
                kind,
                reason: reason.into(),
                timestamp: Utc::now(),
            },
            true,
        )
    }

    /// Audit log, oldest first
    pub fn history(&self, worker_id: &str) -> Result<Vec<Transaction>> {
        self.account(worker_id)?;
        self.store.transactions_for(worker_id)
    }

    /// Balance recomputed from the audit log
    pub fn audited_balance(&self, worker_id: &str) -> Result<f64> {
        Ok(self.history(worker_id)?.iter().map(|tx| tx.delta).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MemoryStore, SqliteStore};
    use std::sync::Barrier;

    fn ledger() -> AccountLedger {
        AccountLedger::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_register_is_idempotent() {
        let ledger = ledger();
        let (account, created) = ledger.register("alice").unwrap();
        assert!(created);
        assert_eq!(account.balance, 0.0);

        ledger.credit("alice", 2.0, TransactionKind::Reward, "task").unwrap();

        let (account, created) = ledger.register("alice").unwrap();
        assert!(!created);
        assert_eq!(account.balance, 2.0);
    }

    #[test]
    fn test_unknown_worker() {
        let ledger = ledger();
        assert!(matches!(ledger.account("ghost"), Err(HydraError::UnknownWorker(_))));
        assert!(matches!(ledger.history("ghost"), Err(HydraError::UnknownWorker(_))));
    }

    #[test]
    fn test_debit_rejected_below_cost() {
        let ledger = ledger();
        ledger.register("bob").unwrap();
        ledger.credit("bob", 0.3, TransactionKind::Reward, "seed").unwrap();

        let err = ledger
            .debit_if_sufficient("bob", 0.5, TransactionKind::Query, "query")
            .unwrap_err();
        assert!(matches!(err, HydraError::InsufficientBalance { .. }));
        assert_eq!(ledger.account("bob").unwrap().balance, 0.3);
    }

    #[test]
    fn test_debit_to_exactly_zero_is_allowed() {
        let ledger = ledger();
        ledger.register("carol").unwrap();
        ledger.credit("carol", 0.5, TransactionKind::Reward, "seed").unwrap();

        let balance = ledger
            .debit_if_sufficient("carol", 0.5, TransactionKind::Query, "query")
            .unwrap();
        assert_eq!(balance, 0.0);
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let ledger = ledger();
        ledger.register("dave").unwrap();
        assert!(ledger.credit("dave", -1.0, TransactionKind::Trade, "x").is_err());
        assert!(ledger
            .debit_if_sufficient("dave", f64::NAN, TransactionKind::Trade, "x")
            .is_err());
    }

    #[test]
    fn test_audit_log_matches_balance() {
        let ledger = AccountLedger::new(Arc::new(SqliteStore::open_in_memory().unwrap()));
        ledger.register("erin").unwrap();
        for _ in 0..4 {
            ledger.credit("erin", 1.0, TransactionKind::Reward, "task").unwrap();
        }
        ledger
            .debit_if_sufficient("erin", 0.5, TransactionKind::Query, "query")
            .unwrap();

        assert_eq!(ledger.account("erin").unwrap().balance, 3.5);
        assert_eq!(ledger.audited_balance("erin").unwrap(), 3.5);
        assert_eq!(ledger.history("erin").unwrap().len(), 5);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let ledger = ledger();
        ledger.register("frank").unwrap();
        ledger.credit("frank", 1.0, TransactionKind::Reward, "seed").unwrap();

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    ledger
                        .debit_if_sufficient("frank", 0.5, TransactionKind::Query, "query")
                        .is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(successes, 2);
        assert_eq!(ledger.account("frank").unwrap().balance, 0.0);
    }
}
