//! In-memory ledger store
//!
//! All three record sets sit behind one mutex, so every trait call is a
//! single critical section. Nothing survives a restart.

use super::{Account, LedgerStore, Task, TaskId, TaskStatus, Transaction};
use chrono::{DateTime, Utc};
use hydra_common::{HydraError, Parameters, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct MemoryState {
    /// Tasks in creation order
    tasks: Vec<Task>,
    index: HashMap<TaskId, usize>,
    accounts: HashMap<String, Account>,
    transactions: Vec<Transaction>,
}

impl MemoryState {
    fn task_mut(&mut self, task_id: &TaskId) -> Option<&mut Task> {
        let slot = *self.index.get(task_id)?;
        self.tasks.get_mut(slot)
    }
}

/// Process-local [`LedgerStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn insert_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock();
        if state.index.contains_key(&task.task_id) {
            return Err(HydraError::storage(format!(
                "Duplicate task id: {}",
                task.task_id
            )));
        }
        let slot = state.tasks.len();
        state.index.insert(task.task_id.clone(), slot);
        state.tasks.push(task.clone());
        Ok(())
    }

    fn claim_next_pending(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Task>> {
        let mut state = self.state.lock();
        let claimed = state
            .tasks
            .iter_mut()
            .find(|task| task.status == TaskStatus::Pending)
            .map(|task| {
                task.status = TaskStatus::Assigned;
                task.assigned_to = Some(worker_id.to_string());
                task.assigned_at = Some(now);
                task.clone()
            });
        Ok(claimed)
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let state = self.state.lock();
        Ok(state
            .index
            .get(task_id)
            .and_then(|&slot| state.tasks.get(slot))
            .cloned())
    }

    fn complete_if_assigned(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        result: &Parameters,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(task) = state.task_mut(task_id) else {
            return Ok(false);
        };

        if task.status != TaskStatus::Assigned || task.assigned_to.as_deref() != Some(worker_id) {
            return Ok(false);
        }

        task.status = TaskStatus::Completed;
        task.result = Some(result.clone());
        task.completed_at = Some(now);
        Ok(true)
    }

    fn count_by_status(&self, status: TaskStatus) -> Result<u64> {
        let state = self.state.lock();
        Ok(state.tasks.iter().filter(|t| t.status == status).count() as u64)
    }

    fn count_completed_by(&self, worker_id: &str) -> Result<u64> {
        let state = self.state.lock();
        Ok(state
            .tasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Completed && t.assigned_to.as_deref() == Some(worker_id)
            })
            .count() as u64)
    }

    fn requeue_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        let mut requeued = 0;
        for task in state.tasks.iter_mut() {
            let expired = task.status == TaskStatus::Assigned
                && task.assigned_at.is_some_and(|at| at < cutoff);
            if expired {
                task.status = TaskStatus::Pending;
                task.assigned_to = None;
                task.assigned_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    fn create_account(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        if state.accounts.contains_key(worker_id) {
            return Ok(false);
        }
        state.accounts.insert(
            worker_id.to_string(),
            Account {
                worker_id: worker_id.to_string(),
                created_at: now,
                balance: 0.0,
            },
        );
        Ok(true)
    }

    fn get_account(&self, worker_id: &str) -> Result<Option<Account>> {
        Ok(self.state.lock().accounts.get(worker_id).cloned())
    }

    fn apply_transaction(&self, tx: &Transaction, require_non_negative: bool) -> Result<f64> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(&tx.worker_id)
            .ok_or_else(|| HydraError::UnknownWorker(tx.worker_id.clone()))?;

        let next = account.balance + tx.delta;
        if require_non_negative && next < 0.0 {
            return Err(HydraError::InsufficientBalance {
                required: -tx.delta,
                balance: account.balance,
            });
        }

        account.balance = next;
        state.transactions.push(tx.clone());
        Ok(next)
    }

    fn transactions_for(&self, worker_id: &str) -> Result<Vec<Transaction>> {
        let state = self.state.lock();
        Ok(state
            .transactions
            .iter()
            .filter(|tx| tx.worker_id == worker_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_task_id_rejected() {
        let store = MemoryStore::new();
        let task = Task::new(vec!["a".into()], 1.0);

        store.insert_task(&task).unwrap();
        assert!(store.insert_task(&task).is_err());
        assert_eq!(store.count_by_status(TaskStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn test_complete_unknown_task_is_false() {
        let store = MemoryStore::new();
        let done = store
            .complete_if_assigned(&TaskId::from("task-missing"), "w", &Parameters::new(), Utc::now())
            .unwrap();
        assert!(!done);
    }
}
