//! Task lifecycle rules on top of a [`LedgerStore`]

use super::{LedgerStore, Task, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use hydra_common::{HydraError, Parameters, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of a successful completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReceipt {
    pub task_id: TaskId,
    pub reward: f64,
    pub completed_at: DateTime<Utc>,
}

/// Task state machine: `pending -> assigned -> completed`
#[derive(Clone)]
pub struct TaskLedger {
    store: Arc<dyn LedgerStore>,
}

impl TaskLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Record a new pending task
    pub fn create(&self, data_batch: Vec<String>, reward: f64) -> Result<TaskId> {
        let task = Task::new(data_batch, reward);
        self.store.insert_task(&task)?;
        debug!("Created {} ({} examples)", task.task_id, task.data_batch.len());
        Ok(task.task_id)
    }

    /// Claim the oldest pending task for `worker_id`.
    ///
    /// `None` when the pool is empty. Two concurrent callers never receive the
    /// same task.
    pub fn acquire_one_pending(&self, worker_id: &str) -> Result<Option<Task>> {
        let task = self.store.claim_next_pending(worker_id, Utc::now())?;
        if let Some(task) = &task {
            debug!("Assigned {} to {}", task.task_id, worker_id);
        }
        Ok(task)
    }

    pub fn get(&self, task_id: &TaskId) -> Result<Option<Task>> {
        self.store.get_task(task_id)
    }

    /// Move an assigned task to `completed` and store `result`.
    ///
    /// Fails with `TaskNotFound`, `InvalidTaskState` (not currently assigned,
    /// including a second submission) or `NotYourTask`.
    pub fn complete(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        result: &Parameters,
    ) -> Result<CompletionReceipt> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| HydraError::TaskNotFound(task_id.to_string()))?;
        ensure_assigned_to(&task, worker_id)?;

        let now = Utc::now();
        if !self.store.complete_if_assigned(task_id, worker_id, result, now)? {
            // Lost a race with another submission or a lease requeue
            let current = self
                .store
                .get_task(task_id)?
                .ok_or_else(|| HydraError::TaskNotFound(task_id.to_string()))?;
            ensure_assigned_to(&current, worker_id)?;
            return Err(invalid_state(&current));
        }

        Ok(CompletionReceipt {
            task_id: task.task_id,
            reward: task.reward,
            completed_at: now,
        })
    }

    pub fn pending_count(&self) -> Result<u64> {
        self.store.count_by_status(TaskStatus::Pending)
    }

    pub fn count_by_status(&self, status: TaskStatus) -> Result<u64> {
        self.store.count_by_status(status)
    }

    pub fn count_completed_by(&self, worker_id: &str) -> Result<u64> {
        self.store.count_completed_by(worker_id)
    }

    /// Return tasks assigned longer than `lease` ago to the pending pool
    pub fn requeue_expired(&self, lease: Duration) -> Result<u64> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| HydraError::invalid_input(format!("Lease out of range: {}", e)))?;
        let requeued = self.store.requeue_assigned_before(Utc::now() - lease)?;
        if requeued > 0 {
            info!("Requeued {} tasks with expired leases", requeued);
        }
        Ok(requeued)
    }
}

fn ensure_assigned_to(task: &Task, worker_id: &str) -> Result<()> {
    if task.status != TaskStatus::Assigned {
        return Err(invalid_state(task));
    }
    if task.assigned_to.as_deref() != Some(worker_id) {
        return Err(HydraError::NotYourTask {
            task_id: task.task_id.to_string(),
            worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

fn invalid_state(task: &Task) -> HydraError {
    HydraError::InvalidTaskState {
        task_id: task.task_id.to_string(),
        status: task.status.to_string(),
        expected: TaskStatus::Assigned.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use hydra_common::Tensor;

    fn ledger() -> TaskLedger {
        TaskLedger::new(Arc::new(MemoryStore::new()))
    }

    fn update() -> Parameters {
        let mut params = Parameters::new();
        params.insert("w", Tensor::zeros(vec![1]).unwrap());
        params
    }

    #[test]
    fn test_lifecycle() {
        let ledger = ledger();
        let id = ledger.create(vec!["a".into(), "b".into()], 1.0).unwrap();
        assert_eq!(ledger.pending_count().unwrap(), 1);

        let task = ledger.acquire_one_pending("w1").unwrap().unwrap();
        assert_eq!(task.task_id, id);
        assert_eq!(ledger.pending_count().unwrap(), 0);
        assert_eq!(ledger.count_by_status(TaskStatus::Assigned).unwrap(), 1);

        let receipt = ledger.complete(&id, "w1", &update()).unwrap();
        assert_eq!(receipt.reward, 1.0);
        assert_eq!(ledger.count_completed_by("w1").unwrap(), 1);
        assert_eq!(ledger.get(&id).unwrap().unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_empty_pool_yields_none() {
        assert!(ledger().acquire_one_pending("w1").unwrap().is_none());
    }

    #[test]
    fn test_second_submission_is_invalid_state() {
        let ledger = ledger();
        let id = ledger.create(vec!["a".into()], 1.0).unwrap();
        ledger.acquire_one_pending("w1").unwrap();
        ledger.complete(&id, "w1", &update()).unwrap();

        let err = ledger.complete(&id, "w1", &update()).unwrap_err();
        assert!(matches!(
            err,
            HydraError::InvalidTaskState { ref status, .. } if status == "completed"
        ));
    }

    #[test]
    fn test_submission_for_pending_task_is_invalid_state() {
        let ledger = ledger();
        let id = ledger.create(vec!["a".into()], 1.0).unwrap();

        let err = ledger.complete(&id, "w1", &update()).unwrap_err();
        assert!(matches!(
            err,
            HydraError::InvalidTaskState { ref status, .. } if status == "pending"
        ));
    }

    #[test]
    fn test_submission_by_other_worker_is_rejected() {
        let ledger = ledger();
        let id = ledger.create(vec!["a".into()], 1.0).unwrap();
        ledger.acquire_one_pending("w1").unwrap();

        let err = ledger.complete(&id, "w2", &update()).unwrap_err();
        assert!(matches!(err, HydraError::NotYourTask { .. }));
        assert_eq!(ledger.count_by_status(TaskStatus::Assigned).unwrap(), 1);
    }

    #[test]
    fn test_unknown_task() {
        let err = ledger()
            .complete(&TaskId::from("task-nope"), "w1", &update())
            .unwrap_err();
        assert!(matches!(err, HydraError::TaskNotFound(_)));
    }

    #[test]
    fn test_requeue_with_zero_lease_frees_assigned_tasks() {
        let ledger = ledger();
        let id = ledger.create(vec!["a".into()], 1.0).unwrap();
        ledger.acquire_one_pending("w1").unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(ledger.requeue_expired(Duration::ZERO).unwrap(), 1);
        let task = ledger.acquire_one_pending("w2").unwrap().unwrap();
        assert_eq!(task.task_id, id);

        // The original assignee lost the lease
        let err = ledger.complete(&id, "w1", &update()).unwrap_err();
        assert!(matches!(err, HydraError::NotYourTask { .. }));
    }
}
