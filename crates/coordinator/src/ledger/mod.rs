//! Task and account ledger
//!
//! Records live behind the [`LedgerStore`] trait, a dumb record store for the
//! three record sets (tasks, accounts, transactions). Each mutating call is
//! atomic on its own; in particular task acquisition is a single conditional
//! `pending -> assigned` transition, never a read followed by a separate write.
//!
//! Domain rules (state-machine checks, ownership, error classification) live
//! in [`TaskLedger`] and [`AccountLedger`], not in the backends.

pub mod accounts;
pub mod memory;
pub mod sqlite;
pub mod tasks;

pub use accounts::AccountLedger;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use tasks::{CompletionReceipt, TaskLedger};

use chrono::{DateTime, SecondsFormat, Utc};
use hydra_common::{HydraError, Parameters, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque, never-reused task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh identifier
    pub fn generate() -> Self {
        TaskId(format!("task-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        TaskId(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        TaskId(id.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Completed,
    /// Reserved; no transition produces it
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(HydraError::storage(format!("Unknown task status: {}", other))),
        }
    }
}

/// One unit of assignable work
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub data_batch: Vec<String>,
    pub result: Option<Parameters>,
    pub reward: f64,
    pub created_at: DateTime<Utc>,
    /// Start of the current lease, set on assignment
    pub assigned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh pending task
    pub fn new(data_batch: Vec<String>, reward: f64) -> Self {
        Self {
            task_id: TaskId::generate(),
            status: TaskStatus::Pending,
            assigned_to: None,
            data_batch,
            result: None,
            reward,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
        }
    }
}

/// Worker account
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
    /// Denormalised running total of the account's transactions
    pub balance: f64,
}

/// Reason class of a balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Reward,
    Query,
    Trade,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Reward => "reward",
            TransactionKind::Query => "query",
            TransactionKind::Trade => "trade",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = HydraError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reward" => Ok(TransactionKind::Reward),
            "query" => Ok(TransactionKind::Query),
            "trade" => Ok(TransactionKind::Trade),
            other => Err(HydraError::storage(format!("Unknown transaction kind: {}", other))),
        }
    }
}

/// Append-only audit record of one balance mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub worker_id: String,
    pub delta: f64,
    pub kind: TransactionKind,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Record store backing the ledgers
pub trait LedgerStore: Send + Sync {
    /// Insert a new task record
    fn insert_task(&self, task: &Task) -> Result<()>;

    /// Atomically move the oldest pending task to `assigned` for `worker_id`
    fn claim_next_pending(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Task>>;

    fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Atomically complete the task iff it is `assigned` to `worker_id`.
    ///
    /// Returns false when the condition did not hold.
    fn complete_if_assigned(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        result: &Parameters,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    fn count_by_status(&self, status: TaskStatus) -> Result<u64>;

    fn count_completed_by(&self, worker_id: &str) -> Result<u64>;

    /// Return `assigned` tasks whose lease started before `cutoff` to `pending`
    fn requeue_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Create an account with zero balance; false if it already exists
    fn create_account(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    fn get_account(&self, worker_id: &str) -> Result<Option<Account>>;

    /// Atomically add `tx.delta` to the balance and append `tx` to the audit log.
    ///
    /// With `require_non_negative`, a mutation that would leave the balance
    /// below zero fails with `InsufficientBalance` and changes nothing.
    /// Returns the new balance.
    fn apply_transaction(&self, tx: &Transaction, require_non_negative: bool) -> Result<f64>;

    /// Audit log of one account, oldest first
    fn transactions_for(&self, worker_id: &str) -> Result<Vec<Transaction>>;
}

/// Fixed-width timestamp text; sorts lexicographically in time order
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| HydraError::storage(format!("Bad timestamp {:?}: {}", text, e)))
}
