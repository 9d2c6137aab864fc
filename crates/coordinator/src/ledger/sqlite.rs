//! SQLite ledger store
//!
//! One connection guarded by a mutex. Task acquisition is a single
//! `UPDATE ... RETURNING` whose `WHERE` clause re-checks `status = 'pending'`,
//! and balance mutations run inside a transaction together with their audit
//! row.

use super::{
    format_timestamp, parse_timestamp, Account, LedgerStore, Task, TaskId, TaskStatus,
    Transaction,
};
use chrono::{DateTime, Utc};
use hydra_common::{HydraError, Parameters, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    worker_id   TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    balance     REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tasks (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id      TEXT NOT NULL UNIQUE,
    status       TEXT NOT NULL,
    assigned_to  TEXT,
    data_batch   TEXT NOT NULL,
    result       TEXT,
    reward       REAL NOT NULL,
    created_at   TEXT NOT NULL,
    assigned_at  TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, seq);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id INTEGER PRIMARY KEY AUTOINCREMENT,
    worker_id      TEXT NOT NULL,
    delta          REAL NOT NULL,
    kind           TEXT NOT NULL,
    reason         TEXT NOT NULL,
    timestamp      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_worker ON transactions (worker_id);
";

const TASK_COLUMNS: &str =
    "task_id, status, assigned_to, data_batch, result, reward, created_at, assigned_at, completed_at";

trait StorageResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T> StorageResultExt<T> for rusqlite::Result<T> {
    fn storage(self) -> Result<T> {
        self.map_err(|e| HydraError::storage(e.to_string()))
    }
}

/// Task row as stored, before decoding
struct TaskRow {
    task_id: String,
    status: String,
    assigned_to: Option<String>,
    data_batch: String,
    result: Option<String>,
    reward: f64,
    created_at: String,
    assigned_at: Option<String>,
    completed_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get(0)?,
            status: row.get(1)?,
            assigned_to: row.get(2)?,
            data_batch: row.get(3)?,
            result: row.get(4)?,
            reward: row.get(5)?,
            created_at: row.get(6)?,
            assigned_at: row.get(7)?,
            completed_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<Task> {
        let result = match self.result {
            Some(json) => Some(serde_json::from_str::<Parameters>(&json)?),
            None => None,
        };
        Ok(Task {
            task_id: TaskId::from(self.task_id),
            status: self.status.parse()?,
            assigned_to: self.assigned_to,
            data_batch: serde_json::from_str(&self.data_batch)?,
            result,
            reward: self.reward,
            created_at: parse_timestamp(&self.created_at)?,
            assigned_at: self.assigned_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// [`LedgerStore`] backed by a SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).storage()?;
        info!("Opened ledger database at {}", path.display());
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().storage()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).storage()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LedgerStore for SqliteStore {
    fn insert_task(&self, task: &Task) -> Result<()> {
        let data_batch = serde_json::to_string(&task.data_batch)?;
        let result = task.result.as_ref().map(serde_json::to_string).transpose()?;

        self.conn
            .lock()
            .execute(
                "INSERT INTO tasks (task_id, status, assigned_to, data_batch, result, reward, \
                 created_at, assigned_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.task_id.as_str(),
                    task.status.as_str(),
                    task.assigned_to,
                    data_batch,
                    result,
                    task.reward,
                    format_timestamp(&task.created_at),
                    task.assigned_at.as_ref().map(format_timestamp),
                    task.completed_at.as_ref().map(format_timestamp),
                ],
            )
            .storage()?;
        Ok(())
    }

    fn claim_next_pending(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Task>> {
        let sql = format!(
            "UPDATE tasks SET status = 'assigned', assigned_to = ?1, assigned_at = ?2 \
             WHERE seq = (SELECT seq FROM tasks WHERE status = 'pending' ORDER BY seq LIMIT 1) \
             AND status = 'pending' \
             RETURNING {}",
            TASK_COLUMNS
        );

        let row = self
            .conn
            .lock()
            .query_row(&sql, params![worker_id, format_timestamp(&now)], TaskRow::from_row)
            .optional()
            .storage()?;

        row.map(TaskRow::decode).transpose()
    }

    fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE task_id = ?1", TASK_COLUMNS);
        let row = self
            .conn
            .lock()
            .query_row(&sql, params![task_id.as_str()], TaskRow::from_row)
            .optional()
            .storage()?;

        row.map(TaskRow::decode).transpose()
    }

    fn complete_if_assigned(
        &self,
        task_id: &TaskId,
        worker_id: &str,
        result: &Parameters,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = serde_json::to_string(result)?;
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE tasks SET status = 'completed', result = ?1, completed_at = ?2 \
                 WHERE task_id = ?3 AND status = 'assigned' AND assigned_to = ?4",
                params![result, format_timestamp(&now), task_id.as_str(), worker_id],
            )
            .storage()?;
        Ok(changed == 1)
    }

    fn count_by_status(&self, status: TaskStatus) -> Result<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .storage()?;
        Ok(count as u64)
    }

    fn count_completed_by(&self, worker_id: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE status = 'completed' AND assigned_to = ?1",
                params![worker_id],
                |row| row.get(0),
            )
            .storage()?;
        Ok(count as u64)
    }

    fn requeue_assigned_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE tasks SET status = 'pending', assigned_to = NULL, assigned_at = NULL \
                 WHERE status = 'assigned' AND assigned_at < ?1",
                params![format_timestamp(&cutoff)],
            )
            .storage()?;
        Ok(changed as u64)
    }

    fn create_account(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let inserted = self
            .conn
            .lock()
            .execute(
                "INSERT OR IGNORE INTO accounts (worker_id, created_at, balance) VALUES (?1, ?2, 0)",
                params![worker_id, format_timestamp(&now)],
            )
            .storage()?;
        Ok(inserted == 1)
    }

    fn get_account(&self, worker_id: &str) -> Result<Option<Account>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT worker_id, created_at, balance FROM accounts WHERE worker_id = ?1",
                params![worker_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, f64>(2)?,
                    ))
                },
            )
            .optional()
            .storage()?;

        row.map(|(worker_id, created_at, balance)| {
            Ok(Account {
                worker_id,
                created_at: parse_timestamp(&created_at)?,
                balance,
            })
        })
        .transpose()
    }

    fn apply_transaction(&self, tx: &Transaction, require_non_negative: bool) -> Result<f64> {
        let mut conn = self.conn.lock();
        let db = conn.transaction().storage()?;

        let balance: f64 = db
            .query_row(
                "SELECT balance FROM accounts WHERE worker_id = ?1",
                params![tx.worker_id],
                |row| row.get(0),
            )
            .optional()
            .storage()?
            .ok_or_else(|| HydraError::UnknownWorker(tx.worker_id.clone()))?;

        let next = balance + tx.delta;
        if require_non_negative && next < 0.0 {
            // Dropping `db` rolls back
            return Err(HydraError::InsufficientBalance {
                required: -tx.delta,
                balance,
            });
        }

        db.execute(
            "UPDATE accounts SET balance = ?1 WHERE worker_id = ?2",
            params![next, tx.worker_id],
        )
        .storage()?;
        db.execute(
            "INSERT INTO transactions (worker_id, delta, kind, reason, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                tx.worker_id,
                tx.delta,
                tx.kind.as_str(),
                tx.reason,
                format_timestamp(&tx.timestamp),
            ],
        )
        .storage()?;
        db.commit().storage()?;

        Ok(next)
    }

    fn transactions_for(&self, worker_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT worker_id, delta, kind, reason, timestamp FROM transactions \
                 WHERE worker_id = ?1 ORDER BY transaction_id",
            )
            .storage()?;

        let rows = stmt
            .query_map(params![worker_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .storage()?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage()?;

        rows.into_iter()
            .map(|(worker_id, delta, kind, reason, timestamp)| {
                Ok(Transaction {
                    worker_id,
                    delta,
                    kind: kind.parse()?,
                    reason,
                    timestamp: parse_timestamp(&timestamp)?,
                })
            })
            .collect()
    }
}
