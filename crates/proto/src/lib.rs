//! HydraAI wire protocol
//!
//! JSON request/response bodies exchanged between workers and the coordinator.
//! Every endpoint is a `POST` with one of the request types below, except
//! `GET /health` and `GET /metrics`.

use chrono::{DateTime, Utc};
use hydra_common::Parameters;
use serde::{Deserialize, Serialize};

/// Endpoint paths
pub mod paths {
    pub const HEALTH: &str = "/health";
    pub const METRICS: &str = "/metrics";
    pub const REGISTER: &str = "/register";
    pub const GET_TASK: &str = "/get_task";
    pub const SUBMIT_RESULT: &str = "/submit_result";
    pub const GET_BALANCE: &str = "/get_balance";
    pub const QUERY_MODEL: &str = "/query_model";
    pub const TRANSACTIONS: &str = "/transactions";
}

/// Body shared by every request that only names the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    /// False when the account already existed
    pub created: bool,
    pub balance: f64,
}

/// A task handed to a worker together with the parameters to train from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub data_batch: Vec<String>,
    pub parameters: Parameters,
    pub reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultRequest {
    pub worker_id: String,
    pub task_id: String,
    pub update: Parameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub tokens_earned: f64,
    pub new_balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub worker_id: String,
    pub balance: f64,
    pub tasks_completed: u64,
    pub member_since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub worker_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    pub cost: f64,
    pub new_balance: f64,
}

/// One audit-log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub delta: f64,
    pub kind: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsResponse {
    pub worker_id: String,
    pub transactions: Vec<TransactionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub pending_tasks: u64,
}

/// Error body returned with every non-2xx status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
