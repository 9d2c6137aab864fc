//! Common error types for HydraAI
//!
//! This module defines all error types used across the coordinator and workers.
//! Every error carries a stable machine-readable code and an HTTP status so the
//! coordinator can report it synchronously and the worker can recognise it again.

use std::net::AddrParseError;
use thiserror::Error;

/// Main error type for HydraAI
#[derive(Error, Debug)]
pub enum HydraError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller has never registered
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// The pending pool is empty (normal condition)
    #[error("No tasks available")]
    NoTasksAvailable,

    /// No task with this id exists
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The task is not in the state the operation requires
    #[error("Task {task_id} is {status}, expected {expected}")]
    InvalidTaskState {
        task_id: String,
        status: String,
        expected: String,
    },

    /// Result submitted by a worker other than the assignee
    #[error("Task {task_id} is not assigned to {worker_id}")]
    NotYourTask { task_id: String, worker_id: String },

    /// Submitted tensor shape differs from the global tensor shape
    #[error("Incompatible update for {name}: expected shape {expected:?}, got {actual:?}")]
    IncompatibleUpdateShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Balance does not cover the requested debit
    #[error("Insufficient balance: required {required}, available {balance}")]
    InsufficientBalance { required: f64, balance: f64 },

    /// Task generation was asked to sample from an empty corpus
    #[error("Training corpus is empty")]
    EmptyCorpus,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection errors (client side)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Model training or inference errors
    #[error("Model error: {0}")]
    Model(String),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for HydraError {
    fn from(err: AddrParseError) -> Self {
        HydraError::Parse(err.to_string())
    }
}

impl HydraError {
    /// Stable error code reported on the wire
    pub fn code(&self) -> &'static str {
        match self {
            HydraError::Config(_) => "config",
            HydraError::UnknownWorker(_) => "unknown_worker",
            HydraError::NoTasksAvailable => "no_tasks_available",
            HydraError::TaskNotFound(_) => "task_not_found",
            HydraError::InvalidTaskState { .. } => "invalid_task_state",
            HydraError::NotYourTask { .. } => "not_your_task",
            HydraError::IncompatibleUpdateShape { .. } => "incompatible_update_shape",
            HydraError::InsufficientBalance { .. } => "insufficient_balance",
            HydraError::EmptyCorpus => "empty_corpus",
            HydraError::InvalidInput(_) => "invalid_input",
            HydraError::Storage(_) => "storage",
            HydraError::Serialization(_) => "serialization",
            HydraError::Io(_) => "io",
            HydraError::Connection(_) => "connection",
            HydraError::Timeout(_) => "timeout",
            HydraError::Model(_) => "model",
            HydraError::Parse(_) => "parse",
            HydraError::Internal(_) => "internal",
        }
    }

    /// Convert error to an HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            HydraError::InvalidInput(_) | HydraError::Parse(_) => 400,
            HydraError::InsufficientBalance { .. } => 402,
            HydraError::NotYourTask { .. } => 403,
            HydraError::UnknownWorker(_)
            | HydraError::NoTasksAvailable
            | HydraError::TaskNotFound(_) => 404,
            HydraError::InvalidTaskState { .. } => 409,
            HydraError::IncompatibleUpdateShape { .. } => 422,
            HydraError::Connection(_) => 503,
            HydraError::Timeout(_) => 504,
            HydraError::Config(_)
            | HydraError::EmptyCorpus
            | HydraError::Storage(_)
            | HydraError::Serialization(_)
            | HydraError::Io(_)
            | HydraError::Model(_)
            | HydraError::Internal(_) => 500,
        }
    }

    /// Rebuild an error from a wire code and message.
    ///
    /// Variants with structured payloads come back with the message folded
    /// into their string fields.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "config" => HydraError::Config(message),
            "unknown_worker" => HydraError::UnknownWorker(message),
            "no_tasks_available" => HydraError::NoTasksAvailable,
            "task_not_found" => HydraError::TaskNotFound(message),
            "invalid_task_state" => HydraError::InvalidTaskState {
                task_id: message,
                status: "unknown".to_string(),
                expected: "assigned".to_string(),
            },
            "not_your_task" => HydraError::NotYourTask {
                task_id: message,
                worker_id: String::new(),
            },
            "insufficient_balance" => HydraError::InsufficientBalance {
                required: f64::NAN,
                balance: f64::NAN,
            },
            "empty_corpus" => HydraError::EmptyCorpus,
            "invalid_input" => HydraError::InvalidInput(message),
            "storage" => HydraError::Storage(message),
            "timeout" => HydraError::Timeout(message),
            "model" => HydraError::Model(message),
            "parse" => HydraError::Parse(message),
            _ => HydraError::Internal(message),
        }
    }

    /// Whether this error is an expected condition rather than a failure
    pub fn is_expected(&self) -> bool {
        matches!(self, HydraError::NoTasksAvailable)
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        HydraError::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        HydraError::InvalidInput(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        HydraError::Storage(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        HydraError::Model(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        HydraError::Connection(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        HydraError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        HydraError::Internal(msg.into())
    }
}

/// Result type alias for HydraAI operations
pub type Result<T> = std::result::Result<T, HydraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(HydraError::UnknownWorker("w".into()).status_code(), 404);
        assert_eq!(
            HydraError::InsufficientBalance { required: 0.5, balance: 0.3 }.status_code(),
            402
        );
        assert_eq!(
            HydraError::InvalidTaskState {
                task_id: "t".into(),
                status: "completed".into(),
                expected: "assigned".into(),
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn test_code_round_trip_keeps_variant() {
        let err = HydraError::from_code("unknown_worker", "alice");
        assert!(matches!(err, HydraError::UnknownWorker(ref id) if id == "alice"));
        assert_eq!(err.code(), "unknown_worker");

        let err = HydraError::from_code("no_tasks_available", "");
        assert!(err.is_expected());

        let err = HydraError::from_code("something_new", "boom");
        assert!(matches!(err, HydraError::Internal(_)));
    }
}
