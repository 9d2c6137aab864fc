//! HydraAI Coordinator
//!
//! Owns the global model, hands training tasks to workers, folds their
//! updates back in and keeps the token ledger.

pub mod aggregation;
pub mod api;
pub mod generator;
pub mod ledger;
pub mod parameters;
pub mod service;

pub use aggregation::{AggregationPolicy, ExponentialBlend};
pub use generator::TaskGenerator;
pub use ledger::{AccountLedger, LedgerStore, MemoryStore, SqliteStore, TaskLedger};
pub use parameters::ParameterStore;
pub use service::Coordinator;
