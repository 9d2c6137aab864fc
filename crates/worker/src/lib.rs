//! HydraAI Worker
//!
//! Training participant: pulls tasks from the coordinator, trains the shared
//! model locally on each task's batch and submits the result for tokens.

pub mod agent;
pub mod client;
pub mod trainer;

pub use agent::{AgentSettings, SessionStats, Step, WorkerAgent};
pub use client::CoordinatorClient;
pub use trainer::LocalTrainer;
