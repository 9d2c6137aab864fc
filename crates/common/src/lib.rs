//! HydraAI common library
//!
//! This crate contains shared code used by the coordinator and the workers.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod tensor;
pub mod tokenizer;

// Re-export commonly used types
pub use config::HydraConfig;
pub use error::{HydraError, Result};
pub use metrics::{MetricsRegistry, METRICS};
pub use model::{BigramModel, Model, TrainOptions, TrainReport};
pub use tensor::{Parameters, Tensor};
pub use tokenizer::Tokenizer;
