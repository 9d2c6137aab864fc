//! Configuration structures for HydraAI
//!
//! This module defines all configuration types used by the coordinator and workers.
//! Configurations are loaded from YAML files and can be overridden by `HYDRA__*`
//! environment variables (e.g. `HYDRA__COORDINATOR__BLEND_WEIGHT=0.2`).

use crate::error::{HydraError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for HydraAI components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydraConfig {
    /// Mode: either "worker" or "coordinator"
    pub mode: String,

    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Coordinator-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Worker-specific configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerConfig>,

    /// Model hyperparameters, shared by coordinator and workers
    #[serde(default)]
    pub model: ModelConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Coordinator-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Share of the global value displaced by one submission
    #[serde(default = "default_blend_weight")]
    pub blend_weight: f64,

    /// Tokens credited per completed task
    #[serde(default = "default_reward_per_task")]
    pub reward_per_task: f64,

    /// Tokens debited per paid query
    #[serde(default = "default_query_cost")]
    pub query_cost: f64,

    /// Examples sampled into each task
    #[serde(default = "default_samples_per_task")]
    pub samples_per_task: usize,

    /// Tasks generated at startup
    #[serde(default = "default_initial_tasks")]
    pub initial_tasks: usize,

    /// Tasks generated whenever the pending pool runs dry
    #[serde(default = "default_replenish_batch")]
    pub replenish_batch: usize,

    /// Replenishment check interval in seconds
    #[serde(default = "default_replenish_interval")]
    pub replenish_interval_secs: u64,

    /// Lease on assigned tasks; unset means stuck tasks are never requeued
    #[serde(default)]
    pub task_lease_secs: Option<u64>,

    /// Request body limit in bytes; unset sizes it from the model layout
    #[serde(default)]
    pub max_request_bytes: Option<usize>,

    /// Ledger persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Where the global parameters are loaded from and saved to
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,

    /// Inline training corpus
    #[serde(default = "default_corpus")]
    pub corpus: Vec<String>,

    /// File with one training example per line; replaces `corpus` when set
    #[serde(default)]
    pub corpus_path: Option<PathBuf>,
}

/// Ledger storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file (sqlite only)
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local, lost on restart
    Memory,

    /// SQLite file
    #[default]
    Sqlite,
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identifier; a random one is generated when unset
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Coordinator base URL
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    /// Local SGD learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    /// Passes over each task's batch
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,

    /// Pause between tasks and after failures, in seconds
    #[serde(default = "default_sleep_between_tasks")]
    pub sleep_between_tasks_secs: u64,

    /// Stop after this many completed tasks (unset = run forever)
    #[serde(default)]
    pub max_tasks: Option<usize>,

    /// Print a balance report every N completed tasks
    #[serde(default = "default_balance_report_every")]
    pub balance_report_every: usize,

    /// Request timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Client-side request timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_register_timeout")]
    pub register_secs: u64,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_secs: u64,

    #[serde(default = "default_submit_timeout")]
    pub submit_secs: u64,
}

/// Model hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Number of distinct token ids
    pub vocab_size: usize,

    /// Embedding width
    pub embed_dim: usize,

    /// Maximum tokens per encoded example
    pub max_seq_length: usize,
}

impl ModelConfig {
    /// Look up a named preset
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "default" => Ok(Self::default()),
            "slow_computer" => Ok(Self {
                vocab_size: 2048,
                embed_dim: 16,
                max_seq_length: 64,
            }),
            "fast_training" => Ok(Self {
                vocab_size: 1024,
                embed_dim: 8,
                max_seq_length: 32,
            }),
            other => Err(HydraError::config(format!("Unknown model preset: {}", other))),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vocab_size: 4096,
            embed_dim: 32,
            max_seq_length: 128,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Expose Prometheus metrics
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_database_path(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            register_secs: default_register_timeout(),
            fetch_secs: default_fetch_timeout(),
            submit_secs: default_submit_timeout(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            blend_weight: default_blend_weight(),
            reward_per_task: default_reward_per_task(),
            query_cost: default_query_cost(),
            samples_per_task: default_samples_per_task(),
            initial_tasks: default_initial_tasks(),
            replenish_batch: default_replenish_batch(),
            replenish_interval_secs: default_replenish_interval(),
            task_lease_secs: None,
            max_request_bytes: None,
            storage: StorageConfig::default(),
            checkpoint_path: None,
            corpus: default_corpus(),
            corpus_path: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            coordinator_url: default_coordinator_url(),
            learning_rate: default_learning_rate(),
            num_epochs: default_num_epochs(),
            sleep_between_tasks_secs: default_sleep_between_tasks(),
            max_tasks: None,
            balance_report_every: default_balance_report_every(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_blend_weight() -> f64 {
    0.1
}

fn default_reward_per_task() -> f64 {
    1.0
}

fn default_query_cost() -> f64 {
    0.5
}

fn default_samples_per_task() -> usize {
    3
}

fn default_initial_tasks() -> usize {
    20
}

fn default_replenish_batch() -> usize {
    10
}

fn default_replenish_interval() -> u64 {
    60
}

fn default_database_path() -> PathBuf {
    PathBuf::from("hydra.db")
}

fn default_coordinator_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_learning_rate() -> f32 {
    0.001
}

fn default_num_epochs() -> usize {
    3
}

fn default_sleep_between_tasks() -> u64 {
    5
}

fn default_balance_report_every() -> usize {
    5
}

fn default_register_timeout() -> u64 {
    10
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_submit_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

fn default_corpus() -> Vec<String> {
    [
        "The quick brown fox jumps over the lazy dog",
        "Python is a great programming language for beginners",
        "Machine learning models learn patterns from data",
        "Neural networks are inspired by the human brain",
        "Distributed computing allows many computers to work together",
        "Blockchain technology enables decentralized systems",
        "Deep learning has revolutionized artificial intelligence",
        "Natural language processing helps computers understand text",
        "Computer vision allows machines to interpret images",
        "Reinforcement learning trains agents through rewards",
        "Data science combines statistics and programming",
        "Cloud computing provides scalable infrastructure",
        "Artificial intelligence is transforming many industries",
        "Open source software encourages collaboration",
        "Version control systems help manage code changes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl HydraConfig {
    /// Built-in coordinator configuration
    pub fn coordinator_default() -> Self {
        Self {
            mode: "coordinator".to_string(),
            bind_address: default_bind_address(),
            port: default_port(),
            coordinator: Some(CoordinatorConfig::default()),
            worker: None,
            model: ModelConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Built-in worker configuration
    pub fn worker_default() -> Self {
        Self {
            mode: "worker".to_string(),
            bind_address: default_bind_address(),
            port: default_port(),
            coordinator: None,
            worker: Some(WorkerConfig::default()),
            model: ModelConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: HydraConfig = serde_yaml::from_str(content)
            .map_err(|e| HydraError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            HydraError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&content)
    }

    /// Layer `defaults`, the YAML file at `path` (if it exists) and `HYDRA__*`
    /// environment variables, in increasing priority.
    pub fn load(path: &Path, defaults: HydraConfig) -> Result<Self> {
        let base = config::Config::try_from(&defaults)
            .map_err(|e| HydraError::Config(format!("Invalid default config: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(base)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("HYDRA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                HydraError::Config(format!("Failed to load config {}: {}", path.display(), e))
            })?;

        let config: HydraConfig = settings
            .try_deserialize()
            .map_err(|e| HydraError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "coordinator" => {
                let coordinator = self.coordinator.as_ref().ok_or_else(|| {
                    HydraError::config("Coordinator config required for coordinator mode")
                })?;
                coordinator.validate()?;
            }
            "worker" => {
                let worker = self
                    .worker
                    .as_ref()
                    .ok_or_else(|| HydraError::config("Worker config required for worker mode"))?;
                worker.validate()?;
            }
            _ => {
                return Err(HydraError::config(format!("Invalid mode: {}", self.mode)));
            }
        }

        if self.model.vocab_size < 8 || self.model.embed_dim == 0 || self.model.max_seq_length < 2 {
            return Err(HydraError::config("Model dimensions are too small"));
        }

        Ok(())
    }

    /// Get the coordinator section
    pub fn coordinator(&self) -> Result<&CoordinatorConfig> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| HydraError::config("Coordinator config not found"))
    }

    /// Get the worker section
    pub fn worker(&self) -> Result<&WorkerConfig> {
        self.worker
            .as_ref()
            .ok_or_else(|| HydraError::config("Worker config not found"))
    }
}

impl CoordinatorConfig {
    /// Validate coordinator settings
    pub fn validate(&self) -> Result<()> {
        if !(self.blend_weight > 0.0 && self.blend_weight <= 1.0) {
            return Err(HydraError::config(format!(
                "blend_weight must be in (0, 1], got {}",
                self.blend_weight
            )));
        }
        if self.reward_per_task <= 0.0 || self.query_cost <= 0.0 {
            return Err(HydraError::config("reward_per_task and query_cost must be positive"));
        }
        if self.samples_per_task == 0 || self.replenish_batch == 0 {
            return Err(HydraError::config(
                "samples_per_task and replenish_batch must be non-zero",
            ));
        }
        if self.replenish_interval_secs == 0 {
            return Err(HydraError::config("replenish_interval_secs must be non-zero"));
        }
        if self.max_request_bytes == Some(0) {
            return Err(HydraError::config("max_request_bytes must be non-zero"));
        }
        Ok(())
    }

    /// Load the training corpus, preferring `corpus_path` when set
    pub fn load_corpus(&self) -> Result<Vec<String>> {
        match &self.corpus_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    HydraError::Config(format!("Failed to read corpus {}: {}", path.display(), e))
                })?;
                Ok(content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect())
            }
            None => Ok(self.corpus.clone()),
        }
    }

    /// Replenishment interval as Duration
    pub fn replenish_interval(&self) -> Duration {
        Duration::from_secs(self.replenish_interval_secs)
    }

    /// Task lease as Duration, if leases are enabled
    pub fn task_lease(&self) -> Option<Duration> {
        self.task_lease_secs.map(Duration::from_secs)
    }
}

impl WorkerConfig {
    /// Validate worker settings
    pub fn validate(&self) -> Result<()> {
        if self.coordinator_url.is_empty() {
            return Err(HydraError::config("coordinator_url must not be empty"));
        }
        if self.num_epochs == 0 {
            return Err(HydraError::config("num_epochs must be non-zero"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(HydraError::config("learning_rate must be positive"));
        }
        Ok(())
    }

    /// Pause between tasks as Duration
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.sleep_between_tasks_secs)
    }
}
