//! Worker agent loop
//!
//! Register once, then repeatedly fetch a task, train on it locally and submit
//! the trained parameters. Fetch, training and submit failures are logged and
//! retried after a fixed backoff; the loop only ends on shutdown or after
//! `max_tasks` completed tasks.

use crate::client::CoordinatorClient;
use crate::trainer::LocalTrainer;
use hydra_common::config::WorkerConfig;
use hydra_common::{HydraError, Result, METRICS};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Loop pacing and stop conditions
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Pause after each attempt, successful or not
    pub backoff: Duration,
    pub max_tasks: Option<usize>,
    /// Balance report cadence in completed tasks; 0 disables it
    pub balance_report_every: usize,
}

impl AgentSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            backoff: config.backoff(),
            max_tasks: config.max_tasks,
            balance_report_every: config.balance_report_every,
        }
    }
}

/// Result of one fetch-train-submit attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Task trained and accepted
    Completed {
        task_id: String,
        tokens_earned: f64,
        new_balance: f64,
    },
    /// Nothing pending on the coordinator
    Idle,
}

/// Counters for the current session
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub tasks_completed: usize,
    pub tokens_earned: f64,
    pub failures: usize,
    pub started: Instant,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            tasks_completed: 0,
            tokens_earned: 0.0,
            failures: 0,
            started: Instant::now(),
        }
    }
}

/// A training participant
pub struct WorkerAgent {
    worker_id: String,
    client: CoordinatorClient,
    trainer: LocalTrainer,
    settings: AgentSettings,
    stats: SessionStats,
}

impl WorkerAgent {
    pub fn new(
        worker_id: impl Into<String>,
        client: CoordinatorClient,
        trainer: LocalTrainer,
        settings: AgentSettings,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            client,
            trainer,
            settings,
            stats: SessionStats::default(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Register with the coordinator; an existing account is reused
    pub async fn register(&self) -> Result<()> {
        let registered = self.client.register(&self.worker_id).await?;
        if registered.created {
            info!("Registered {} with {}", self.worker_id, self.client.base_url());
        } else {
            info!(
                "{} already registered, current balance {} tokens",
                self.worker_id, registered.balance
            );
        }
        Ok(())
    }

    /// One fetch-train-submit attempt
    pub async fn step(&mut self) -> Result<Step> {
        let assignment = match self.client.get_task(&self.worker_id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return Ok(Step::Idle),
            Err(e) => {
                METRICS.worker.fetch_failures_total.inc();
                return Err(e);
            }
        };

        info!(
            "Received {} ({} examples, reward {})",
            assignment.task_id,
            assignment.data_batch.len(),
            assignment.reward
        );

        let trainer = self.trainer.clone();
        let batch = assignment.data_batch;
        let (trained, _report) =
            tokio::task::spawn_blocking(move || trainer.train(assignment.parameters, &batch))
                .await
                .map_err(|e| HydraError::internal(format!("Training task failed: {}", e)))??;

        let submitted = match self
            .client
            .submit_result(&self.worker_id, &assignment.task_id, trained)
            .await
        {
            Ok(submitted) => submitted,
            Err(e) => {
                METRICS.worker.submit_failures_total.inc();
                return Err(e);
            }
        };

        self.stats.tasks_completed += 1;
        self.stats.tokens_earned += submitted.tokens_earned;
        info!(
            "Submitted {}: earned {} tokens, balance {}",
            assignment.task_id, submitted.tokens_earned, submitted.new_balance
        );

        Ok(Step::Completed {
            task_id: assignment.task_id,
            tokens_earned: submitted.tokens_earned,
            new_balance: submitted.new_balance,
        })
    }

    /// Work until `shutdown` resolves or `max_tasks` tasks are completed.
    ///
    /// Only a failed registration is returned as an error.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<SessionStats>
    where
        F: Future<Output = ()>,
    {
        self.register().await?;
        info!(
            "Worker {} started, tasks to complete: {}",
            self.worker_id,
            self.settings
                .max_tasks
                .map_or("unlimited".to_string(), |n| n.to_string())
        );

        tokio::pin!(shutdown);
        loop {
            if self.reached_max_tasks() {
                info!("Completed {} tasks, stopping", self.stats.tasks_completed);
                break;
            }

            let outcome = tokio::select! {
                _ = &mut shutdown => {
                    warn!("Worker stopped by user");
                    break;
                }
                outcome = self.step() => outcome,
            };

            match outcome {
                Ok(Step::Completed { .. }) => {
                    info!("Progress: {} tasks completed", self.stats.tasks_completed);
                    if self.report_due() {
                        self.report_balance().await;
                    }
                }
                Ok(Step::Idle) => info!("No tasks available"),
                Err(e) => {
                    self.stats.failures += 1;
                    error!("Task attempt failed: {}", e);
                }
            }

            if self.reached_max_tasks() {
                continue;
            }

            tokio::select! {
                _ = &mut shutdown => {
                    warn!("Worker stopped by user");
                    break;
                }
                _ = tokio::time::sleep(self.settings.backoff) => {}
            }
        }

        self.summarize().await;
        Ok(self.stats.clone())
    }

    fn reached_max_tasks(&self) -> bool {
        self.settings
            .max_tasks
            .is_some_and(|max| self.stats.tasks_completed >= max)
    }

    fn report_due(&self) -> bool {
        let every = self.settings.balance_report_every;
        every > 0 && self.stats.tasks_completed % every == 0
    }

    async fn report_balance(&self) {
        match self.client.balance(&self.worker_id).await {
            Ok(balance) => info!(
                "Balance: {} tokens, {} tasks completed, member since {}",
                balance.balance, balance.tasks_completed, balance.member_since
            ),
            Err(e) => warn!("Could not fetch balance: {}", e),
        }
    }

    async fn summarize(&self) {
        info!(
            "Session summary for {}: {} tasks completed, {} tokens earned, {} failures in {:?}",
            self.worker_id,
            self.stats.tasks_completed,
            self.stats.tokens_earned,
            self.stats.failures,
            self.stats.started.elapsed()
        );
        self.report_balance().await;
    }
}
