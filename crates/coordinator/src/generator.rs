//! Training task generation from a static corpus

use crate::ledger::{TaskId, TaskLedger};
use hydra_common::{HydraError, Result, METRICS};
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::info;

/// Builds pending tasks by sampling the corpus
#[derive(Debug, Clone)]
pub struct TaskGenerator {
    corpus: Vec<String>,
    samples_per_task: usize,
    reward: f64,
}

impl TaskGenerator {
    pub fn new(corpus: Vec<String>, samples_per_task: usize, reward: f64) -> Self {
        Self {
            corpus,
            samples_per_task,
            reward,
        }
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    /// Sample one batch of `min(samples_per_task, corpus size)` distinct examples
    pub fn sample_batch<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<String>> {
        if self.corpus.is_empty() {
            return Err(HydraError::EmptyCorpus);
        }
        let k = self.samples_per_task.min(self.corpus.len());
        Ok(self.corpus.choose_multiple(rng, k).cloned().collect())
    }

    /// Create `n` pending tasks in `ledger`
    pub fn generate<R: Rng + ?Sized>(
        &self,
        n: usize,
        ledger: &TaskLedger,
        rng: &mut R,
    ) -> Result<Vec<TaskId>> {
        if self.corpus.is_empty() {
            return Err(HydraError::EmptyCorpus);
        }

        let mut created = Vec::with_capacity(n);
        for _ in 0..n {
            let batch = self.sample_batch(rng)?;
            created.push(ledger.create(batch, self.reward)?);
        }

        METRICS.coordinator.tasks_generated_total.inc_by(n as u64);
        info!("Generated {} training tasks", n);
        Ok(created)
    }
}
