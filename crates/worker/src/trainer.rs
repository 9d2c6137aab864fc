//! Local training on assigned tasks

use hydra_common::config::WorkerConfig;
use hydra_common::metrics::LatencyTimer;
use hydra_common::{Model, Parameters, Result, TrainOptions, TrainReport, METRICS};
use std::sync::Arc;
use tracing::info;

/// Runs the model's local training step on a parameter copy
#[derive(Clone)]
pub struct LocalTrainer {
    model: Arc<dyn Model>,
    options: TrainOptions,
}

impl LocalTrainer {
    pub fn new(model: Arc<dyn Model>, options: TrainOptions) -> Self {
        Self { model, options }
    }

    /// Trainer using the worker's configured epochs and learning rate
    pub fn from_config(model: Arc<dyn Model>, config: &WorkerConfig) -> Self {
        Self::new(
            model,
            TrainOptions {
                epochs: config.num_epochs,
                learning_rate: config.learning_rate,
            },
        )
    }

    pub fn options(&self) -> TrainOptions {
        self.options
    }

    /// Train `parameters` on `batch` and return the trained set
    pub fn train(
        &self,
        mut parameters: Parameters,
        batch: &[String],
    ) -> Result<(Parameters, TrainReport)> {
        let report = METRICS
            .worker
            .train_duration
            .time(|| self.model.train(&mut parameters, batch, self.options))?;

        METRICS.worker.tasks_trained_total.inc();
        info!(
            "Trained on {} examples for {} epochs: loss {:.4}",
            batch.len(),
            self.options.epochs,
            report.final_loss
        );
        Ok((parameters, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_common::config::ModelConfig;
    use hydra_common::BigramModel;

    #[test]
    fn test_training_changes_parameters() {
        let model = Arc::new(BigramModel::new(ModelConfig {
            vocab_size: 32,
            embed_dim: 4,
            max_seq_length: 8,
        }));
        let trainer = LocalTrainer::new(
            model.clone(),
            TrainOptions {
                epochs: 2,
                learning_rate: 0.1,
            },
        );

        let initial = model.initial_parameters();
        let batch = vec!["the cat sat".to_string(), "the dog ran".to_string()];
        let (trained, report) = trainer.train(initial.clone(), &batch).unwrap();

        assert!(trained.same_layout(&initial));
        assert_ne!(trained, initial);
        assert!(report.steps > 0);
        assert!(report.final_loss.is_finite());
    }

    #[test]
    fn test_options_follow_worker_config() {
        let model = Arc::new(BigramModel::new(ModelConfig::default()));
        let config = WorkerConfig {
            num_epochs: 7,
            learning_rate: 0.01,
            ..WorkerConfig::default()
        };

        let options = LocalTrainer::from_config(model, &config).options();
        assert_eq!(options.epochs, 7);
        assert_eq!(options.learning_rate, 0.01);
    }
}
