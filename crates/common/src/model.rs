//! Model collaborator
//!
//! The coordinator and workers only see a model through the [`Model`] trait:
//! produce an initial parameter set, train a parameter set on a batch of text,
//! and answer a prompt. [`BigramModel`] is the shipped implementation, a
//! next-token predictor with an embedding table and a linear output layer.

use crate::config::ModelConfig;
use crate::error::{HydraError, Result};
use crate::tensor::{Parameters, Tensor};
use crate::tokenizer::{Tokenizer, END_ID};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub const EMBEDDING: &str = "embedding.weight";
pub const OUTPUT_WEIGHT: &str = "output.weight";
pub const OUTPUT_BIAS: &str = "output.bias";

/// Local training knobs
#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
}

/// Outcome of one local training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    /// Mean cross-entropy over every prediction of the last epoch
    pub final_loss: f32,
    /// Predictions made across all epochs
    pub steps: usize,
}

/// Black-box model capability
pub trait Model: Send + Sync {
    /// Parameter set the global model starts from
    fn initial_parameters(&self) -> Parameters;

    /// Train `params` in place on `batch`
    fn train(&self, params: &mut Parameters, batch: &[String], options: TrainOptions)
        -> Result<TrainReport>;

    /// Produce a text response for `prompt`
    fn infer(&self, params: &Parameters, prompt: &str) -> Result<String>;
}

/// Embedding + linear next-token model
#[derive(Debug, Clone)]
pub struct BigramModel {
    config: ModelConfig,
    tokenizer: Tokenizer,
    seed: u64,
}

impl BigramModel {
    pub fn new(config: ModelConfig) -> Self {
        let tokenizer = Tokenizer::new(config.vocab_size);
        Self {
            config,
            tokenizer,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    fn expect_shapes(&self, params: &Parameters) -> Result<()> {
        let (v, d) = (self.config.vocab_size, self.config.embed_dim);
        let expected = [
            (EMBEDDING, vec![v, d]),
            (OUTPUT_WEIGHT, vec![v, d]),
            (OUTPUT_BIAS, vec![v]),
        ];
        for (name, shape) in expected {
            match params.get(name) {
                Some(t) if t.shape == shape => {}
                Some(t) => {
                    return Err(HydraError::model(format!(
                        "{} has shape {:?}, model expects {:?}",
                        name, t.shape, shape
                    )))
                }
                None => return Err(HydraError::model(format!("Missing parameter {}", name))),
            }
        }
        Ok(())
    }

    /// Output logits for the token following `token`
    fn logits(&self, params: &Parameters, token: u32) -> Result<Vec<f32>> {
        let embedding = param(params, EMBEDDING)?;
        let weight = param(params, OUTPUT_WEIGHT)?;
        let bias = param(params, OUTPUT_BIAS)?;
        let hidden = embedding.row(token as usize);

        Ok((0..self.config.vocab_size)
            .map(|v| dot(weight.row(v), hidden) + bias.data[v])
            .collect())
    }
}

fn param<'a>(params: &'a Parameters, name: &str) -> Result<&'a Tensor> {
    params
        .get(name)
        .ok_or_else(|| HydraError::model(format!("Missing parameter {}", name)))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn softmax_in_place(logits: &mut [f32]) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in logits.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    for x in logits.iter_mut() {
        *x /= sum;
    }
}

impl Model for BigramModel {
    fn initial_parameters(&self) -> Parameters {
        let (v, d) = (self.config.vocab_size, self.config.embed_dim);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = 1.0 / (d as f32).sqrt();

        let mut random = |shape: Vec<usize>| {
            let size: usize = shape.iter().product();
            let data = (0..size).map(|_| rng.random_range(-scale..scale)).collect();
            Tensor { shape, data }
        };

        let mut params = Parameters::new();
        params.insert(EMBEDDING, random(vec![v, d]));
        params.insert(OUTPUT_WEIGHT, random(vec![v, d]));
        params.insert(
            OUTPUT_BIAS,
            Tensor {
                shape: vec![v],
                data: vec![0.0; v],
            },
        );
        params
    }

    fn train(
        &self,
        params: &mut Parameters,
        batch: &[String],
        options: TrainOptions,
    ) -> Result<TrainReport> {
        self.expect_shapes(params)?;

        let sequences: Vec<Vec<u32>> = batch
            .iter()
            .map(|text| self.tokenizer.encode(text, self.config.max_seq_length))
            .collect();

        let lr = options.learning_rate;
        let mut steps = 0;
        let mut final_loss = 0.0;

        for epoch in 0..options.epochs {
            let mut epoch_loss = 0.0;
            let mut epoch_steps = 0;

            for ids in &sequences {
                for pair in ids.windows(2) {
                    let (x, y) = (pair[0] as usize, pair[1] as usize);

                    let mut probs = self.logits(params, pair[0])?;
                    softmax_in_place(&mut probs);
                    epoch_loss += -probs[y].max(f32::MIN_POSITIVE).ln();

                    // dL/dlogits = p - onehot(y)
                    probs[y] -= 1.0;

                    let hidden = param(params, EMBEDDING)?.row(x).to_vec();
                    let mut grad_hidden = vec![0.0f32; hidden.len()];

                    {
                        let weight = params
                            .get_mut(OUTPUT_WEIGHT)
                            .ok_or_else(|| HydraError::model("Missing output weight"))?;
                        for (v, &g) in probs.iter().enumerate() {
                            let row = weight.row_mut(v);
                            for (k, w) in row.iter_mut().enumerate() {
                                grad_hidden[k] += g * *w;
                                *w -= lr * g * hidden[k];
                            }
                        }
                    }
                    {
                        let bias = params
                            .get_mut(OUTPUT_BIAS)
                            .ok_or_else(|| HydraError::model("Missing output bias"))?;
                        for (b, &g) in bias.data.iter_mut().zip(&probs) {
                            *b -= lr * g;
                        }
                    }
                    {
                        let embedding = params
                            .get_mut(EMBEDDING)
                            .ok_or_else(|| HydraError::model("Missing embedding"))?;
                        for (e, g) in embedding.row_mut(x).iter_mut().zip(&grad_hidden) {
                            *e -= lr * g;
                        }
                    }

                    epoch_steps += 1;
                }
            }

            steps += epoch_steps;
            final_loss = if epoch_steps > 0 {
                epoch_loss / epoch_steps as f32
            } else {
                0.0
            };
            debug!("Epoch {}/{}: loss = {:.4}", epoch + 1, options.epochs, final_loss);
        }

        Ok(TrainReport { final_loss, steps })
    }

    fn infer(&self, params: &Parameters, prompt: &str) -> Result<String> {
        self.expect_shapes(params)?;

        let ids = self.tokenizer.encode(prompt, self.config.max_seq_length);
        let last = ids
            .iter()
            .rev()
            .copied()
            .find(|&id| id != END_ID)
            .unwrap_or(END_ID);

        let mut scored: Vec<(usize, f32)> =
            self.logits(params, last)?.into_iter().enumerate().collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let top: Vec<String> = scored.iter().take(5).map(|(id, _)| id.to_string()).collect();

        Ok(format!(
            "Model response to: '{}' (most likely next token ids: [{}]; the model needs more training to generate meaningful text)",
            prompt,
            top.join(", ")
        ))
    }
}
