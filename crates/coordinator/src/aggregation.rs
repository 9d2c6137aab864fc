//! Aggregation of worker updates into the global model
//!
//! Aggregation is a pure function from (current global parameters, one
//! worker's submitted parameters) to the next global parameters. The policy is
//! a trait object so the coordinator can swap the blending rule without
//! touching the parameter store.
//!
//! The shipped policy, [`ExponentialBlend`], computes
//! `new = (1 - w) * old + w * update` element-wise. Applied to a sequence of
//! submissions this is an exponentially-weighted moving average: after N
//! updates u1..uN the contribution of u_k is `w * (1 - w)^(N - k)`, so recent
//! submissions dominate and arrival order matters. It is *not* a federated
//! average (equal-weighted mean of all participants).

use hydra_common::{HydraError, Parameters, Result, Tensor};
use rayon::prelude::*;
use std::fmt;

/// Element count above which blending is split across the rayon pool
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// Blend weight used when none is configured
pub const DEFAULT_BLEND_WEIGHT: f64 = 0.1;

/// Rule combining one worker update with the global parameters
pub trait AggregationPolicy: Send + Sync + fmt::Debug {
    /// Short policy name for logs
    fn name(&self) -> &'static str;

    /// Compute the next global parameters.
    ///
    /// Must fail without side effects when the update is unusable; the caller
    /// only replaces the global state with an `Ok` result.
    fn aggregate(&self, global: &Parameters, update: &Parameters) -> Result<Parameters>;
}

/// Exponential moving-average blend with a fixed weight
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBlend {
    weight: f32,
}

impl ExponentialBlend {
    /// `weight` must lie in (0, 1]
    pub fn new(weight: f64) -> Result<Self> {
        if !(weight > 0.0 && weight <= 1.0) {
            return Err(HydraError::invalid_input(format!(
                "Blend weight must be in (0, 1], got {}",
                weight
            )));
        }
        Ok(Self {
            weight: weight as f32,
        })
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }
}

impl Default for ExponentialBlend {
    fn default() -> Self {
        Self {
            weight: DEFAULT_BLEND_WEIGHT as f32,
        }
    }
}

impl AggregationPolicy for ExponentialBlend {
    fn name(&self) -> &'static str {
        "exponential-blend"
    }

    fn aggregate(&self, global: &Parameters, update: &Parameters) -> Result<Parameters> {
        global.check_compatible(update)?;

        Ok(global
            .iter()
            .map(|(name, current)| {
                let next = match update.get(name) {
                    Some(submitted) => blend_tensor(current, submitted, self.weight),
                    None => current.clone(),
                };
                (name.clone(), next)
            })
            .collect())
    }
}

/// `(1 - weight) * old + weight * new`, element-wise. Shapes must match.
pub fn blend_tensor(old: &Tensor, new: &Tensor, weight: f32) -> Tensor {
    let keep = 1.0 - weight;
    let mix = |(o, n): (&f32, &f32)| keep * o + weight * n;

    let data: Vec<f32> = if old.len() >= PARALLEL_THRESHOLD {
        old.data.par_iter().zip(new.data.par_iter()).map(mix).collect()
    } else {
        old.data.iter().zip(new.data.iter()).map(mix).collect()
    };

    Tensor {
        shape: old.shape.clone(),
        data,
    }
}
