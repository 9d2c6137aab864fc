//! Global model parameter store
//!
//! The store owns the authoritative parameter set. Every snapshot and every
//! blend runs under the same exclusive lock, so a snapshot observes either the
//! full pre-blend or the full post-blend state. The set of names and each
//! tensor's shape are fixed at construction.

use crate::aggregation::{AggregationPolicy, ExponentialBlend};
use hydra_common::metrics::LatencyTimer;
use hydra_common::{HydraError, Parameters, Result, METRICS};
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info, warn};

struct ModelState {
    parameters: Parameters,
    /// Number of updates applied since construction
    version: u64,
}

/// Owner of the shared global model
pub struct ParameterStore {
    state: Mutex<ModelState>,
}

impl ParameterStore {
    /// Create a store holding `initial`
    pub fn new(initial: Parameters) -> Self {
        info!(
            "Parameter store initialised: {} tensors, {} parameters",
            initial.len(),
            initial.total_elements()
        );
        Self {
            state: Mutex::new(ModelState {
                parameters: initial,
                version: 0,
            }),
        }
    }

    /// Deep copy of the current parameters
    pub fn snapshot(&self) -> Parameters {
        self.state.lock().parameters.clone()
    }

    /// Updates applied so far
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn total_elements(&self) -> usize {
        self.state.lock().parameters.total_elements()
    }

    /// Fold `update` into the global parameters with a fixed-weight exponential blend
    pub fn blend(&self, update: &Parameters, weight: f64) -> Result<()> {
        let policy = ExponentialBlend::new(weight)?;
        self.apply(update, &policy)
    }

    /// Fold `update` into the global parameters using `policy`.
    ///
    /// On error the global parameters are left untouched.
    pub fn apply(&self, update: &Parameters, policy: &dyn AggregationPolicy) -> Result<()> {
        let mut state = self.state.lock();

        let next = METRICS
            .coordinator
            .blend_duration
            .time(|| policy.aggregate(&state.parameters, update))?;

        if !next.same_layout(&state.parameters) {
            return Err(HydraError::internal(format!(
                "Aggregation policy {} changed the parameter layout",
                policy.name()
            )));
        }

        state.parameters = next;
        state.version += 1;
        METRICS.coordinator.blends_total.inc();

        debug!("Applied {} update, model version {}", policy.name(), state.version);
        Ok(())
    }

    /// Check an update against the current layout without applying it
    pub fn check_compatible(&self, update: &Parameters) -> Result<()> {
        self.state.lock().parameters.check_compatible(update)
    }

    /// Write the current parameters to `path` as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot();
        let bytes = serde_json::to_vec(&snapshot)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;

        info!("Saved model checkpoint to {}", path.display());
        Ok(())
    }

    /// Load parameters from `path` if the file exists and matches `fallback`'s layout
    pub fn load_or(path: &Path, fallback: Parameters) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(fallback));
        }

        let bytes = std::fs::read(path)?;
        let loaded: Parameters = serde_json::from_slice(&bytes)?;

        if !loaded.same_layout(&fallback) {
            warn!(
                "Checkpoint {} does not match the configured model, starting fresh",
                path.display()
            );
            return Ok(Self::new(fallback));
        }

        info!("Loaded model checkpoint from {}", path.display());
        Ok(Self::new(loaded))
    }
}
