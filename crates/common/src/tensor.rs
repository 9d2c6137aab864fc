//! Tensor and parameter-set types
//!
//! A [`Tensor`] is a flat `f32` buffer plus a row-major shape. [`Parameters`]
//! is the named tensor mapping exchanged between coordinator and workers; on
//! the wire it is a JSON object `{ name: { "shape": [..], "data": [..] } }`.

use crate::error::{HydraError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tensor shape
pub type Shape = Vec<usize>;

/// Owned tensor with heap-allocated data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    pub shape: Shape,
    pub data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawTensor {
    shape: Shape,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = HydraError;

    fn try_from(raw: RawTensor) -> Result<Self> {
        Tensor::new(raw.data, raw.shape)
    }
}

impl Tensor {
    /// Create a tensor, checking that `data` fills `shape` exactly
    pub fn new(data: Vec<f32>, shape: Shape) -> Result<Self> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(HydraError::invalid_input(format!(
                "Tensor of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Create a zero tensor
    pub fn zeros(shape: Shape) -> Result<Self> {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with `value`
    pub fn full(shape: Shape, value: f32) -> Result<Self> {
        let size = element_count(&shape)?;
        Ok(Self {
            data: vec![value; size],
            shape,
        })
    }

    /// Get the total number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether both tensors have identical shapes
    pub fn same_shape(&self, other: &Tensor) -> bool {
        self.shape == other.shape
    }

    /// Row `i` of a 2-D tensor
    pub fn row(&self, i: usize) -> &[f32] {
        let width = self.shape.last().copied().unwrap_or(0);
        &self.data[i * width..(i + 1) * width]
    }

    /// Mutable row `i` of a 2-D tensor
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        let width = self.shape.last().copied().unwrap_or(0);
        &mut self.data[i * width..(i + 1) * width]
    }
}

/// Number of elements in `shape`; `InvalidInput` if it overflows `usize`
pub fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| HydraError::invalid_input(format!("Tensor shape {:?} is too large", shape)))
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={:?}, size={})", self.shape, self.len())
    }
}

/// Named parameter set (the global model, a snapshot, or a worker update)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, Tensor>);

impl Parameters {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.0.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.0.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Tensor)> {
        self.0.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total number of scalar parameters
    pub fn total_elements(&self) -> usize {
        self.0.values().map(Tensor::len).sum()
    }

    /// Check that every tensor in `update` that also exists here has the same shape.
    ///
    /// Names absent from `self` are not an error; they are ignored by blending.
    pub fn check_compatible(&self, update: &Parameters) -> Result<()> {
        for (name, tensor) in update.iter() {
            if let Some(current) = self.get(name) {
                if !current.same_shape(tensor) {
                    return Err(HydraError::IncompatibleUpdateShape {
                        name: name.clone(),
                        expected: current.shape.clone(),
                        actual: tensor.shape.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Same names and same shapes, in both directions
    pub fn same_layout(&self, other: &Parameters) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, t)| other.get(name).is_some_and(|o| o.same_shape(t)))
    }
}

impl FromIterator<(String, Tensor)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Parameters {
    type Item = (String, Tensor);
    type IntoIter = std::collections::btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
