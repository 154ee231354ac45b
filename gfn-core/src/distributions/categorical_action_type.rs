use super::{Categorical, Distribution};
use crate::error::{GfnError, Result};
use candle_core::{D, Tensor};
use rand::RngCore;

/// Picks a single action type for a whole batch.
///
/// Only the first row of `probs` is used; the sampled action type and its
/// log-probability are repeated across the `batch_len` entries.
#[derive(Debug, Clone)]
pub struct CategoricalActionType {
    categorical: Categorical,
    batch_len: usize,
}

impl CategoricalActionType {
    pub fn new(probs: &Tensor) -> Result<Self> {
        let batch_len = match probs.dims() {
            [batch_len, _] if *batch_len > 0 => *batch_len,
            dims => {
                return Err(GfnError::Shape(format!(
                    "expected non-empty probs of shape (batch, n_action_types), got {dims:?}"
                )));
            }
        };
        Ok(Self {
            categorical: Categorical::from_probs(&probs.get(0)?)?,
            batch_len,
        })
    }

    fn repeat_over_batch(&self, t: &Tensor) -> Result<Tensor> {
        let mut repeats = vec![1; t.rank()];
        repeats.push(self.batch_len);
        Ok(t.unsqueeze(t.rank())?.repeat(repeats)?)
    }
}

impl Distribution for CategoricalActionType {
    fn sample(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<Tensor> {
        let samples = self.categorical.sample(sample_shape, rng)?;
        self.repeat_over_batch(&samples)
    }

    /// `value` is laid out like the samples, `(*sample_shape, batch)`, with an
    /// optional trailing unit axis. Only the first entry of the batch is read.
    /// With a batch of one the last axis is always the batch axis.
    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let value = match value.dims() {
            [] => {
                return Err(GfnError::Shape(
                    "action types need a batch axis".to_string(),
                ));
            }
            [.., _, 1] if self.batch_len != 1 => value.squeeze(D::Minus1)?,
            _ => value.clone(),
        };
        let first = value.narrow(D::Minus1, 0, 1)?.squeeze(D::Minus1)?;
        self.repeat_over_batch(&self.categorical.log_prob(&first)?)
    }

    fn batch_shape(&self) -> Vec<usize> {
        vec![self.batch_len]
    }

    fn entropy(&self) -> Result<Tensor> {
        self.repeat_over_batch(&self.categorical.entropy()?)
    }
}
