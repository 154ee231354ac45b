use super::{Categorical, Distribution};
use crate::error::{GfnError, Result};
use candle_core::{D, Tensor};
use derive_more::Deref;
use rand::RngCore;

/// Categorical whose samples keep a trailing unit axis.
///
/// Discrete actions are stored with an action shape of `(1,)`, so a batch of
/// actions is `(*batch_shape, 1)` rather than `(*batch_shape,)`.
#[derive(Debug, Clone, Deref)]
pub struct UnsqueezedCategorical(Categorical);

impl UnsqueezedCategorical {
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        Ok(Self(Categorical::from_logits(logits)?))
    }

    pub fn from_probs(probs: &Tensor) -> Result<Self> {
        Ok(Self(Categorical::from_probs(probs)?))
    }
}

impl Distribution for UnsqueezedCategorical {
    fn sample(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<Tensor> {
        let out = self.0.sample(sample_shape, rng)?;
        let out = out.unsqueeze(out.rank())?;
        let expected = [sample_shape, &self.batch_shape(), &[1]].concat();
        if out.dims() != expected.as_slice() {
            return Err(GfnError::Shape(format!(
                "unsqueezed sample has shape {:?}, expected {expected:?}",
                out.dims()
            )));
        }
        Ok(out)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        if value.dims().last() != Some(&1) {
            return Err(GfnError::Shape(format!(
                "unsqueezed categorical expects a trailing unit axis, got {:?}",
                value.dims()
            )));
        }
        self.0.log_prob(&value.squeeze(D::Minus1)?)
    }

    fn batch_shape(&self) -> Vec<usize> {
        self.0.batch_shape()
    }

    fn entropy(&self) -> Result<Tensor> {
        self.0.entropy()
    }
}
