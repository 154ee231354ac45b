use super::Distribution;
use crate::error::{GfnError, Result};
use candle_core::{D, DType, Tensor};
use candle_nn::ops::log_softmax;
use rand::RngCore;
use rand::distr::Distribution as RandDistribution;
use rand::distr::weighted::WeightedIndex;

#[derive(Debug, Clone)]
pub struct Categorical {
    // normalized log-probabilities, (*batch_shape, num_events)
    logits: Tensor,
}

impl Categorical {
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        if logits.rank() == 0 {
            return Err(GfnError::InvalidDistribution(
                "categorical logits need at least one dimension".into(),
            ));
        }
        let logits = log_softmax(logits, D::Minus1)?;
        Ok(Self { logits })
    }

    pub fn from_probs(probs: &Tensor) -> Result<Self> {
        if probs.rank() == 0 {
            return Err(GfnError::InvalidDistribution(
                "categorical probs need at least one dimension".into(),
            ));
        }
        let min = probs
            .flatten_all()?
            .min(0)?
            .to_dtype(DType::F32)?
            .to_scalar::<f32>()?;
        if min < 0. {
            return Err(GfnError::InvalidDistribution(format!(
                "categorical probs must be non-negative, found {min}"
            )));
        }
        let probs = probs.broadcast_div(&probs.sum_keepdim(D::Minus1)?)?;
        Ok(Self {
            logits: probs.log()?,
        })
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn probs(&self) -> Result<Tensor> {
        Ok(self.logits.exp()?)
    }

    pub fn num_events(&self) -> usize {
        self.logits.dims().last().copied().unwrap_or(0)
    }
}

impl Distribution for Categorical {
    fn sample(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<Tensor> {
        let num_events = self.num_events();
        let rows: Vec<Vec<f32>> = self
            .probs()?
            .to_dtype(DType::F32)?
            .reshape(((), num_events))?
            .to_vec2()?;
        let samplers = rows
            .iter()
            .map(|row| {
                WeightedIndex::new(row).map_err(|err| GfnError::InvalidDistribution(err.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        let n_draws: usize = sample_shape.iter().product();
        let mut samples = Vec::with_capacity(n_draws * samplers.len());
        for _ in 0..n_draws {
            for sampler in samplers.iter() {
                samples.push(sampler.sample(rng) as u32);
            }
        }
        let shape = [sample_shape, &self.batch_shape()].concat();
        Ok(Tensor::from_vec(samples, shape, self.logits.device())?)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let batch_shape = self.batch_shape();
        let dims = value.dims();
        if dims.len() < batch_shape.len() || dims[dims.len() - batch_shape.len()..] != batch_shape[..]
        {
            return Err(GfnError::Shape(format!(
                "value of shape {dims:?} does not end with batch shape {batch_shape:?}"
            )));
        }
        let logits = self
            .logits
            .broadcast_as([dims, &[self.num_events()]].concat())?
            .contiguous()?;
        let index = value
            .to_dtype(DType::U32)?
            .unsqueeze(dims.len())?
            .contiguous()?;
        Ok(logits.gather(&index, D::Minus1)?.squeeze(D::Minus1)?)
    }

    fn batch_shape(&self) -> Vec<usize> {
        let dims = self.logits.dims();
        dims[..dims.len() - 1].to_vec()
    }

    fn entropy(&self) -> Result<Tensor> {
        let probs = self.logits.exp()?;
        // masked events carry -inf logits and zero mass
        let logits = self.logits.clamp(f32::MIN, 0f32)?;
        Ok((probs * logits)?.sum(D::Minus1)?.neg()?)
    }
}
