use super::{Distribution, DistributionKind};
use crate::error::{GfnError, Result};
use candle_core::{D, Tensor};
use rand::RngCore;
use std::collections::BTreeMap;

/// Product of named component distributions, one per sub-action space.
///
/// Components are treated as a uniform mixture, so the log-probability of a
/// composite sample is the sum of the component log-probabilities.
#[derive(Debug, Clone, Default)]
pub struct CompositeDistribution {
    dists: BTreeMap<String, DistributionKind>,
}

impl CompositeDistribution {
    pub fn new(dists: BTreeMap<String, DistributionKind>) -> Self {
        Self { dists }
    }

    pub fn with_component(mut self, name: impl Into<String>, dist: impl Into<DistributionKind>) -> Self {
        self.dists.insert(name.into(), dist.into());
        self
    }

    pub fn dists(&self) -> &BTreeMap<String, DistributionKind> {
        &self.dists
    }

    pub fn sample(
        &self,
        sample_shape: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<BTreeMap<String, Tensor>> {
        self.dists
            .iter()
            .map(|(name, dist)| Ok((name.clone(), dist.sample(sample_shape, rng)?)))
            .collect()
    }

    pub fn log_prob(&self, sample: &BTreeMap<String, Tensor>) -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for (name, dist) in self.dists.iter() {
            let value = sample.get(name).ok_or_else(|| {
                GfnError::InvalidDistribution(format!("sample has no `{name}` component"))
            })?;
            let Some(&len) = value.dims().first() else {
                return Err(GfnError::Shape(format!(
                    "`{name}` component sample needs a batch axis"
                )));
            };
            let log_prob = dist.log_prob(value)?;
            let per_row = log_prob.elem_count() / len.max(1);
            let log_prob = log_prob.reshape((len, per_row))?.sum(D::Minus1)?;
            total = Some(match total {
                Some(total) => (total + log_prob)?,
                None => log_prob,
            });
        }
        total.ok_or_else(|| {
            GfnError::InvalidDistribution("composite distribution has no components".to_string())
        })
    }
}
