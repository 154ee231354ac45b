use super::{EstimatorModule, FunctionEstimator, ProbabilityEstimator, output_dim};
use crate::distributions::UnsqueezedCategorical;
use crate::env::Env;
use crate::error::{GfnError, Result};
use candle_core::{D, DType, Tensor};
use candle_nn::ops::softmax;
use candle_nn::{Module, VarMap};
use std::fmt::Display;
use std::sync::Arc;

/// Exploration knobs applied when drawing actions. They never reach the
/// log-probabilities the losses are computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f64,
    /// Subtracted from the exit logit of forward policies.
    pub sf_bias: f64,
    /// Weight of the uniform distribution over allowed actions.
    pub epsilon: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.,
            sf_bias: 0.,
            epsilon: 0.,
        }
    }
}

/// Forward (`P_F`) or backward (`P_B`) policy over a discrete action space.
///
/// The module outputs one logit per action: `n_actions` going forward, and
/// `n_actions - 1` going backward since the exit action has no inverse.
#[derive(Debug)]
pub struct DiscretePolicyEstimator {
    module: EstimatorModule,
    is_backward: bool,
    sampling: SamplingConfig,
}

impl DiscretePolicyEstimator {
    pub fn new(
        env: Arc<dyn Env>,
        module: impl Module + Send + Sync + 'static,
        varmap: VarMap,
        is_backward: bool,
    ) -> Self {
        Self {
            module: EstimatorModule::new(env, module, varmap),
            is_backward,
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn set_sampling(&mut self, sampling: SamplingConfig) {
        self.sampling = sampling;
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    pub fn is_backward(&self) -> bool {
        self.is_backward
    }

    pub fn expected_output_dim(&self) -> Result<usize> {
        let Some(n_actions) = self.env().action_space().n_actions() else {
            return Err(GfnError::UnsupportedEnv(Self::NAME));
        };
        if self.is_backward {
            Ok(n_actions.saturating_sub(1))
        } else {
            Ok(n_actions)
        }
    }
}

impl FunctionEstimator for DiscretePolicyEstimator {
    const NAME: &'static str = "DiscretePolicyEstimator";

    fn estimator_module(&self) -> &EstimatorModule {
        &self.module
    }

    fn estimator_module_mut(&mut self) -> &mut EstimatorModule {
        &mut self.module
    }

    fn check_output_dim(&self, module_output: &Tensor) -> Result<()> {
        let expected = self.expected_output_dim()?;
        let actual = output_dim(Self::NAME, module_output)?;
        if actual != expected {
            return Err(GfnError::OutputDim {
                estimator: Self::NAME,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

impl ProbabilityEstimator for DiscretePolicyEstimator {
    type Dist = UnsqueezedCategorical;

    /// The policy itself, as trained by the losses. Exploration settings are
    /// left out; see [`DiscretePolicyEstimator::sampling_distribution`].
    fn to_probability_distribution(
        &self,
        states: &Tensor,
        module_output: &Tensor,
    ) -> Result<UnsqueezedCategorical> {
        self.to_probability_distribution_with(states, module_output, &SamplingConfig::default())
    }
}

impl DiscretePolicyEstimator {
    /// Distribution used to draw actions: the policy with the configured
    /// temperature, exit bias and uniform mixing applied.
    pub fn sampling_distribution(&self, states: &Tensor) -> Result<UnsqueezedCategorical> {
        let module_output = self.forward(states)?;
        self.to_probability_distribution_with(states, &module_output, &self.sampling)
    }

    pub fn to_probability_distribution_with(
        &self,
        states: &Tensor,
        module_output: &Tensor,
        sampling: &SamplingConfig,
    ) -> Result<UnsqueezedCategorical> {
        let masks = if self.is_backward {
            self.env().backward_masks(states)?
        } else {
            self.env().forward_masks(states)?
        };
        let mut logits = module_output.clone();
        if let Some(masks) = &masks {
            let neg_inf = Tensor::full(f32::NEG_INFINITY, logits.shape(), logits.device())?
                .to_dtype(logits.dtype())?;
            logits = masks
                .to_dtype(DType::U8)?
                .broadcast_as(logits.shape())?
                .where_cond(&logits, &neg_inf)?;
        }
        if !self.is_backward && sampling.sf_bias != 0. {
            let n_actions = output_dim(Self::NAME, &logits)?;
            if n_actions == 0 {
                return Err(GfnError::Shape(format!(
                    "{} has no exit action to bias",
                    Self::NAME
                )));
            }
            let mut bias = vec![0f32; n_actions];
            bias[n_actions - 1] = sampling.sf_bias as f32;
            let bias = Tensor::from_vec(bias, n_actions, logits.device())?.to_dtype(logits.dtype())?;
            logits = logits.broadcast_sub(&bias)?;
        }
        if sampling.temperature != 1. {
            logits = (logits / sampling.temperature)?;
        }
        if sampling.epsilon == 0. {
            return UnsqueezedCategorical::from_logits(&logits);
        }
        let probs = softmax(&logits, D::Minus1)?;
        let allowed = match &masks {
            Some(masks) => masks
                .to_dtype(probs.dtype())?
                .broadcast_as(probs.shape())?
                .contiguous()?,
            None => probs.ones_like()?,
        };
        let uniform = allowed.broadcast_div(&allowed.sum_keepdim(D::Minus1)?)?;
        let epsilon = sampling.epsilon;
        let probs = ((probs * (1. - epsilon))? + (uniform * epsilon)?)?;
        UnsqueezedCategorical::from_probs(&probs)
    }
}

impl Display for DiscretePolicyEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let direction = if self.is_backward { "backward" } else { "forward" };
        write!(f, "{}({}, {direction})", Self::NAME, self.env())
    }
}
