use super::mlp::{Mlp, build_mlp};
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use gfn_core::Result;
use gfn_core::env::Env;
use gfn_core::estimators::{
    DiscretePolicyEstimator, LogEdgeFlowEstimator, LogStateFlowEstimator, SamplingConfig,
};
use std::sync::Arc;

/// Builds estimators backed by freshly initialized MLPs, each with its own
/// `VarMap`.
#[derive(Debug, Clone)]
pub struct EstimatorBuilder {
    pub hidden_layers: Vec<usize>,
    pub sampling: SamplingConfig,
    pub device: Device,
}

impl Default for EstimatorBuilder {
    fn default() -> Self {
        Self {
            hidden_layers: vec![256, 256],
            sampling: SamplingConfig::default(),
            device: Device::Cpu,
        }
    }
}

impl EstimatorBuilder {
    fn mlp(&self, input_dim: usize, output_dim: usize, prefix: &str) -> Result<(Mlp, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let layers = [&self.hidden_layers[..], &[output_dim]].concat();
        let mlp = build_mlp(input_dim, &layers, &vb, prefix)?;
        Ok((mlp, varmap))
    }

    fn n_actions<E: Env + 'static>(env: &E, estimator: &'static str) -> Result<usize> {
        env.action_space()
            .n_actions()
            .ok_or(gfn_core::GfnError::UnsupportedEnv(estimator))
    }

    /// `input_dim` is the width of the preprocessed states.
    pub fn build_pf<E: Env + 'static>(&self, env: Arc<E>, input_dim: usize) -> Result<DiscretePolicyEstimator> {
        let n_actions = Self::n_actions(env.as_ref(), "DiscretePolicyEstimator")?;
        let (mlp, varmap) = self.mlp(input_dim, n_actions, "pf")?;
        Ok(DiscretePolicyEstimator::new(env, mlp, varmap, false).with_sampling(self.sampling))
    }

    pub fn build_pb<E: Env + 'static>(&self, env: Arc<E>, input_dim: usize) -> Result<DiscretePolicyEstimator> {
        let n_actions = Self::n_actions(env.as_ref(), "DiscretePolicyEstimator")?;
        let (mlp, varmap) = self.mlp(input_dim, n_actions.saturating_sub(1), "pb")?;
        Ok(DiscretePolicyEstimator::new(env, mlp, varmap, true))
    }

    pub fn build_log_edge_flow<E: Env + 'static>(
        &self,
        env: Arc<E>,
        input_dim: usize,
    ) -> Result<LogEdgeFlowEstimator> {
        let n_actions = Self::n_actions(env.as_ref(), "LogEdgeFlowEstimator")?;
        let (mlp, varmap) = self.mlp(input_dim, n_actions, "edge_flow")?;
        Ok(LogEdgeFlowEstimator::new(env, mlp, varmap))
    }

    pub fn build_log_state_flow<E: Env + 'static>(
        &self,
        env: Arc<E>,
        input_dim: usize,
    ) -> Result<LogStateFlowEstimator> {
        let (mlp, varmap) = self.mlp(input_dim, 1, "state_flow")?;
        Ok(LogStateFlowEstimator::new(env, mlp, varmap))
    }
}
