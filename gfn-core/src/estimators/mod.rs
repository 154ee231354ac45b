//! Function estimators.
//!
//! Training a GFlowNet means parameterizing some of
//! - `s -> (log F(s -> s'))` over the children of `s`,
//! - `s -> P_F(s' | s)` and `s' -> P_B(s | s')`,
//! - `s -> log F(s)`,
//! - and the scalar `log Z`.
//!
//! Each estimator owns a candle module together with the [`VarMap`] holding its
//! parameters, feeds it preprocessed states, and checks the shape of the first
//! output it produces against what the estimator is supposed to represent.
pub mod discrete_policy;
pub mod flow;
pub mod log_z;

use crate::distributions::Distribution;
use crate::env::Env;
use crate::error::{GfnError, Result};
use candle_core::{Device, Tensor, Var};
use candle_nn::{Module, VarMap};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub use discrete_policy::{DiscretePolicyEstimator, SamplingConfig};
pub use flow::{LogEdgeFlowEstimator, LogStateFlowEstimator};
pub use log_z::LogZEstimator;

pub type BoxedModule = Box<dyn Module + Send + Sync>;

pub struct EstimatorModule {
    env: Arc<dyn Env>,
    module: BoxedModule,
    varmap: VarMap,
    output_dim_is_checked: AtomicBool,
}

impl Debug for EstimatorModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstimatorModule")
            .field("env", &self.env)
            .field("output_dim_is_checked", &self.output_dim_is_checked)
            .finish()
    }
}

impl EstimatorModule {
    pub fn new(
        env: Arc<dyn Env>,
        module: impl Module + Send + Sync + 'static,
        varmap: VarMap,
    ) -> Self {
        Self::from_boxed(env, Box::new(module), varmap)
    }

    pub fn from_boxed(env: Arc<dyn Env>, module: BoxedModule, varmap: VarMap) -> Self {
        Self {
            env,
            module,
            varmap,
            output_dim_is_checked: AtomicBool::new(false),
        }
    }

    pub fn env(&self) -> &Arc<dyn Env> {
        &self.env
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Runs the module on preprocessed states, without any shape check.
    pub fn apply(&self, states: &Tensor) -> Result<Tensor> {
        let input = self.env.preprocess(states)?;
        Ok(self.module.forward(&input)?)
    }

    pub fn output_dim_is_checked(&self) -> bool {
        self.output_dim_is_checked.load(Ordering::Acquire)
    }

    fn mark_output_dim_checked(&self) {
        self.output_dim_is_checked.store(true, Ordering::Release);
    }

    pub fn parameters(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn named_parameters(&self) -> Result<HashMap<String, Tensor>> {
        let data = self.varmap.data().lock().map_err(|_| GfnError::Poisoned)?;
        Ok(data
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect())
    }

    /// Overwrites every parameter with the tensor of the same name. The state dict
    /// must match the module exactly: same names and same shapes. Nothing is
    /// written unless every entry checks out.
    pub fn load_state_dict(&mut self, state_dict: &HashMap<String, Tensor>) -> Result<()> {
        let data = self.varmap.data().lock().map_err(|_| GfnError::Poisoned)?;
        if let Some(name) = state_dict.keys().find(|name| !data.contains_key(*name)) {
            return Err(GfnError::UnexpectedParameter(name.clone()));
        }
        let mut updates = Vec::with_capacity(data.len());
        for (name, var) in data.iter() {
            let value = state_dict
                .get(name)
                .ok_or_else(|| GfnError::MissingParameter(name.clone()))?;
            if value.dims() != var.dims() {
                return Err(GfnError::Shape(format!(
                    "parameter `{name}` has shape {:?}, state dict holds {:?}",
                    var.dims(),
                    value.dims()
                )));
            }
            updates.push((var, value.to_dtype(var.dtype())?.to_device(var.device())?));
        }
        for (var, value) in updates {
            var.set(&value)?;
        }
        Ok(())
    }

    pub fn state_dict_bytes(&self) -> Result<Vec<u8>> {
        let named = self.named_parameters()?;
        Ok(safetensors::serialize(named.iter(), None)?)
    }

    pub fn load_state_dict_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let state_dict = candle_core::safetensors::load_buffer(bytes, &Device::Cpu)?;
        self.load_state_dict(&state_dict)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(candle_core::safetensors::save(&self.named_parameters()?, path)?)
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let state_dict = candle_core::safetensors::load(path, &Device::Cpu)?;
        self.load_state_dict(&state_dict)
    }
}

pub(crate) fn output_dim(estimator: &'static str, module_output: &Tensor) -> Result<usize> {
    module_output.dims().last().copied().ok_or_else(|| {
        GfnError::Shape(format!("{estimator} module produced a scalar output"))
    })
}

pub trait FunctionEstimator: Display {
    const NAME: &'static str;

    fn estimator_module(&self) -> &EstimatorModule;

    fn estimator_module_mut(&mut self) -> &mut EstimatorModule;

    /// Fails if the module output does not have the shape this estimator
    /// represents.
    fn check_output_dim(&self, module_output: &Tensor) -> Result<()>;

    /// Calls the module on the preprocessed states. The output shape is
    /// validated on the first call only.
    fn forward(&self, states: &Tensor) -> Result<Tensor> {
        let module = self.estimator_module();
        let out = module.apply(states)?;
        if !module.output_dim_is_checked() {
            self.check_output_dim(&out)?;
            module.mark_output_dim_checked();
            debug!(estimator = Self::NAME, dims = ?out.dims(), "validated module output");
        }
        Ok(out)
    }

    fn env(&self) -> &Arc<dyn Env> {
        self.estimator_module().env()
    }

    fn parameters(&self) -> Vec<Var> {
        self.estimator_module().parameters()
    }

    fn named_parameters(&self) -> Result<HashMap<String, Tensor>> {
        self.estimator_module().named_parameters()
    }

    fn load_state_dict(&mut self, state_dict: &HashMap<String, Tensor>) -> Result<()> {
        self.estimator_module_mut().load_state_dict(state_dict)
    }
}

/// An estimator whose outputs parameterize a distribution over actions.
pub trait ProbabilityEstimator: FunctionEstimator {
    type Dist: Distribution;

    fn to_probability_distribution(
        &self,
        states: &Tensor,
        module_output: &Tensor,
    ) -> Result<Self::Dist>;

    fn distribution(&self, states: &Tensor) -> Result<Self::Dist> {
        let module_output = self.forward(states)?;
        self.to_probability_distribution(states, &module_output)
    }
}
