use super::{EstimatorModule, FunctionEstimator, output_dim};
use crate::env::Env;
use crate::error::{GfnError, Result};
use candle_core::Tensor;
use candle_nn::{Module, VarMap};
use std::fmt::Display;
use std::sync::Arc;

/// `s -> (log F(s -> s + a))_a` for every action `a`. Only discrete
/// environments have a finite set of outgoing edges.
#[derive(Debug)]
pub struct LogEdgeFlowEstimator {
    module: EstimatorModule,
}

impl LogEdgeFlowEstimator {
    pub fn new(
        env: Arc<dyn Env>,
        module: impl Module + Send + Sync + 'static,
        varmap: VarMap,
    ) -> Self {
        Self {
            module: EstimatorModule::new(env, module, varmap),
        }
    }
}

impl FunctionEstimator for LogEdgeFlowEstimator {
    const NAME: &'static str = "LogEdgeFlowEstimator";

    fn estimator_module(&self) -> &EstimatorModule {
        &self.module
    }

    fn estimator_module_mut(&mut self) -> &mut EstimatorModule {
        &mut self.module
    }

    fn check_output_dim(&self, module_output: &Tensor) -> Result<()> {
        let Some(n_actions) = self.env().action_space().n_actions() else {
            return Err(GfnError::UnsupportedEnv(Self::NAME));
        };
        let actual = output_dim(Self::NAME, module_output)?;
        if actual != n_actions {
            return Err(GfnError::OutputDim {
                estimator: Self::NAME,
                expected: n_actions,
                actual,
            });
        }
        Ok(())
    }
}

impl Display for LogEdgeFlowEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", Self::NAME, self.env())
    }
}

/// `s -> log F(s)`.
#[derive(Debug)]
pub struct LogStateFlowEstimator {
    module: EstimatorModule,
}

impl LogStateFlowEstimator {
    pub fn new(
        env: Arc<dyn Env>,
        module: impl Module + Send + Sync + 'static,
        varmap: VarMap,
    ) -> Self {
        Self {
            module: EstimatorModule::new(env, module, varmap),
        }
    }
}

impl FunctionEstimator for LogStateFlowEstimator {
    const NAME: &'static str = "LogStateFlowEstimator";

    fn estimator_module(&self) -> &EstimatorModule {
        &self.module
    }

    fn estimator_module_mut(&mut self) -> &mut EstimatorModule {
        &mut self.module
    }

    fn check_output_dim(&self, module_output: &Tensor) -> Result<()> {
        let actual = output_dim(Self::NAME, module_output)?;
        if actual != 1 {
            return Err(GfnError::OutputDim {
                estimator: Self::NAME,
                expected: 1,
                actual,
            });
        }
        Ok(())
    }
}

impl Display for LogStateFlowEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", Self::NAME, self.env())
    }
}
