use crate::GFlowNet;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use gfn_core::Result;
use std::fmt::Debug;
use tracing::debug;

/// Backpropagates `loss` and rescales the gradients of `vars` so that their
/// global L2 norm is at most `max_norm`.
pub fn clip_grad(loss: &Tensor, vars: &[Var], max_norm: f32) -> Result<GradStore> {
    let mut grad_store = loss.backward()?;
    let mut total_norm_squared = 0.0f32;
    for var in vars.iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
        debug!(total_norm, max_norm, "clipping gradients");
        for var in vars.iter() {
            if let Some(grad) = grad_store.get(var.as_tensor()) {
                let clipped = (grad * clip_coef)?;
                grad_store.insert(var.as_tensor(), clipped);
            }
        }
    }
    Ok(grad_store)
}

/// AdamW over the policy parameters, with a separate AdamW for `log Z`.
pub struct GFlowNetOptimizer {
    optimizer: AdamW,
    log_z_optimizer: Option<AdamW>,
    vars: Vec<Var>,
    max_grad_norm: Option<f32>,
}

impl Debug for GFlowNetOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GFlowNetOptimizer")
            .field("optimizer", &self.optimizer)
            .field("log_z_optimizer", &self.log_z_optimizer)
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl GFlowNetOptimizer {
    pub fn new(
        module_vars: Vec<Var>,
        log_z_vars: Vec<Var>,
        params: ParamsAdamW,
        log_z_lr: f64,
        max_grad_norm: Option<f32>,
    ) -> Result<Self> {
        let mut vars = module_vars.clone();
        vars.extend(log_z_vars.iter().cloned());
        let optimizer = AdamW::new(module_vars, params.clone())?;
        let log_z_optimizer = if log_z_vars.is_empty() {
            None
        } else {
            Some(AdamW::new(
                log_z_vars,
                ParamsAdamW {
                    lr: log_z_lr,
                    ..params
                },
            )?)
        };
        Ok(Self {
            optimizer,
            log_z_optimizer,
            vars,
            max_grad_norm,
        })
    }

    pub fn for_gflownet(
        gflownet: &impl GFlowNet,
        params: ParamsAdamW,
        log_z_lr: f64,
        max_grad_norm: Option<f32>,
    ) -> Result<Self> {
        Self::new(
            gflownet.module_parameters(),
            gflownet.log_z_parameters(),
            params,
            log_z_lr,
            max_grad_norm,
        )
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = match self.max_grad_norm {
            Some(max_norm) => clip_grad(loss, &self.vars, max_norm)?,
            None => loss.backward()?,
        };
        self.optimizer.step(&grads)?;
        if let Some(log_z_optimizer) = self.log_z_optimizer.as_mut() {
            log_z_optimizer.step(&grads)?;
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr)
    }
}
