use candle_nn::ParamsAdamW;
use gfn_core::Result;
use gfn_gflownet::GFlowNet;
use gfn_gflownet::optimizer::GFlowNetOptimizer;

#[derive(Debug, Clone)]
pub struct OptimizerBuilder {
    pub lr: f64,
    pub log_z_lr: f64,
    pub weight_decay: f64,
    pub max_grad_norm: Option<f32>,
}

impl Default for OptimizerBuilder {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            log_z_lr: 1e-1,
            weight_decay: 0.,
            max_grad_norm: None,
        }
    }
}

impl OptimizerBuilder {
    pub fn build(&self, gflownet: &impl GFlowNet) -> Result<GFlowNetOptimizer> {
        let params = ParamsAdamW {
            lr: self.lr,
            weight_decay: self.weight_decay,
            ..Default::default()
        };
        GFlowNetOptimizer::for_gflownet(gflownet, params, self.log_z_lr, self.max_grad_norm)
    }
}
