use candle_core::Device;
use gfn_core::Result;
use gfn_core::estimators::ProbabilityEstimator;
use gfn_gflownet::{LogPartitionVarianceGFlowNet, TBGFlowNet};

#[derive(Debug, Clone)]
pub struct GFlowNetBuilder {
    pub on_policy: bool,
    /// Only used by trajectory balance.
    pub init_log_z: f32,
}

impl Default for GFlowNetBuilder {
    fn default() -> Self {
        Self {
            on_policy: false,
            init_log_z: 0.,
        }
    }
}

impl GFlowNetBuilder {
    pub fn build_tb<PF: ProbabilityEstimator, PB: ProbabilityEstimator>(
        &self,
        pf: PF,
        pb: PB,
        device: &Device,
    ) -> Result<TBGFlowNet<PF, PB>> {
        TBGFlowNet::new(pf, pb, self.on_policy, self.init_log_z, device)
    }

    pub fn build_log_partition_variance<PF: ProbabilityEstimator, PB: ProbabilityEstimator>(
        &self,
        pf: PF,
        pb: PB,
    ) -> LogPartitionVarianceGFlowNet<PF, PB> {
        LogPartitionVarianceGFlowNet::new(pf, pb, self.on_policy)
    }
}
