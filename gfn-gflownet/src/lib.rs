pub mod optimizer;
pub mod trajectory_balance;
pub mod trajectory_based;

use candle_core::{Tensor, Var};
use gfn_core::Result;
use gfn_core::tensors::Loss;
use gfn_core::trajectories::Trajectories;

pub use trajectory_balance::{LogPartitionVarianceGFlowNet, TBGFlowNet};
pub use trajectory_based::TrajectoryBasedGFlowNet;

pub trait GFlowNet {
    /// Scalar training signal for a batch of trajectories. `estimator_outputs`
    /// are precomputed forward-policy outputs for the valid states, in the
    /// order `get_pfs_and_pbs` visits them.
    fn loss<T: Trajectories>(
        &self,
        trajectories: &T,
        estimator_outputs: Option<&Tensor>,
    ) -> Result<Loss>;

    /// Parameters of the policy modules.
    fn module_parameters(&self) -> Vec<Var>;

    /// Parameters usually trained with their own learning rate.
    fn log_z_parameters(&self) -> Vec<Var> {
        Vec::new()
    }

    fn parameters(&self) -> Vec<Var> {
        let mut parameters = self.module_parameters();
        parameters.extend(self.log_z_parameters());
        parameters
    }
}
