//! Trajectory Balance (<https://arxiv.org/abs/2201.13259>) and Log Partition
//! Variance (<https://arxiv.org/abs/2302.05446>) losses.
use crate::GFlowNet;
use crate::trajectory_based::TrajectoryBasedGFlowNet;
use candle_core::{DType, Device, Tensor, Var};
use gfn_core::estimators::{FunctionEstimator, LogZEstimator, ProbabilityEstimator};
use gfn_core::tensors::Loss;
use gfn_core::trajectories::Trajectories;
use gfn_core::{GfnError, Result};
use tracing::debug;

fn checked_loss(loss: Tensor) -> Result<(Loss, f32)> {
    let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    if value.is_nan() {
        return Err(GfnError::NanLoss);
    }
    Ok((Loss(loss), value))
}

/// Learns `log Z` jointly with the policies:
/// `loss = mean((log Z + sum log P_F - sum log P_B - log R)^2)`.
#[derive(Debug)]
pub struct TBGFlowNet<PF, PB> {
    pf: PF,
    pb: PB,
    log_z: LogZEstimator,
    on_policy: bool,
}

impl<PF: ProbabilityEstimator, PB: ProbabilityEstimator> TBGFlowNet<PF, PB> {
    pub fn new(pf: PF, pb: PB, on_policy: bool, init_log_z: f32, device: &Device) -> Result<Self> {
        Ok(Self {
            pf,
            pb,
            log_z: LogZEstimator::from_value(init_log_z, device)?,
            on_policy,
        })
    }

    pub fn log_z(&self) -> &LogZEstimator {
        &self.log_z
    }

    pub fn log_z_mut(&mut self) -> &mut LogZEstimator {
        &mut self.log_z
    }

    pub fn pf_mut(&mut self) -> &mut PF {
        &mut self.pf
    }

    pub fn pb_mut(&mut self) -> &mut PB {
        &mut self.pb
    }
}

impl<PF: ProbabilityEstimator, PB: ProbabilityEstimator> TrajectoryBasedGFlowNet
    for TBGFlowNet<PF, PB>
{
    type PF = PF;
    type PB = PB;

    fn pf(&self) -> &PF {
        &self.pf
    }

    fn pb(&self) -> &PB {
        &self.pb
    }

    fn on_policy(&self) -> bool {
        self.on_policy
    }
}

impl<PF: ProbabilityEstimator, PB: ProbabilityEstimator> GFlowNet for TBGFlowNet<PF, PB> {
    fn loss<T: Trajectories>(
        &self,
        trajectories: &T,
        estimator_outputs: Option<&Tensor>,
    ) -> Result<Loss> {
        let (_, _, scores) = self.get_trajectories_scores(trajectories, estimator_outputs)?;
        let log_z = self.log_z.as_tensor().to_dtype(scores.dtype())?;
        let loss = scores
            .broadcast_add(&log_z)?
            .sqr()?
            .mean_all()?;
        let (loss, value) = checked_loss(loss)?;
        debug!(loss = value, log_z = %self.log_z, "trajectory balance loss");
        Ok(loss)
    }

    fn module_parameters(&self) -> Vec<Var> {
        let mut parameters = self.pf.parameters();
        parameters.extend(self.pb.parameters());
        parameters
    }

    fn log_z_parameters(&self) -> Vec<Var> {
        self.log_z.parameters()
    }
}

/// Replaces the learned `log Z` by the batch estimate:
/// `loss = mean((score - mean(score))^2)`.
#[derive(Debug)]
pub struct LogPartitionVarianceGFlowNet<PF, PB> {
    pf: PF,
    pb: PB,
    on_policy: bool,
}

impl<PF: ProbabilityEstimator, PB: ProbabilityEstimator> LogPartitionVarianceGFlowNet<PF, PB> {
    pub fn new(pf: PF, pb: PB, on_policy: bool) -> Self {
        Self { pf, pb, on_policy }
    }
}

impl<PF: ProbabilityEstimator, PB: ProbabilityEstimator> TrajectoryBasedGFlowNet
    for LogPartitionVarianceGFlowNet<PF, PB>
{
    type PF = PF;
    type PB = PB;

    fn pf(&self) -> &PF {
        &self.pf
    }

    fn pb(&self) -> &PB {
        &self.pb
    }

    fn on_policy(&self) -> bool {
        self.on_policy
    }
}

impl<PF: ProbabilityEstimator, PB: ProbabilityEstimator> GFlowNet
    for LogPartitionVarianceGFlowNet<PF, PB>
{
    fn loss<T: Trajectories>(
        &self,
        trajectories: &T,
        estimator_outputs: Option<&Tensor>,
    ) -> Result<Loss> {
        let (_, _, scores) = self.get_trajectories_scores(trajectories, estimator_outputs)?;
        let loss = scores
            .broadcast_sub(&scores.mean_all()?)?
            .sqr()?
            .mean_all()?;
        let (loss, value) = checked_loss(loss)?;
        debug!(loss = value, "log partition variance loss");
        Ok(loss)
    }

    fn module_parameters(&self) -> Vec<Var> {
        let mut parameters = self.pf.parameters();
        parameters.extend(self.pb.parameters());
        parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;
    use gfn_core::env::{ActionSpace, Env};
    use gfn_core::estimators::{DiscretePolicyEstimator, SamplingConfig};
    use std::f32::consts::LN_2;
    use std::fmt::Display;
    use std::sync::Arc;

    // Two actions: 0 moves on, 1 exits.
    #[derive(Debug)]
    struct TwoActionEnv {
        forward_masks: Option<Tensor>,
    }

    impl Display for TwoActionEnv {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TwoActionEnv")
        }
    }

    impl Env for TwoActionEnv {
        fn preprocess(&self, states: &Tensor) -> Result<Tensor> {
            Ok(states.to_dtype(DType::F32)?)
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::Discrete(2)
        }

        fn forward_masks(&self, states: &Tensor) -> Result<Option<Tensor>> {
            match &self.forward_masks {
                Some(mask) => Ok(Some(mask.broadcast_as((states.dim(0)?, 2))?.contiguous()?)),
                None => Ok(None),
            }
        }
    }

    struct Batch {
        states: Tensor,
        actions: Tensor,
        is_dummy: Tensor,
        is_exit: Tensor,
        log_rewards: Tensor,
        log_probs: Option<Tensor>,
    }

    impl Trajectories for Batch {
        fn states(&self) -> &Tensor {
            &self.states
        }

        fn actions(&self) -> &Tensor {
            &self.actions
        }

        fn is_dummy_action(&self) -> &Tensor {
            &self.is_dummy
        }

        fn is_exit_action(&self) -> &Tensor {
            &self.is_exit
        }

        fn log_rewards(&self) -> &Tensor {
            &self.log_rewards
        }

        fn log_probs(&self) -> Option<&Tensor> {
            self.log_probs.as_ref()
        }
    }

    // First trajectory moves once then exits, the second exits right away.
    fn batch() -> Result<Batch> {
        let device = Device::Cpu;
        Ok(Batch {
            states: Tensor::new(&[[[0f32], [0.]], [[1.], [-1.]], [[-1.], [-1.]]], &device)?,
            actions: Tensor::new(&[[[0u32], [1]], [[1], [0]]], &device)?,
            is_dummy: Tensor::new(&[[0u8, 0], [0, 1]], &device)?,
            is_exit: Tensor::new(&[[0u8, 1], [1, 0]], &device)?,
            log_rewards: Tensor::new(&[LN_2, 0.], &device)?,
            log_probs: None,
        })
    }

    fn policies(
        forward_masks: Option<Tensor>,
    ) -> (DiscretePolicyEstimator, DiscretePolicyEstimator) {
        policies_in(forward_masks, DType::F32)
    }

    fn policies_in(
        forward_masks: Option<Tensor>,
        dtype: DType,
    ) -> (DiscretePolicyEstimator, DiscretePolicyEstimator) {
        let env: Arc<dyn Env> = Arc::new(TwoActionEnv { forward_masks });
        let uniform = move |width: usize| {
            move |xs: &Tensor| Tensor::zeros((xs.dim(0)?, width), dtype, xs.device())
        };
        let pf = DiscretePolicyEstimator::new(env.clone(), uniform(2), VarMap::new(), false);
        let pb = DiscretePolicyEstimator::new(env, uniform(1), VarMap::new(), true);
        (pf, pb)
    }

    #[test]
    fn per_step_log_probs() -> Result<()> {
        let (pf, pb) = policies(None);
        let gfn = LogPartitionVarianceGFlowNet::new(pf, pb, false);
        let (log_pf, log_pb) = gfn.get_pfs_and_pbs(&batch()?, None)?;
        let log_pf: Vec<Vec<f32>> = log_pf.to_vec2()?;
        let log_pb: Vec<Vec<f32>> = log_pb.to_vec2()?;
        assert!((log_pf[0][0] + LN_2).abs() < 1e-5);
        assert!((log_pf[0][1] + LN_2).abs() < 1e-5);
        assert!((log_pf[1][0] + LN_2).abs() < 1e-5);
        assert_eq!(log_pf[1][1], 0.);
        assert_eq!(log_pb, vec![vec![0., 0.], vec![0., 0.]]);
        Ok(())
    }

    #[test]
    fn trajectory_balance_loss() -> Result<()> {
        let (pf, pb) = policies(None);
        let gfn = TBGFlowNet::new(pf, pb, false, 0., &Device::Cpu)?;
        let (_, _, scores) = gfn.get_trajectories_scores(&batch()?, None)?;
        let scores: Vec<f32> = scores.to_vec1()?;
        assert!((scores[0] + 3. * LN_2).abs() < 1e-5);
        assert!((scores[1] + LN_2).abs() < 1e-5);

        let loss = gfn.loss(&batch()?, None)?;
        assert!((loss.to_scalar::<f32>()? - 5. * LN_2 * LN_2).abs() < 1e-5);
        let grads = loss.backward()?;
        let log_z_grad = grads
            .get(gfn.log_z().as_tensor())
            .map(|grad| grad.to_scalar::<f32>())
            .transpose()?;
        assert!((log_z_grad.unwrap_or_default() + 4. * LN_2).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn trajectory_balance_uses_log_z() -> Result<()> {
        let (pf, pb) = policies(None);
        let gfn = TBGFlowNet::new(pf, pb, false, 2. * LN_2, &Device::Cpu)?;
        let loss = gfn.loss(&batch()?, None)?;
        assert!((loss.to_scalar::<f32>()? - LN_2 * LN_2).abs() < 1e-5);
        assert_eq!(gfn.parameters().len(), 1);
        Ok(())
    }

    #[test]
    fn log_partition_variance_loss() -> Result<()> {
        let (pf, pb) = policies(None);
        let gfn = LogPartitionVarianceGFlowNet::new(pf, pb, false);
        let loss = gfn.loss(&batch()?, None)?;
        assert!((loss.to_scalar::<f32>()? - LN_2 * LN_2).abs() < 1e-5);
        assert!(gfn.log_z_parameters().is_empty());
        Ok(())
    }

    #[test]
    fn on_policy_reuses_recorded_log_probs() -> Result<()> {
        let (pf, pb) = policies(None);
        let gfn = TBGFlowNet::new(pf, pb, true, 0., &Device::Cpu)?;
        assert!(matches!(
            gfn.loss(&batch()?, None),
            Err(GfnError::MissingLogProbs)
        ));
        let mut batch = batch()?;
        batch.log_probs = Some(Tensor::new(&[[-1f32, -1.], [-1., 0.]], &Device::Cpu)?);
        let (total_log_pf, _, _) = gfn.get_trajectories_scores(&batch, None)?;
        assert_eq!(total_log_pf.to_vec1::<f32>()?, vec![-2., -1.]);
        Ok(())
    }

    #[test]
    fn forbidden_actions_make_scores_infinite() -> Result<()> {
        // exiting is never allowed, yet both trajectories exit
        let mask = Tensor::new(&[[1u8, 0]], &Device::Cpu)?;
        let (pf, pb) = policies(Some(mask));
        let gfn = TBGFlowNet::new(pf, pb, false, 0., &Device::Cpu)?;
        assert!(matches!(
            gfn.loss(&batch()?, None),
            Err(GfnError::InfiniteLogProbs)
        ));
        Ok(())
    }

    #[test]
    fn precomputed_outputs_must_cover_valid_states() -> Result<()> {
        let (pf, pb) = policies(None);
        let gfn = TBGFlowNet::new(pf, pb, false, 0., &Device::Cpu)?;
        let outputs = Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            gfn.loss(&batch()?, Some(&outputs)),
            Err(GfnError::Shape(_))
        ));
        let outputs = Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?;
        let loss = gfn.loss(&batch()?, Some(&outputs))?;
        assert!((loss.to_scalar::<f32>()? - 5. * LN_2 * LN_2).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn exploration_does_not_change_scores() -> Result<()> {
        let env: Arc<dyn Env> = Arc::new(TwoActionEnv {
            forward_masks: None,
        });
        let skewed =
            |xs: &Tensor| Tensor::new(&[[2f32, -1.]], xs.device())?.repeat((xs.dim(0)?, 1));
        let uniform = |xs: &Tensor| Tensor::zeros((xs.dim(0)?, 1), DType::F32, xs.device());
        let plain = TBGFlowNet::new(
            DiscretePolicyEstimator::new(env.clone(), skewed, VarMap::new(), false),
            DiscretePolicyEstimator::new(env.clone(), uniform, VarMap::new(), true),
            false,
            0.,
            &Device::Cpu,
        )?;
        let exploring = TBGFlowNet::new(
            DiscretePolicyEstimator::new(env.clone(), skewed, VarMap::new(), false).with_sampling(
                SamplingConfig {
                    temperature: 2.,
                    sf_bias: 1.,
                    epsilon: 0.5,
                },
            ),
            DiscretePolicyEstimator::new(env, uniform, VarMap::new(), true),
            false,
            0.,
            &Device::Cpu,
        )?;
        let (plain_pf, _, plain_scores) = plain.get_trajectories_scores(&batch()?, None)?;
        let (exploring_pf, _, exploring_scores) =
            exploring.get_trajectories_scores(&batch()?, None)?;
        assert_eq!(plain_pf.to_vec1::<f32>()?, exploring_pf.to_vec1::<f32>()?);
        assert_eq!(plain_scores.to_vec1::<f32>()?, exploring_scores.to_vec1::<f32>()?);
        assert_eq!(
            plain.loss(&batch()?, None)?.to_scalar::<f32>()?,
            exploring.loss(&batch()?, None)?.to_scalar::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn trajectory_balance_with_f64_policies() -> Result<()> {
        let (pf, pb) = policies_in(None, DType::F64);
        let gfn = TBGFlowNet::new(pf, pb, false, 0., &Device::Cpu)?;
        let (log_pf, log_pb) = gfn.get_pfs_and_pbs(&batch()?, None)?;
        assert_eq!(log_pf.dtype(), DType::F64);
        assert_eq!(log_pb.dtype(), DType::F64);
        let loss = gfn.loss(&batch()?, None)?;
        let ln_2 = std::f64::consts::LN_2;
        assert!((loss.to_scalar::<f64>()? - 5. * ln_2 * ln_2).abs() < 1e-5);
        let grads = loss.backward()?;
        assert!(grads.get(gfn.log_z().as_tensor()).is_some());
        Ok(())
    }

    #[test]
    fn padding_contributes_nothing() -> Result<()> {
        let device = Device::Cpu;
        let padded = Batch {
            states: Tensor::full(-1f32, (3, 2, 1), &device)?,
            actions: Tensor::zeros((2, 2, 1), DType::U32, &device)?,
            is_dummy: Tensor::ones((2, 2), DType::U8, &device)?,
            is_exit: Tensor::zeros((2, 2), DType::U8, &device)?,
            log_rewards: Tensor::new(&[LN_2, 0.], &device)?,
            log_probs: None,
        };
        let (pf, pb) = policies(None);
        let gfn = LogPartitionVarianceGFlowNet::new(pf, pb, false);
        let (log_pf, log_pb) = gfn.get_pfs_and_pbs(&padded, None)?;
        assert_eq!(log_pf.to_vec2::<f32>()?, vec![vec![0., 0.]; 2]);
        assert_eq!(log_pb.to_vec2::<f32>()?, vec![vec![0., 0.]; 2]);
        let (_, _, scores) = gfn.get_trajectories_scores(&padded, None)?;
        assert_eq!(scores.to_vec1::<f32>()?, vec![-LN_2, 0.]);
        Ok(())
    }

    #[test]
    fn trajectories_without_steps() -> Result<()> {
        let device = Device::Cpu;
        let empty = Batch {
            states: Tensor::zeros((1, 2, 1), DType::F32, &device)?,
            actions: Tensor::zeros((0, 2, 1), DType::U32, &device)?,
            is_dummy: Tensor::zeros((0, 2), DType::U8, &device)?,
            is_exit: Tensor::zeros((0, 2), DType::U8, &device)?,
            log_rewards: Tensor::zeros(2, DType::F32, &device)?,
            log_probs: None,
        };
        let (pf, pb) = policies(None);
        let gfn = TBGFlowNet::new(pf, pb, false, 0., &device)?;
        let (total_log_pf, total_log_pb, scores) = gfn.get_trajectories_scores(&empty, None)?;
        assert_eq!(total_log_pf.to_vec1::<f32>()?, vec![0., 0.]);
        assert_eq!(total_log_pb.to_vec1::<f32>()?, vec![0., 0.]);
        assert_eq!(scores.to_vec1::<f32>()?, vec![0., 0.]);
        Ok(())
    }

    #[test]
    fn immediate_exits_need_no_backward_policy() -> Result<()> {
        let device = Device::Cpu;
        let exits = Batch {
            states: Tensor::new(&[[[0f32], [0.]], [[-1.], [-1.]]], &device)?,
            actions: Tensor::new(&[[[1u32], [1]]], &device)?,
            is_dummy: Tensor::zeros((1, 2), DType::U8, &device)?,
            is_exit: Tensor::ones((1, 2), DType::U8, &device)?,
            log_rewards: Tensor::zeros(2, DType::F32, &device)?,
            log_probs: None,
        };
        let (pf, pb) = policies(None);
        let gfn = TBGFlowNet::new(pf, pb, false, 0., &device)?;
        let (log_pf, log_pb) = gfn.get_pfs_and_pbs(&exits, None)?;
        for log_pf in log_pf.to_vec2::<f32>()?[0].iter() {
            assert!((log_pf + LN_2).abs() < 1e-5);
        }
        assert_eq!(log_pb.to_vec2::<f32>()?, vec![vec![0., 0.]]);
        Ok(())
    }

    #[test]
    fn large_f64_totals_are_finite() -> Result<()> {
        let total = Tensor::new(&[1e300f64, -1e300], &Device::Cpu)?;
        assert!(!crate::trajectory_based::has_inf(&total)?);
        let total = Tensor::new(&[f64::NEG_INFINITY, 0.], &Device::Cpu)?;
        assert!(crate::trajectory_based::has_inf(&total)?);
        Ok(())
    }
}
