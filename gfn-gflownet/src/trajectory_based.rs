use candle_core::{DType, Device, Tensor};
use gfn_core::distributions::Distribution;
use gfn_core::estimators::{FunctionEstimator, ProbabilityEstimator};
use gfn_core::tensors::{LogPb, LogPf, Scores};
use gfn_core::trajectories::Trajectories;
use gfn_core::{GfnError, Result};
use tracing::trace;

fn flags(mask: &Tensor) -> Result<Vec<bool>> {
    Ok(mask
        .flatten_all()?
        .to_dtype(DType::U8)?
        .to_vec1::<u8>()?
        .into_iter()
        .map(|flag| flag != 0)
        .collect())
}

pub(crate) fn has_inf(t: &Tensor) -> Result<bool> {
    let t = t.flatten_all()?;
    Ok(match t.dtype() {
        DType::F64 => t.to_vec1::<f64>()?.iter().any(|v| v.is_infinite()),
        _ => t
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?
            .iter()
            .any(|v| v.is_infinite()),
    })
}

// Picks the (t, b) steps listed in `positions` out of a time-major tensor.
fn select_steps(t: &Tensor, positions: &Tensor) -> Result<Tensor> {
    let dims = t.dims();
    let flat_dims = [&[dims[0] * dims[1]][..], &dims[2..]].concat();
    Ok(t.reshape(flat_dims)?.index_select(positions, 0)?)
}

// Inverse of `select_steps` for one value per step, padding with zeros.
fn scatter_steps(
    values: &Tensor,
    positions: &Tensor,
    max_len: usize,
    n_traj: usize,
) -> Result<Tensor> {
    let out = Tensor::zeros(max_len * n_traj, values.dtype(), values.device())?;
    Ok(out
        .index_add(positions, values, 0)?
        .reshape((max_len, n_traj))?)
}

fn positions(keep: impl Iterator<Item = bool>, device: &Device) -> Result<Option<Tensor>> {
    let positions = keep
        .enumerate()
        .filter_map(|(i, keep)| keep.then_some(i as u32))
        .collect::<Vec<_>>();
    if positions.is_empty() {
        return Ok(None);
    }
    let len = positions.len();
    Ok(Some(Tensor::from_vec(positions, len, device)?))
}

fn check_layout<T: Trajectories>(trajectories: &T) -> Result<()> {
    let max_len = trajectories.max_length();
    let n_traj = trajectories.n_trajectories();
    let states = trajectories.states().dims();
    if states.len() < 2 || states[0] != max_len + 1 || states[1] != n_traj {
        return Err(GfnError::Shape(format!(
            "states of shape {states:?} do not match {max_len} steps over {n_traj} trajectories"
        )));
    }
    for (name, mask) in [
        ("dummy action mask", trajectories.is_dummy_action()),
        ("exit action mask", trajectories.is_exit_action()),
    ] {
        if mask.dims() != [max_len, n_traj] {
            return Err(GfnError::Shape(format!(
                "{name} has shape {:?}, expected {:?}",
                mask.dims(),
                [max_len, n_traj]
            )));
        }
    }
    if trajectories.log_rewards().dims() != [n_traj] {
        return Err(GfnError::Shape(format!(
            "log rewards have shape {:?}, expected [{n_traj}]",
            trajectories.log_rewards().dims()
        )));
    }
    Ok(())
}

/// A GFlowNet scored on complete trajectories through its forward and
/// backward policies.
pub trait TrajectoryBasedGFlowNet {
    type PF: ProbabilityEstimator;
    type PB: ProbabilityEstimator;

    fn pf(&self) -> &Self::PF;

    fn pb(&self) -> &Self::PB;

    /// On-policy GFlowNets reuse the forward log-probabilities recorded while
    /// sampling instead of re-evaluating `P_F`.
    fn on_policy(&self) -> bool;

    /// Per-step `log P_F` and `log P_B`, both `(max_len, n_traj)` with zeros on
    /// steps that do not contribute. Both come out in the dtype of `log P_F`.
    fn get_pfs_and_pbs<T: Trajectories>(
        &self,
        trajectories: &T,
        estimator_outputs: Option<&Tensor>,
    ) -> Result<(LogPf, LogPb)> {
        check_layout(trajectories)?;
        let max_len = trajectories.max_length();
        let n_traj = trajectories.n_trajectories();
        let states = trajectories.states();
        let actions = trajectories.actions();
        let device = states.device();
        let is_dummy = flags(trajectories.is_dummy_action())?;
        let is_exit = flags(trajectories.is_exit_action())?;
        let zeros = |dtype| Tensor::zeros((max_len, n_traj), dtype, device);

        let valid = positions(is_dummy.iter().map(|dummy| !dummy), device)?;
        let log_pf = if self.on_policy() {
            let log_probs = trajectories.log_probs().ok_or(GfnError::MissingLogProbs)?;
            if log_probs.dims() != [max_len, n_traj] {
                return Err(GfnError::Shape(format!(
                    "recorded log-probabilities have shape {:?}, expected {:?}",
                    log_probs.dims(),
                    [max_len, n_traj]
                )));
            }
            log_probs.clone()
        } else if let Some(valid) = &valid {
            let valid_states = select_steps(&states.narrow(0, 0, max_len)?, valid)?;
            let valid_actions = select_steps(actions, valid)?;
            let module_output = match estimator_outputs {
                Some(outputs) => {
                    if outputs.dims().first() != Some(&valid.dim(0)?) {
                        return Err(GfnError::Shape(format!(
                            "estimator outputs of shape {:?} do not cover {} valid states",
                            outputs.dims(),
                            valid.dim(0)?
                        )));
                    }
                    outputs.clone()
                }
                None => self.pf().forward(&valid_states)?,
            };
            let valid_log_pf = self
                .pf()
                .to_probability_distribution(&valid_states, &module_output)?
                .log_prob(&valid_actions)?;
            scatter_steps(&valid_log_pf, valid, max_len, n_traj)?
        } else {
            zeros(trajectories.log_rewards().dtype())?
        };

        let transitions = positions(
            is_dummy
                .iter()
                .zip(is_exit.iter())
                .map(|(dummy, exit)| !dummy && !exit),
            device,
        )?;
        let log_pb = match &transitions {
            Some(transitions) => {
                let target_states = select_steps(&states.narrow(0, 1, max_len)?, transitions)?;
                let transition_actions = select_steps(actions, transitions)?;
                let valid_log_pb = self
                    .pb()
                    .distribution(&target_states)?
                    .log_prob(&transition_actions)?;
                scatter_steps(&valid_log_pb, transitions, max_len, n_traj)?
            }
            None => zeros(log_pf.dtype())?,
        };
        let log_pb = log_pb.to_dtype(log_pf.dtype())?;
        trace!(max_len, n_traj, "evaluated trajectory log-probabilities");
        Ok((LogPf(log_pf), LogPb(log_pb)))
    }

    /// Returns the total `log P_F`, the total `log P_B` and the scores
    /// `log P_F - log P_B - log R` of every trajectory.
    fn get_trajectories_scores<T: Trajectories>(
        &self,
        trajectories: &T,
        estimator_outputs: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor, Scores)> {
        let (log_pf, log_pb) = self.get_pfs_and_pbs(trajectories, estimator_outputs)?;
        let total_log_pf = log_pf.sum(0)?;
        let total_log_pb = log_pb.sum(0)?;
        if has_inf(&total_log_pf)? || has_inf(&total_log_pb)? {
            return Err(GfnError::InfiniteLogProbs);
        }
        let log_rewards = trajectories
            .log_rewards()
            .to_dtype(total_log_pf.dtype())?;
        let scores = ((&total_log_pf - &total_log_pb)? - log_rewards)?;
        Ok((total_log_pf, total_log_pb, Scores(scores)))
    }
}
