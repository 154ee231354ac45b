use candle_core::{DType, Device, Tensor};
use gfn_core::Result;
use gfn_core::distributions::Distribution;
use gfn_core::env::{ActionSpace, Env};
use gfn_core::estimators::DiscretePolicyEstimator;
use gfn_core::trajectories::Trajectories;
use rand::RngCore;
use std::fmt::Display;
use tracing::trace;

pub const SINK: f32 = -1.;

/// Walks right along `0..=length`; action 0 steps, action 1 exits. Terminating
/// at `x` earns reward `x + 1`.
#[derive(Debug, Clone)]
pub struct LineEnv {
    pub length: usize,
    pub device: Device,
}

impl LineEnv {
    pub fn new(length: usize) -> Self {
        Self {
            length,
            device: Device::Cpu,
        }
    }

    pub fn state_dim(&self) -> usize {
        self.length + 1
    }

    pub fn log_reward(&self, position: f32) -> f32 {
        (position + 1.).ln()
    }

    pub fn log_partition(&self) -> f32 {
        (1..=self.length + 1).map(|r| r as f32).sum::<f32>().ln()
    }

    fn positions(states: &Tensor) -> Result<Vec<f32>> {
        Ok(states.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?)
    }
}

impl Display for LineEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LineEnv(length={})", self.length)
    }
}

impl Env for LineEnv {
    /// One-hot encoding of the position; the sink state encodes to zeros.
    fn preprocess(&self, states: &Tensor) -> Result<Tensor> {
        let grid = Tensor::arange(0u32, self.state_dim() as u32, states.device())?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?;
        let positions = states.to_dtype(DType::F32)?.reshape(((), 1))?;
        Ok(positions.broadcast_eq(&grid)?.to_dtype(DType::F32)?)
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discrete(2)
    }

    fn forward_masks(&self, states: &Tensor) -> Result<Option<Tensor>> {
        let positions = Self::positions(states)?;
        let n = positions.len();
        let masks = positions
            .into_iter()
            .flat_map(|x| [u8::from(x < self.length as f32), 1])
            .collect::<Vec<_>>();
        Ok(Some(Tensor::from_vec(masks, (n, 2), states.device())?))
    }

    fn backward_masks(&self, states: &Tensor) -> Result<Option<Tensor>> {
        let positions = Self::positions(states)?;
        let n = positions.len();
        let masks = positions
            .into_iter()
            .map(|x| u8::from(x > 0.))
            .collect::<Vec<_>>();
        Ok(Some(Tensor::from_vec(masks, (n, 1), states.device())?))
    }
}

#[derive(Debug, Clone)]
pub struct TrajectoryBatch {
    pub states: Tensor,
    pub actions: Tensor,
    pub is_dummy: Tensor,
    pub is_exit: Tensor,
    pub log_rewards: Tensor,
    pub log_probs: Option<Tensor>,
}

impl Trajectories for TrajectoryBatch {
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

/// Rolls out `n` trajectories on a [`LineEnv`] with `pf`'s sampling
/// distribution, recording the log-probabilities of the sampled actions.
/// These match `P_F` only when `pf` has no exploration configured.
pub fn sample_line_trajectories(
    env: &LineEnv,
    pf: &DiscretePolicyEstimator,
    n: usize,
    rng: &mut dyn RngCore,
) -> Result<TrajectoryBatch> {
    let max_len = env.length + 1;
    let device = &env.device;
    let mut positions = vec![0f32; n];
    let mut done = vec![false; n];
    let mut log_rewards = vec![0f32; n];
    let mut states = positions.clone();
    let (mut actions, mut is_dummy, mut is_exit, mut log_probs) =
        (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for _ in 0..max_len {
        let current = Tensor::from_vec(positions.clone(), (n, 1), device)?;
        let dist = pf.sampling_distribution(&current)?;
        let sampled = dist.sample(&[], rng)?;
        let step_log_probs: Vec<f32> = dist.log_prob(&sampled)?.detach().to_vec1()?;
        let sampled: Vec<u32> = sampled.flatten_all()?.to_vec1()?;
        for b in 0..n {
            if done[b] {
                actions.push(0);
                is_dummy.push(1u8);
                is_exit.push(0u8);
                log_probs.push(0.);
                continue;
            }
            actions.push(sampled[b]);
            is_dummy.push(0);
            log_probs.push(step_log_probs[b]);
            if sampled[b] == 1 {
                is_exit.push(1);
                log_rewards[b] = env.log_reward(positions[b]);
                positions[b] = SINK;
                done[b] = true;
            } else {
                is_exit.push(0);
                positions[b] += 1.;
            }
        }
        states.extend_from_slice(&positions);
    }
    trace!(n, max_len, "sampled line trajectories");
    Ok(TrajectoryBatch {
        states: Tensor::from_vec(states, (max_len + 1, n, 1), device)?,
        actions: Tensor::from_vec(actions, (max_len, n, 1), device)?,
        is_dummy: Tensor::from_vec(is_dummy, (max_len, n), device)?,
        is_exit: Tensor::from_vec(is_exit, (max_len, n), device)?,
        log_rewards: Tensor::from_vec(log_rewards, n, device)?,
        log_probs: Some(Tensor::from_vec(log_probs, (max_len, n), device)?),
    })
}
