// Newtypes for the per-step and per-trajectory quantities the losses pass around.
use candle_core::Tensor;
use derive_more::{Deref, DerefMut, Display};

/// Forward log-probabilities, `(max_len, n_traj)`.
#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct LogPf(pub Tensor);

/// Backward log-probabilities, `(max_len, n_traj)`.
#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct LogPb(pub Tensor);

/// `sum log P_F - sum log P_B - log R` per trajectory.
#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Scores(pub Tensor);

#[derive(Deref, DerefMut, Debug, Display, Clone)]
pub struct Loss(pub Tensor);
