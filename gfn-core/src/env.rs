use crate::error::Result;
use candle_core::Tensor;
use std::fmt::{Debug, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSpace {
    /// `n_actions` includes the exit action, which is always the last one.
    Discrete(usize),
    Continuous { dim: usize },
}

impl ActionSpace {
    pub fn n_actions(&self) -> Option<usize> {
        match self {
            Self::Discrete(n_actions) => Some(*n_actions),
            Self::Continuous { .. } => None,
        }
    }
}

/// The environment as seen by the estimators. DAG traversal lives elsewhere; the
/// estimators only need to turn raw states into module inputs and know which
/// actions are legal.
pub trait Env: Debug + Display + Send + Sync {
    fn preprocess(&self, states: &Tensor) -> Result<Tensor>;

    fn action_space(&self) -> ActionSpace;

    /// `u8` mask over the `n_actions` forward actions, 1 for allowed.
    fn forward_masks(&self, _states: &Tensor) -> Result<Option<Tensor>> {
        Ok(None)
    }

    /// `u8` mask over the `n_actions - 1` backward actions (no exit).
    fn backward_masks(&self, _states: &Tensor) -> Result<Option<Tensor>> {
        Ok(None)
    }
}
