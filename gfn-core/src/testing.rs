use crate::env::{ActionSpace, Env};
use crate::error::Result;
use candle_core::{DType, Tensor};
use std::fmt::Display;

#[derive(Debug, Clone)]
pub struct ToyEnv {
    pub action_space: ActionSpace,
    pub forward_masks: Option<Tensor>,
}

impl ToyEnv {
    pub fn discrete(n_actions: usize) -> Self {
        Self {
            action_space: ActionSpace::Discrete(n_actions),
            forward_masks: None,
        }
    }

    pub fn continuous(dim: usize) -> Self {
        Self {
            action_space: ActionSpace::Continuous { dim },
            forward_masks: None,
        }
    }
}

impl Display for ToyEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToyEnv")
    }
}

impl Env for ToyEnv {
    fn preprocess(&self, states: &Tensor) -> Result<Tensor> {
        Ok(states.to_dtype(DType::F32)?)
    }

    fn action_space(&self) -> ActionSpace {
        self.action_space
    }

    fn forward_masks(&self, _states: &Tensor) -> Result<Option<Tensor>> {
        Ok(self.forward_masks.clone())
    }
}
