use thiserror::Error;

#[derive(Error, Debug)]
pub enum GfnError {
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("{estimator} output dimension should be {expected}, but is {actual}.")]
    OutputDim {
        estimator: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0} only supports discrete environments.")]
    UnsupportedEnv(&'static str),

    #[error("invalid shape: {0}")]
    Shape(String),

    #[error("invalid distribution parameters: {0}")]
    InvalidDistribution(String),

    #[error("missing parameter `{0}` in state dict")]
    MissingParameter(String),

    #[error("unexpected parameter `{0}` in state dict")]
    UnexpectedParameter(String),

    #[error("loss is nan")]
    NanLoss,

    #[error("Infinite logprobs found")]
    InfiniteLogProbs,

    #[error("on-policy training needs trajectories with recorded log-probabilities")]
    MissingLogProbs,

    #[error("parameter store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, GfnError>;
