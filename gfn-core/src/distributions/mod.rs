//! Distributions over GFlowNet actions.
//!
//! Discrete GFlowNet action spaces rarely look like a plain categorical: actions
//! carry a trailing unit axis, graph environments pick node pairs, and some
//! environments combine several sub-action spaces. Every distribution here is
//! built on [`Categorical`] and sampled on the host with `rand`, while
//! `log_prob` stays on the tensor graph so gradients reach the logits.
pub mod categorical;
pub mod categorical_action_type;
pub mod categorical_indexes;
pub mod composite;
pub mod unsqueezed_categorical;

use crate::error::Result;
use candle_core::Tensor;
use enum_dispatch::enum_dispatch;
use rand::RngCore;

pub use categorical::Categorical;
pub use categorical_action_type::CategoricalActionType;
pub use categorical_indexes::CategoricalIndexes;
pub use composite::CompositeDistribution;
pub use unsqueezed_categorical::UnsqueezedCategorical;

#[enum_dispatch]
pub trait Distribution {
    /// Draws samples of shape `(*sample_shape, *batch_shape, *event_shape)`.
    fn sample(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<Tensor>;

    fn log_prob(&self, value: &Tensor) -> Result<Tensor>;

    fn batch_shape(&self) -> Vec<usize>;

    fn entropy(&self) -> Result<Tensor>;
}

#[enum_dispatch(Distribution)]
#[derive(Debug, Clone)]
pub enum DistributionKind {
    Categorical(Categorical),
    Unsqueezed(UnsqueezedCategorical),
    Indexes(CategoricalIndexes),
    ActionType(CategoricalActionType),
}
