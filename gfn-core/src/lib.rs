pub mod distributions;
pub mod env;
pub mod error;
pub mod estimators;
pub mod tensors;
pub mod trajectories;

pub use error::{GfnError, Result};

#[cfg(test)]
pub(crate) mod testing;
