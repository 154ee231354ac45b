use crate::error::{GfnError, Result};
use candle_core::{DType, Device, Tensor, Var};
use std::collections::HashMap;
use std::fmt::Display;

pub const LOG_Z_KEY: &str = "logZ";

/// The trainable scalar `log Z`.
#[derive(Debug, Clone)]
pub struct LogZEstimator {
    tensor: Var,
}

impl LogZEstimator {
    pub fn new(tensor: &Tensor) -> Result<Self> {
        if tensor.rank() != 0 {
            return Err(GfnError::Shape(format!(
                "log Z must be a scalar, got shape {:?}",
                tensor.dims()
            )));
        }
        Ok(Self {
            tensor: Var::from_tensor(tensor)?,
        })
    }

    pub fn from_value(init: f32, device: &Device) -> Result<Self> {
        Ok(Self {
            tensor: Var::new(init, device)?,
        })
    }

    pub fn as_tensor(&self) -> &Tensor {
        self.tensor.as_tensor()
    }

    pub fn var(&self) -> &Var {
        &self.tensor
    }

    pub fn value(&self) -> Result<f32> {
        Ok(self.tensor.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }

    pub fn parameters(&self) -> Vec<Var> {
        vec![self.tensor.clone()]
    }

    pub fn named_parameters(&self) -> HashMap<String, Tensor> {
        HashMap::from([(LOG_Z_KEY.to_string(), self.tensor.as_tensor().clone())])
    }

    /// Replaces the value in place so optimizers tracking the variable keep
    /// updating it.
    pub fn load_state_dict(&mut self, state_dict: &HashMap<String, Tensor>) -> Result<()> {
        let value = state_dict
            .get(LOG_Z_KEY)
            .ok_or_else(|| GfnError::MissingParameter(LOG_Z_KEY.to_string()))?;
        if value.rank() != 0 {
            return Err(GfnError::Shape(format!(
                "log Z must be a scalar, got shape {:?}",
                value.dims()
            )));
        }
        self.tensor.set(
            &value
                .to_dtype(self.tensor.dtype())?
                .to_device(self.tensor.device())?,
        )?;
        Ok(())
    }
}

impl Display for LogZEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Ok(value) => write!(f, "{value}"),
            Err(_) => write!(f, "LogZEstimator(<unreadable>)"),
        }
    }
}
