use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};
use either::Either;

#[derive(Debug, Clone)]
pub struct MlpLayer(pub Either<Linear, Activation>);

impl MlpLayer {
    pub fn linear(linear: Linear) -> Self {
        Self(Either::Left(linear))
    }

    pub fn activation(activation: Activation) -> Self {
        Self(Either::Right(activation))
    }
}

impl Module for MlpLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match &self.0 {
            Either::Left(linear) => linear.forward(xs),
            Either::Right(activation) => activation.forward(xs),
        }
    }
}

/// Send + Sync stand-in for `candle_nn::Sequential`, so estimators can hold it.
#[derive(Default, Debug, Clone)]
pub struct Mlp {
    layers: Vec<MlpLayer>,
}

impl Mlp {
    pub fn add_layer(mut self, layer: MlpLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = layer.forward(&xs)?
        }
        Ok(xs)
    }
}

/// Linear layers of the given sizes with ReLUs in between. Layer `i` stores its
/// parameters under `{prefix}{i}`.
pub fn build_mlp(input_dim: usize, layers: &[usize], vb: &VarBuilder, prefix: &str) -> Result<Mlp> {
    let mut last_dim = input_dim;
    let mut nn = Mlp::default();
    let num_layers = layers.len();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        nn = nn.add_layer(MlpLayer::linear(linear(last_dim, *layer_size, vb.pp(layer_pp))?));
        if layer_idx != num_layers - 1 {
            nn = nn.add_layer(MlpLayer::activation(Activation::Relu));
        }
        last_dim = *layer_size;
    }
    Ok(nn)
}
