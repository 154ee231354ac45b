use super::{Categorical, Distribution};
use crate::error::{GfnError, Result};
use candle_core::{DType, Device, Tensor};
use rand::RngCore;
use std::collections::HashMap;

/// Categorical over ordered pairs of graph nodes.
///
/// `probs` has shape `(batch, n * n)` where `n = node_indexes.len()`; event `k`
/// is the pair `(node_indexes[k / n], node_indexes[k % n])`.
#[derive(Debug, Clone)]
pub struct CategoricalIndexes {
    categorical: Categorical,
    node_indexes: Vec<i64>,
    positions: HashMap<i64, usize>,
    device: Device,
}

impl CategoricalIndexes {
    pub fn new(probs: &Tensor, node_indexes: &Tensor) -> Result<Self> {
        let node_indexes: Vec<i64> = node_indexes
            .to_dtype(DType::I64)?
            .flatten_all()?
            .to_vec1()?;
        let n_nodes = node_indexes.len();
        match probs.dims() {
            [_, n_pairs] if *n_pairs == n_nodes * n_nodes => {}
            dims => {
                return Err(GfnError::Shape(format!(
                    "expected probs of shape (batch, {}), got {dims:?}",
                    n_nodes * n_nodes
                )));
            }
        }
        let mut positions = HashMap::with_capacity(n_nodes);
        for (position, node) in node_indexes.iter().enumerate() {
            if positions.insert(*node, position).is_some() {
                return Err(GfnError::InvalidDistribution(format!(
                    "node index {node} appears more than once"
                )));
            }
        }
        Ok(Self {
            categorical: Categorical::from_probs(probs)?,
            node_indexes,
            positions,
            device: probs.device().clone(),
        })
    }

    pub fn node_indexes(&self) -> &[i64] {
        &self.node_indexes
    }

    fn position(&self, node: i64) -> Result<u32> {
        self.positions
            .get(&node)
            .map(|position| *position as u32)
            .ok_or_else(|| {
                GfnError::InvalidDistribution(format!("node {node} is not in the node indexes"))
            })
    }
}

impl Distribution for CategoricalIndexes {
    /// Returns node pairs of shape `(*sample_shape, batch, 2)`.
    fn sample(&self, sample_shape: &[usize], rng: &mut dyn RngCore) -> Result<Tensor> {
        let flat = self.categorical.sample(sample_shape, rng)?;
        let n_nodes = self.node_indexes.len();
        let pairs = flat
            .flatten_all()?
            .to_vec1::<u32>()?
            .into_iter()
            .flat_map(|k| {
                let k = k as usize;
                [self.node_indexes[k / n_nodes], self.node_indexes[k % n_nodes]]
            })
            .collect::<Vec<_>>();
        let shape = [flat.dims(), &[2]].concat();
        Ok(Tensor::from_vec(pairs, shape, &self.device)?)
    }

    fn log_prob(&self, value: &Tensor) -> Result<Tensor> {
        let dims = value.dims();
        if dims.last() != Some(&2) {
            return Err(GfnError::Shape(format!(
                "node pairs need a trailing axis of size 2, got {dims:?}"
            )));
        }
        let n_nodes = self.node_indexes.len() as u32;
        let flat = value
            .to_dtype(DType::I64)?
            .flatten_all()?
            .to_vec1::<i64>()?
            .chunks_exact(2)
            .map(|pair| Ok(self.position(pair[0])? * n_nodes + self.position(pair[1])?))
            .collect::<Result<Vec<u32>>>()?;
        let flat = Tensor::from_vec(flat, &dims[..dims.len() - 1], &self.device)?;
        self.categorical.log_prob(&flat)
    }

    fn batch_shape(&self) -> Vec<usize> {
        self.categorical.batch_shape()
    }

    fn entropy(&self) -> Result<Tensor> {
        self.categorical.entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn rejects_probs_not_covering_all_pairs() -> Result<()> {
        let probs = Tensor::ones((2, 5), DType::F32, &Device::Cpu)?;
        let nodes = Tensor::new(&[0i64, 1], &Device::Cpu)?;
        assert!(matches!(
            CategoricalIndexes::new(&probs, &nodes),
            Err(GfnError::Shape(_))
        ));
        Ok(())
    }

    #[test]
    fn samples_decode_into_node_pairs() -> Result<()> {
        // all the mass on k = 5, i.e. positions (1, 2) among three nodes
        let mut row = vec![0f32; 9];
        row[5] = 1.;
        let probs = Tensor::from_vec([row.clone(), row].concat(), (2, 9), &Device::Cpu)?;
        let nodes = Tensor::new(&[10i64, 20, 30], &Device::Cpu)?;
        let dist = CategoricalIndexes::new(&probs, &nodes)?;
        let mut rng = StdRng::seed_from_u64(3);
        let pairs = dist.sample(&[], &mut rng)?;
        assert_eq!(pairs.dims(), &[2, 2]);
        assert_eq!(pairs.to_vec2::<i64>()?, vec![vec![20, 30], vec![20, 30]]);
        Ok(())
    }

    #[test]
    fn log_prob_encodes_pairs() -> Result<()> {
        let probs = Tensor::new(&[[0.1f32, 0.2, 0.3, 0.4]], &Device::Cpu)?;
        let nodes = Tensor::new(&[4i64, 7], &Device::Cpu)?;
        let dist = CategoricalIndexes::new(&probs, &nodes)?;
        let value = Tensor::new(&[[7i64, 4]], &Device::Cpu)?;
        let log_prob: Vec<f32> = dist.log_prob(&value)?.to_vec1()?;
        assert!((log_prob[0] - 0.3f32.ln()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn log_prob_rejects_unknown_nodes() -> Result<()> {
        let probs = Tensor::new(&[[0.25f32, 0.25, 0.25, 0.25]], &Device::Cpu)?;
        let nodes = Tensor::new(&[0i64, 1], &Device::Cpu)?;
        let dist = CategoricalIndexes::new(&probs, &nodes)?;
        let value = Tensor::new(&[[0i64, 9]], &Device::Cpu)?;
        assert!(dist.log_prob(&value).is_err());
        Ok(())
    }
}
