//! Terminal loss layer.
//!
//! Appended by the graph as the final node. Cross-entropy only exists in
//! its fused forms: graph construction pops a trailing sigmoid/softmax
//! activation node and folds it into this layer, so forward applies the
//! activation itself and backward collapses to the simple `y - t` seed.

use crate::activations;
use crate::error::{EdgennError, Result};
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

const LOG_EPSILON: f32 = 1e-7;

/// Loss function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossKind {
    /// No loss; the network is inference-only
    None,
    /// Mean squared error
    Mse,
    /// Plain cross entropy; only usable in a fused form
    CrossEntropy,
    /// Cross entropy fused with a sigmoid activation
    CrossEntropySigmoid,
    /// Cross entropy fused with a softmax activation
    CrossEntropySoftmax,
}

impl Default for LossKind {
    fn default() -> Self {
        LossKind::None
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossKind::None => "none",
            LossKind::Mse => "mse",
            LossKind::CrossEntropy => "cross",
            LossKind::CrossEntropySigmoid => "cross_sigmoid",
            LossKind::CrossEntropySoftmax => "cross_softmax",
        };
        write!(f, "{}", name)
    }
}

/// Computes the training objective and seeds the backward pass.
#[derive(Debug)]
pub struct LossLayer {
    base: LayerBase,
    kind: LossKind,
    targets: Option<Tensor>,
    value: f32,
}

impl LossLayer {
    /// Create a loss layer of the given kind.
    pub fn new(kind: LossKind) -> Self {
        Self {
            base: LayerBase::new(false),
            kind,
            targets: None,
            value: 0.0,
        }
    }

    /// The loss kind of this layer.
    pub fn kind(&self) -> LossKind {
        self.kind
    }

    fn compute_loss(&self, y: &Tensor, t: &Tensor) -> Result<f32> {
        let batch = y.dim()?.batch.max(1) as f32;
        match self.kind {
            LossKind::Mse => {
                let d = y.sub(t)?;
                Ok(d.mul(&d)?.mean())
            }
            LossKind::CrossEntropySigmoid => {
                let yv = y.to_vec();
                let tv = t.to_vec();
                let mut acc = 0.0;
                for (p, q) in yv.iter().zip(tv.iter()) {
                    let p = p.clamp(LOG_EPSILON, 1.0 - LOG_EPSILON);
                    acc -= q * p.ln() + (1.0 - q) * (1.0 - p).ln();
                }
                Ok(acc / yv.len() as f32)
            }
            LossKind::CrossEntropySoftmax => {
                let yv = y.to_vec();
                let tv = t.to_vec();
                let acc: f32 = yv
                    .iter()
                    .zip(tv.iter())
                    .map(|(p, q)| -q * p.max(LOG_EPSILON).ln())
                    .sum();
                Ok(acc / batch)
            }
            LossKind::None | LossKind::CrossEntropy => Ok(0.0),
        }
    }
}

impl Layer for LossLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::LOSS
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        if self.kind == LossKind::CrossEntropy {
            return Err(EdgennError::not_supported(
                "cross entropy is only supported fused with sigmoid or softmax",
            ));
        }
        self.base.output_dim = self.base.input_dim.clone();
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let x = bufs.read(i.value).clone();
        let y = match self.kind {
            LossKind::CrossEntropySigmoid => x.map(activations::sigmoid),
            LossKind::CrossEntropySoftmax => activations::softmax(&x)?,
            _ => x,
        };
        if training {
            if let Some(t) = &self.targets {
                self.value = self.compute_loss(&y, t)?;
            }
        }
        *bufs.write(o.value) = y;
        Ok(())
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let y = bufs.read(o.value).clone();
        let t = self
            .targets
            .as_ref()
            .ok_or_else(|| EdgennError::configuration("loss targets have not been set"))?;
        let batch = y.dim()?.batch.max(1) as f32;
        let dx = match self.kind {
            LossKind::Mse => y.sub(t)?.scale(2.0 / y.len() as f32),
            LossKind::CrossEntropySigmoid | LossKind::CrossEntropySoftmax => {
                y.sub(t)?.scale(1.0 / batch)
            }
            LossKind::None | LossKind::CrossEntropy => {
                return Err(EdgennError::not_supported(
                    "loss kind cannot seed a backward pass",
                ))
            }
        };
        *bufs.write(i.gradient) = dx;
        Ok(())
    }

    fn set_targets(&mut self, targets: Tensor) -> Result<()> {
        if self.base.input_dim[0].is_set() && targets.len() != self.base.input_dim[0].data_len() {
            return Err(EdgennError::dimension_mismatch(
                self.base.input_dim[0].to_string(),
                format!("{} target elements", targets.len()),
            ));
        }
        self.targets = Some(targets);
        Ok(())
    }

    fn loss(&self) -> f32 {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dim;
    use approx::assert_relative_eq;

    fn wired_loss(kind: LossKind, dim: Dim) -> (LossLayer, BufferManager, usize, usize) {
        let mut layer = LossLayer::new(kind);
        layer.base_mut().input_dim[0] = dim;
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        let i = m.alloc_slot(&dim);
        let o = m.alloc_slot(&dim);
        layer.base_mut().net_input = vec![i];
        layer.base_mut().net_hidden = vec![o];
        (layer, m, i, o)
    }

    #[test]
    fn test_mse_loss_and_seed() {
        let dim = Dim::new(1, 1, 1, 2);
        let (mut layer, m, i, o) = wired_loss(LossKind::Mse, dim);
        layer
            .set_targets(Tensor::from_vec(vec![0.0, 1.0], &dim).unwrap())
            .unwrap();
        let x = Tensor::from_vec(vec![1.0, 1.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();
        assert_relative_eq!(layer.loss(), 0.5);

        layer.calc_derivative(&m).unwrap();
        assert_eq!(m.read(m.slot(i).gradient).to_vec(), vec![1.0, 0.0]);
        let _ = o;
    }

    #[test]
    fn test_fused_softmax_applies_activation() {
        let dim = Dim::new(1, 1, 1, 3);
        let (mut layer, m, i, o) = wired_loss(LossKind::CrossEntropySoftmax, dim);
        layer
            .set_targets(Tensor::from_vec(vec![0.0, 0.0, 1.0], &dim).unwrap())
            .unwrap();
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();

        let y = m.read(m.slot(o).value).to_vec();
        assert_relative_eq!(y.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(layer.loss() > 0.0);

        layer.calc_derivative(&m).unwrap();
        let dx = m.read(m.slot(i).gradient).to_vec();
        assert_relative_eq!(dx.iter().sum::<f32>(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_plain_cross_entropy_rejected() {
        let mut layer = LossLayer::new(LossKind::CrossEntropy);
        layer.base_mut().input_dim[0] = Dim::new(1, 1, 1, 2);
        let mut m = BufferManager::new();
        assert!(layer.initialize(&mut m).is_err());
    }

    #[test]
    fn test_missing_targets_is_an_error() {
        let dim = Dim::new(1, 1, 1, 2);
        let (mut layer, m, i, _o) = wired_loss(LossKind::Mse, dim);
        let x = Tensor::from_vec(vec![1.0, 1.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();
        assert!(layer.calc_derivative(&m).is_err());
    }
}
