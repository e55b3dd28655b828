//! Batch normalization layer.
//!
//! Normalizes every feature over the batch axis during training while
//! maintaining running statistics for inference. The backward pass only
//! needs the normalized activations and inverse deviation saved during
//! forward, so the node tolerates in-place aliased buffers.

use crate::error::{EdgennError, Result};
use crate::layers::{layer_type, Layer, LayerBase, Weight, WeightInit};
use crate::manager::BufferManager;
use crate::tensor::{Dim, Tensor};
use ndarray::Axis;

/// Per-feature batch normalization with learnable scale and shift.
#[derive(Debug)]
pub struct BatchNormLayer {
    base: LayerBase,
    epsilon: f32,
    momentum: f32,
    running_mean: Tensor,
    running_var: Tensor,
    // saved by the training forward pass for backward
    xhat: Tensor,
    inv_std: Tensor,
}

impl BatchNormLayer {
    /// Create a batch normalization layer with default epsilon and
    /// momentum.
    pub fn new() -> Self {
        Self {
            base: LayerBase::new(true),
            epsilon: 0.001,
            momentum: 0.99,
            running_mean: Tensor::zeros_shaped(&[0]),
            running_var: Tensor::zeros_shaped(&[0]),
            xhat: Tensor::zeros_shaped(&[0]),
            inv_std: Tensor::zeros_shaped(&[0]),
        }
    }

    /// Override epsilon.
    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Override the running-statistics momentum.
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Default for BatchNormLayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean over the batch axis, keeping a `[1, c, h, w]` shape.
fn mean_over_batch(t: &Tensor) -> Result<Tensor> {
    let arr = t
        .array()
        .mean_axis(Axis(0))
        .ok_or_else(|| EdgennError::numerical("mean over empty batch"))?;
    Ok(Tensor::from_array(arr.insert_axis(Axis(0)).into_dyn()))
}

/// Sum over the batch axis, keeping a `[1, c, h, w]` shape.
fn sum_over_batch(t: &Tensor) -> Tensor {
    let arr = t.array().sum_axis(Axis(0));
    Tensor::from_array(arr.insert_axis(Axis(0)).into_dyn())
}

impl Layer for BatchNormLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::BATCH_NORM
    }

    fn initialize(&mut self, manager: &mut BufferManager) -> Result<()> {
        let d = self.base.input_dim[0];
        self.base.output_dim = vec![d];
        let fdim = Dim::new(1, d.channel, d.height, d.width);
        if self.base.weights.is_empty() {
            let feat = d.feature_len();
            self.base.weights = vec![
                Weight::new("gamma", &fdim, WeightInit::Ones, feat, feat),
                Weight::new("beta", &fdim, WeightInit::Zeros, feat, feat),
            ];
            manager.track_weights(&self.base.name, &self.base.weights);
        }
        self.running_mean = Tensor::zeros(&fdim);
        let mut var = Tensor::zeros(&fdim);
        var.fill(1.0);
        self.running_var = var;
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let x = bufs.read(i.value).clone();
        let gamma = &self.base.weights[0].value;
        let beta = &self.base.weights[1].value;

        let y = if training {
            let mean = mean_over_batch(&x)?;
            let centered = x.sub(&mean)?;
            let var = mean_over_batch(&centered.mul(&centered)?)?;
            let eps = self.epsilon;
            let inv_std = var.map(|v| 1.0 / (v + eps).sqrt());
            let xhat = centered.mul(&inv_std)?;

            let m = self.momentum;
            self.running_mean = self
                .running_mean
                .scale(m)
                .add(&mean.scale(1.0 - m))?;
            self.running_var = self.running_var.scale(m).add(&var.scale(1.0 - m))?;
            let y = xhat.mul(gamma)?.add(beta)?;
            self.xhat = xhat;
            self.inv_std = inv_std;
            y
        } else {
            let eps = self.epsilon;
            let inv_std = self.running_var.map(|v| 1.0 / (v + eps).sqrt());
            x.sub(&self.running_mean)?
                .mul(&inv_std)?
                .mul(gamma)?
                .add(beta)?
        };
        *bufs.write(o.value) = y;
        Ok(())
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let dy = bufs.read(o.gradient).clone();
        let gamma = &self.base.weights[0].value;

        // dx = gamma * inv_std * (dy - mean_b(dy) - xhat * mean_b(dy*xhat))
        let dy_mean = mean_over_batch(&dy)?;
        let proj_mean = mean_over_batch(&dy.mul(&self.xhat)?)?;
        let dx = dy
            .sub(&dy_mean)?
            .sub(&self.xhat.mul(&proj_mean)?)?
            .mul(gamma)?
            .mul(&self.inv_std)?;
        *bufs.write(i.gradient) = dx;
        Ok(())
    }

    fn calc_gradient(&mut self, bufs: &BufferManager) -> Result<()> {
        let o = bufs.slot(self.base.net_hidden[0]);
        let dy = bufs.read(o.gradient).clone();
        let dgamma = sum_over_batch(&dy.mul(&self.xhat)?);
        self.base.weights[0].gradient.assign(&dgamma)?;
        self.base.weights[1].gradient.assign(&sum_over_batch(&dy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wired_bn(dim: Dim) -> (BatchNormLayer, BufferManager, usize, usize) {
        let mut layer = BatchNormLayer::new();
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
    fn test_training_output_is_normalized() {
        let dim = Dim::new(4, 1, 1, 1);
        let (mut layer, m, i, o) = wired_bn(dim);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();

        let y = m.read(m.slot(o).value).to_vec();
        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
        assert!(y[3] > y[0]);
    }

    #[test]
    fn test_inference_uses_running_stats() {
        let dim = Dim::new(4, 1, 1, 1);
        let (mut layer, m, i, o) = wired_bn(dim);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();
        layer.forwarding(&m, false).unwrap();
        // fresh running stats are still close to (0, 1), so inference
        // output stays close to the raw input
        let y = m.read(m.slot(o).value).to_vec();
        assert!((y[0] - 1.0).abs() < 0.2);
    }

    #[test]
    fn test_gradient_shapes() {
        let dim = Dim::new(2, 3, 1, 1);
        let (mut layer, m, i, o) = wired_bn(dim);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();

        let dy = Tensor::from_vec(vec![1.0; 6], &dim).unwrap();
        m.write(m.slot(o).gradient).assign(&dy).unwrap();
        layer.calc_gradient(&m).unwrap();
        layer.calc_derivative(&m).unwrap();

        assert_eq!(layer.base().weights[0].gradient.shape(), &[1, 3, 1, 1]);
        assert_eq!(m.read(m.slot(i).gradient).shape(), &[2, 3, 1, 1]);
        // constant upstream gradient means dx is (numerically) zero
        for v in m.read(m.slot(i).gradient).to_vec() {
            assert_relative_eq!(v, 0.0, epsilon = 1e-4);
        }
    }
}
