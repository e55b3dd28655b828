//! Fully connected layer.

use crate::error::Result;
use crate::layers::{layer_type, Layer, LayerBase, Weight, WeightInit};
use crate::manager::BufferManager;
use crate::tensor::Dim;
use ndarray::Axis;

/// Dense layer mapping the flattened input features to `unit` outputs.
#[derive(Debug)]
pub struct FullyConnectedLayer {
    base: LayerBase,
    unit: usize,
    init: WeightInit,
}

impl FullyConnectedLayer {
    /// Create a dense layer with the given output width.
    pub fn new(unit: usize) -> Self {
        Self {
            base: LayerBase::new(true),
            unit,
            init: WeightInit::default(),
        }
    }

    /// Override the weight initialization.
    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    /// Output width of this layer.
    pub fn unit(&self) -> usize {
        self.unit
    }

    fn in_features(&self) -> usize {
        self.base.input_dim[0].feature_len()
    }
}

impl Layer for FullyConnectedLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::FULLY_CONNECTED
    }

    fn initialize(&mut self, manager: &mut BufferManager) -> Result<()> {
        let in_dim = self.base.input_dim[0];
        let feat = in_dim.feature_len();
        self.base.output_dim = vec![Dim::new(in_dim.batch, 1, 1, self.unit)];
        if self.base.weights.is_empty() {
            self.base.weights = vec![
                Weight::new(
                    "weight",
                    &Dim::new(1, 1, feat, self.unit),
                    self.init,
                    feat,
                    self.unit,
                ),
                Weight::new(
                    "bias",
                    &Dim::new(1, 1, 1, self.unit),
                    WeightInit::Zeros,
                    feat,
                    self.unit,
                ),
            ];
            manager.track_weights(&self.base.name, &self.base.weights);
        }
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let feat = self.in_features();

        let x = bufs.read(i.value).clone();
        let batch = x.dim()?.batch;
        let x2 = x.reshaped(&[batch, feat])?;
        let w2 = self.base.weights[0].value.reshaped(&[feat, self.unit])?;
        let bias = self.base.weights[1].value.reshaped(&[1, self.unit])?;
        let y = x2.dot(&w2, false, false)?.add(&bias)?;
        bufs.write(o.value).assign(&y)
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let feat = self.in_features();

        let dy = bufs.read(o.gradient).clone();
        let batch = dy.dim()?.batch;
        let dy2 = dy.reshaped(&[batch, self.unit])?;
        let w2 = self.base.weights[0].value.reshaped(&[feat, self.unit])?;
        let dx = dy2.dot(&w2, false, true)?;
        bufs.write(i.gradient).assign(&dx)
    }

    fn calc_gradient(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let feat = self.in_features();

        let x = bufs.read(i.value).clone();
        let dy = bufs.read(o.gradient).clone();
        let batch = x.dim()?.batch;
        let x2 = x.reshaped(&[batch, feat])?;
        let dy2 = dy.reshaped(&[batch, self.unit])?;

        let dw = x2.dot(&dy2, true, false)?;
        self.base.weights[0].gradient.assign(&dw)?;

        let db = dy2.array().sum_axis(Axis(0));
        self.base.weights[1]
            .gradient
            .assign(&crate::tensor::Tensor::from_array(db.into_dyn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;
    use approx::assert_relative_eq;

    fn fixed_fc() -> (FullyConnectedLayer, BufferManager, usize, usize) {
        let dim = Dim::new(2, 1, 1, 3);
        let mut layer = FullyConnectedLayer::new(2).with_init(WeightInit::Zeros);
        layer.base_mut().input_dim[0] = dim;
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        // deterministic parameters
        layer.base_mut().weights[0].value = Tensor::from_shape_vec(
            &[1, 1, 3, 2],
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        )
        .unwrap();
        layer.base_mut().weights[1].value =
            Tensor::from_shape_vec(&[1, 1, 1, 2], vec![0.5, -0.5]).unwrap();
        let i = m.alloc_slot(&dim);
        let o = m.alloc_slot(&layer.base().output_dim[0]);
        layer.base_mut().net_input = vec![i];
        layer.base_mut().net_hidden = vec![o];
        (layer, m, i, o)
    }

    #[test]
    fn test_forward_known_values() {
        let (mut layer, m, i, o) = fixed_fc();
        let x = Tensor::from_vec(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            &Dim::new(2, 1, 1, 3),
        )
        .unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();
        // row0: [1+3+0.5, 2+3-0.5]; row1: [4+6+0.5, 5+6-0.5]
        assert_eq!(
            m.read(m.slot(o).value).to_vec(),
            vec![4.5, 4.5, 10.5, 10.5]
        );
    }

    #[test]
    fn test_gradients_accumulate() {
        let (mut layer, m, i, o) = fixed_fc();
        let x = Tensor::from_vec(
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            &Dim::new(2, 1, 1, 3),
        )
        .unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();

        let dy = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], &Dim::new(2, 1, 1, 2)).unwrap();
        m.write(m.slot(o).gradient).assign(&dy).unwrap();
        layer.calc_gradient(&m).unwrap();
        layer.calc_derivative(&m).unwrap();

        // dW = x^T dy: row feature 0 saw dy [1,0], feature 1 saw [0,1]
        let dw = layer.base().weights[0].gradient.to_vec();
        assert_relative_eq!(dw[0], 1.0);
        assert_relative_eq!(dw[3], 1.0);
        let db = layer.base().weights[1].gradient.to_vec();
        assert_eq!(db, vec![1.0, 1.0]);

        // dx = dy W^T
        let dx = m.read(m.slot(i).gradient).to_vec();
        assert_eq!(dx, vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0]);
    }
}
