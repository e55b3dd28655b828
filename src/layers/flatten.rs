//! Flatten layer.
//!
//! Collapses channel, height and width into the width extent. The element
//! count is unchanged, so forward and backward are plain copies between
//! buffers of different shape.

use crate::error::Result;
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;
use crate::tensor::Dim;

/// Reshapes `[b, c, h, w]` into `[b, 1, 1, c*h*w]`.
#[derive(Debug, Default)]
pub struct FlattenLayer {
    base: LayerBase,
}

impl FlattenLayer {
    /// Create a flatten layer.
    pub fn new() -> Self {
        Self {
            base: LayerBase::new(false),
        }
    }
}

impl Layer for FlattenLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::FLATTEN
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        let d = self.base.input_dim[0];
        self.base.output_dim = vec![Dim::new(d.batch, 1, 1, d.feature_len())];
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let x = bufs.read(i.value).clone();
        bufs.write(o.value).assign(&x)
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let dy = bufs.read(o.gradient).clone();
        bufs.write(i.gradient).assign(&dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_flatten_dims_and_copy() {
        let dim = Dim::new(2, 2, 1, 2);
        let mut layer = FlattenLayer::new();
        layer.base_mut().input_dim[0] = dim;
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        assert_eq!(layer.base().output_dim[0], Dim::new(2, 1, 1, 4));

        let i = m.alloc_slot(&dim);
        let o = m.alloc_slot(&layer.base().output_dim[0]);
        layer.base_mut().net_input = vec![i];
        layer.base_mut().net_hidden = vec![o];

        let x = Tensor::from_vec((0..8).map(|v| v as f32).collect(), &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, false).unwrap();
        let y = m.read(m.slot(o).value).clone();
        assert_eq!(y.shape(), &[2, 1, 1, 4]);
        assert_eq!(y.to_vec(), x.to_vec());
    }
}
