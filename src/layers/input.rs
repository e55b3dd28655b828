//! External data entry layer.
//!
//! The root node of every realized graph. Training and inference inject
//! data into this layer's input slot; forwarding copies it through to the
//! hidden slot so downstream consumers read a uniform interface.

use crate::error::Result;
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;
use crate::tensor::Dim;

/// Data entry layer with a user-supplied dimension.
#[derive(Debug)]
pub struct InputLayer {
    base: LayerBase,
}

impl InputLayer {
    /// Create an input layer for data of the given dimension.
    pub fn new(dim: Dim) -> Self {
        let mut base = LayerBase::new(false);
        base.input_dim[0] = dim;
        Self { base }
    }
}

impl Layer for InputLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::INPUT
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        self.base.output_dim = self.base.input_dim.clone();
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        bufs.transform(i.value, o.value, |t| Ok(t.clone()))
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        bufs.transform(o.gradient, i.gradient, |t| Ok(t.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_input_passthrough() {
        let dim = Dim::new(1, 1, 1, 3);
        let mut layer = InputLayer::new(dim);
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        let i = m.alloc_slot(&dim);
        let o = m.alloc_slot(&dim);
        layer.base_mut().net_input = vec![i];
        layer.base_mut().net_hidden = vec![o];

        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, false).unwrap();
        assert_eq!(m.read(m.slot(o).value).to_vec(), vec![1.0, 2.0, 3.0]);
    }
}
