//! Output splitter layer.
//!
//! Synthesized during realization when a layer feeds several consumers but
//! only produces one output; replicates its input to every output port and
//! sums the consumers' gradients on the way back.

use crate::error::Result;
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;

/// Fans one input out to any number of consumers.
#[derive(Debug, Default)]
pub struct OutputLayer {
    base: LayerBase,
}

impl OutputLayer {
    /// Create an output splitter; port count follows `output_layers`.
    pub fn new() -> Self {
        Self {
            base: LayerBase::new(false),
        }
    }
}

impl Layer for OutputLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::OUTPUT
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        let dim = self.base.input_dim[0];
        self.base.num_outputs = self.base.output_layers.len().max(1);
        self.base.output_dim = vec![dim; self.base.num_outputs];
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        for &slot in &self.base.net_hidden {
            let o = bufs.slot(slot);
            bufs.transform(i.value, o.value, |t| Ok(t.clone()))?;
        }
        Ok(())
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let mut acc = bufs
            .read(bufs.slot(self.base.net_hidden[0]).gradient)
            .clone();
        for &slot in &self.base.net_hidden[1..] {
            acc.add_assign(&bufs.read(bufs.slot(slot).gradient))?;
        }
        let i = bufs.slot(self.base.net_input[0]);
        *bufs.write(i.gradient) = acc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Dim, Tensor};

    #[test]
    fn test_fan_out_and_gradient_sum() {
        let dim = Dim::new(1, 1, 1, 2);
        let mut layer = OutputLayer::new();
        layer.base_mut().input_dim[0] = dim;
        layer.base_mut().output_layers = vec!["a".to_string(), "b".to_string()];
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        assert_eq!(layer.base().num_outputs, 2);

        let i = m.alloc_slot(&dim);
        let o1 = m.alloc_slot(&dim);
        let o2 = m.alloc_slot(&dim);
        layer.base_mut().net_input = vec![i];
        layer.base_mut().net_hidden = vec![o1, o2];

        let x = Tensor::from_vec(vec![7.0, 8.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, false).unwrap();
        assert_eq!(m.read(m.slot(o1).value).to_vec(), vec![7.0, 8.0]);
        assert_eq!(m.read(m.slot(o2).value).to_vec(), vec![7.0, 8.0]);

        m.write(m.slot(o1).gradient)
            .assign(&Tensor::from_vec(vec![1.0, 2.0], &dim).unwrap())
            .unwrap();
        m.write(m.slot(o2).gradient)
            .assign(&Tensor::from_vec(vec![3.0, 4.0], &dim).unwrap())
            .unwrap();
        layer.calc_derivative(&m).unwrap();
        assert_eq!(m.read(m.slot(i).gradient).to_vec(), vec![4.0, 6.0]);
    }
}
