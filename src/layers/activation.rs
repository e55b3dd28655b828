//! Standalone activation layer.
//!
//! Realization splits a layer's activation tag into one of these nodes;
//! the derivative is computed from the activation output, so the node
//! stays correct when its buffers are aliased in place.

use crate::activations::Activation;
use crate::error::{EdgennError, Result};
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;

/// Applies one activation function to its single input.
#[derive(Debug)]
pub struct ActivationLayer {
    base: LayerBase,
    function: Activation,
}

impl ActivationLayer {
    /// Create an activation layer for the given function.
    pub fn new(function: Activation) -> Self {
        Self {
            base: LayerBase::new(false),
            function,
        }
    }

    /// The activation function this node applies.
    pub fn function(&self) -> Activation {
        self.function
    }

    /// Replace the activation function; used when a factory-created node
    /// is specialized during realization.
    pub fn set_function(&mut self, function: Activation) {
        self.function = function;
    }
}

impl Layer for ActivationLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::ACTIVATION
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        if self.function == Activation::Unknown {
            return Err(EdgennError::not_supported(
                "activation layer with unknown function",
            ));
        }
        self.base.output_dim = self.base.input_dim.clone();
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let f = self.function;
        bufs.transform(i.value, o.value, |t| f.apply(t))
    }

    fn activation_function(&self) -> Option<Activation> {
        Some(self.function)
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        // Clone before writing: the input gradient may alias the output
        // value after in-place optimization.
        let y = bufs.read(o.value).clone();
        let dy = bufs.read(o.gradient).clone();
        let dx = self.function.derivative(&y, &dy)?;
        *bufs.write(i.gradient) = dx;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Dim, Tensor};

    #[test]
    fn test_relu_forward_and_backward() {
        let dim = Dim::new(1, 1, 1, 4);
        let mut layer = ActivationLayer::new(Activation::ReLU);
        layer.base_mut().input_dim[0] = dim;
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        let i = m.alloc_slot(&dim);
        let o = m.alloc_slot(&dim);
        layer.base_mut().net_input = vec![i];
        layer.base_mut().net_hidden = vec![o];

        let x = Tensor::from_vec(vec![-2.0, -0.5, 0.5, 2.0], &dim).unwrap();
        m.write(m.slot(i).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();
        assert_eq!(m.read(m.slot(o).value).to_vec(), vec![0.0, 0.0, 0.5, 2.0]);

        let dy = Tensor::from_vec(vec![1.0; 4], &dim).unwrap();
        m.write(m.slot(o).gradient).assign(&dy).unwrap();
        layer.calc_derivative(&m).unwrap();
        assert_eq!(
            m.read(m.slot(i).gradient).to_vec(),
            vec![0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_aliased_buffers_stay_correct() {
        // Same slot for input and output, as left by in-place optimization.
        let dim = Dim::new(1, 1, 1, 2);
        let mut layer = ActivationLayer::new(Activation::Sigmoid);
        layer.base_mut().input_dim[0] = dim;
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();
        let s = m.alloc_slot(&dim);
        layer.base_mut().net_input = vec![s];
        layer.base_mut().net_hidden = vec![s];

        let x = Tensor::from_vec(vec![0.0, 0.0], &dim).unwrap();
        m.write(m.slot(s).value).assign(&x).unwrap();
        layer.forwarding(&m, true).unwrap();
        let y = m.read(m.slot(s).value).to_vec();
        assert!((y[0] - 0.5).abs() < 1e-6);
    }
}
