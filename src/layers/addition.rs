//! Elementwise addition layer.
//!
//! Synthesized during realization when a layer declares several producers
//! but only accepts one input; sums all inputs into a single output.

use crate::error::{EdgennError, Result};
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;

/// Sums any number of equally shaped inputs.
#[derive(Debug, Default)]
pub struct AdditionLayer {
    base: LayerBase,
}

impl AdditionLayer {
    /// Create an addition layer; input count follows `input_layers`.
    pub fn new() -> Self {
        Self {
            base: LayerBase::new(false),
        }
    }
}

impl Layer for AdditionLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::ADDITION
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        let first = self.base.input_dim[0];
        for d in &self.base.input_dim[1..] {
            if *d != first {
                return Err(EdgennError::dimension_mismatch(
                    first.to_string(),
                    d.to_string(),
                ));
            }
        }
        self.base.output_dim = vec![first];
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let mut acc = bufs.read(bufs.slot(self.base.net_input[0]).value).clone();
        for &slot in &self.base.net_input[1..] {
            acc.add_assign(&bufs.read(bufs.slot(slot).value))?;
        }
        let o = bufs.slot(self.base.net_hidden[0]);
        *bufs.write(o.value) = acc;
        Ok(())
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let o = bufs.slot(self.base.net_hidden[0]);
        let dy = bufs.read(o.gradient).clone();
        for &slot in &self.base.net_input {
            let i = bufs.slot(slot);
            *bufs.write(i.gradient) = dy.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Dim, Tensor};

    #[test]
    fn test_addition_of_three_inputs() {
        let dim = Dim::new(1, 1, 1, 2);
        let mut layer = AdditionLayer::new();
        layer.base_mut().input_dim = vec![dim; 3];
        let mut m = BufferManager::new();
        layer.initialize(&mut m).unwrap();

        let slots: Vec<_> = (0..3).map(|_| m.alloc_slot(&dim)).collect();
        let o = m.alloc_slot(&dim);
        layer.base_mut().net_input = slots.clone();
        layer.base_mut().net_hidden = vec![o];

        for (k, &s) in slots.iter().enumerate() {
            let t = Tensor::from_vec(vec![k as f32 + 1.0; 2], &dim).unwrap();
            m.write(m.slot(s).value).assign(&t).unwrap();
        }
        layer.forwarding(&m, false).unwrap();
        assert_eq!(m.read(m.slot(o).value).to_vec(), vec![6.0, 6.0]);

        let dy = Tensor::from_vec(vec![0.5, 1.5], &dim).unwrap();
        m.write(m.slot(o).gradient).assign(&dy).unwrap();
        layer.calc_derivative(&m).unwrap();
        for &s in &slots {
            assert_eq!(m.read(m.slot(s).gradient).to_vec(), vec![0.5, 1.5]);
        }
    }

    #[test]
    fn test_mismatched_inputs_rejected() {
        let mut layer = AdditionLayer::new();
        layer.base_mut().input_dim = vec![Dim::new(1, 1, 1, 2), Dim::new(1, 1, 1, 3)];
        let mut m = BufferManager::new();
        assert!(layer.initialize(&mut m).is_err());
    }
}
