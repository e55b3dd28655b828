//! Channel concatenation layer.

use crate::error::{EdgennError, Result};
use crate::layers::{layer_type, Layer, LayerBase};
use crate::manager::BufferManager;
use crate::tensor::{Dim, Tensor};
use ndarray::{Axis, Slice};

/// Concatenates its inputs along the channel axis.
#[derive(Debug, Default)]
pub struct ConcatLayer {
    base: LayerBase,
}

impl ConcatLayer {
    /// Create a concat layer; input count follows `input_layers`.
    pub fn new() -> Self {
        Self {
            base: LayerBase::new(false),
        }
    }
}

impl Layer for ConcatLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::CONCAT
    }

    fn initialize(&mut self, _manager: &mut BufferManager) -> Result<()> {
        let first = self.base.input_dim[0];
        let mut channels = 0;
        for d in &self.base.input_dim {
            if d.batch != first.batch || d.height != first.height || d.width != first.width {
                return Err(EdgennError::dimension_mismatch(
                    first.to_string(),
                    d.to_string(),
                ));
            }
            channels += d.channel;
        }
        self.base.output_dim = vec![Dim::new(first.batch, channels, first.height, first.width)];
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let inputs: Vec<Tensor> = self
            .base
            .net_input
            .iter()
            .map(|&s| bufs.read(bufs.slot(s).value).clone())
            .collect();
        let views: Vec<_> = inputs.iter().map(|t| t.array().view()).collect();
        let out = ndarray::concatenate(Axis(1), &views)?;
        let o = bufs.slot(self.base.net_hidden[0]);
        *bufs.write(o.value) = Tensor::from_array(out);
        Ok(())
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let o = bufs.slot(self.base.net_hidden[0]);
        let dy = bufs.read(o.gradient).clone();
        let mut offset = 0;
        for (k, &slot) in self.base.net_input.iter().enumerate() {
            let c = self.base.input_dim[k].channel;
            let part = dy
                .array()
                .slice_axis(Axis(1), Slice::from(offset..offset + c))
                .to_owned();
            let i = bufs.slot(slot);
            *bufs.write(i.gradient) = Tensor::from_array(part);
            offset += c;
        }
        Ok(())
    }
}
