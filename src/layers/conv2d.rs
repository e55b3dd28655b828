//! 2-D convolution layer.
//!
//! Forward lowers each input image to a column matrix (im2col) so the
//! convolution becomes one GEMM per batch entry; batches run in parallel.
//! The input derivative is a full correlation of the (stride-dilated)
//! output gradient against 180°-rotated kernels, again via im2col.

use crate::error::{EdgennError, Result};
use crate::layers::{layer_type, Layer, LayerBase, Weight, WeightInit};
use crate::manager::BufferManager;
use crate::tensor::{Dim, Tensor};
use rayon::prelude::*;

/// Convolution over `[b, c, h, w]` inputs with per-filter bias.
#[derive(Debug)]
pub struct Conv2dLayer {
    base: LayerBase,
    filters: usize,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    init: WeightInit,
}

impl Conv2dLayer {
    /// Create a convolution with the given filter count and kernel size,
    /// stride 1 and no padding.
    pub fn new(filters: usize, kernel: (usize, usize)) -> Self {
        Self {
            base: LayerBase::new(true),
            filters,
            kernel,
            stride: (1, 1),
            padding: (0, 0),
            init: WeightInit::default(),
        }
    }

    /// Set the stride.
    pub fn with_stride(mut self, stride: (usize, usize)) -> Self {
        self.stride = stride;
        self
    }

    /// Set the zero padding.
    pub fn with_padding(mut self, padding: (usize, usize)) -> Self {
        self.padding = padding;
        self
    }

    /// Override the weight initialization.
    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    fn out_extent(input: usize, kernel: usize, stride: usize, padding: usize) -> usize {
        (input + 2 * padding - kernel) / stride + 1
    }
}

impl Layer for Conv2dLayer {
    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        layer_type::CONV2D
    }

    fn initialize(&mut self, manager: &mut BufferManager) -> Result<()> {
        let in_dim = self.base.input_dim[0];
        let (kh, kw) = self.kernel;
        let (sh, sw) = self.stride;
        let (ph, pw) = self.padding;
        if kh == 0 || kw == 0 || sh == 0 || sw == 0 {
            return Err(EdgennError::invalid_parameter(
                "convolution kernel and stride must be non-zero",
            ));
        }
        if in_dim.height + 2 * ph < kh || in_dim.width + 2 * pw < kw {
            return Err(EdgennError::invalid_parameter(format!(
                "kernel {}x{} larger than padded input {}",
                kh, kw, in_dim
            )));
        }
        // Backward recovers the input with a full-size correlation pad.
        if ph >= kh || pw >= kw {
            return Err(EdgennError::invalid_parameter(
                "padding must be smaller than the kernel",
            ));
        }
        let oh = Self::out_extent(in_dim.height, kh, sh, ph);
        let ow = Self::out_extent(in_dim.width, kw, sw, pw);
        self.base.output_dim = vec![Dim::new(in_dim.batch, self.filters, oh, ow)];

        if self.base.weights.is_empty() {
            let fan_in = in_dim.channel * kh * kw;
            let fan_out = self.filters * kh * kw;
            self.base.weights = vec![
                Weight::new(
                    "filter",
                    &Dim::new(self.filters, in_dim.channel, kh, kw),
                    self.init,
                    fan_in,
                    fan_out,
                ),
                Weight::new(
                    "bias",
                    &Dim::new(1, self.filters, 1, 1),
                    WeightInit::Zeros,
                    fan_in,
                    fan_out,
                ),
            ];
            manager.track_weights(&self.base.name, &self.base.weights);
        }
        Ok(())
    }

    fn forwarding(&mut self, bufs: &BufferManager, _training: bool) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let in_dim = self.base.input_dim[0];
        let out_dim = self.base.output_dim[0];
        let ckk = in_dim.channel * self.kernel.0 * self.kernel.1;

        let x = bufs.read(i.value).clone();
        let filter2 = self.base.weights[0].value.reshaped(&[self.filters, ckk])?;
        let bias = self.base.weights[1].value.clone();
        let kernel = self.kernel;
        let stride = self.stride;
        let padding = self.padding;
        let filters = self.filters;

        let per_batch: Result<Vec<Tensor>> = (0..in_dim.batch)
            .into_par_iter()
            .map(|bi| {
                let img = x.batch_slice(bi)?;
                let col = im2col(&img, kernel, stride, padding)?;
                let y = filter2.dot(&col, false, false)?;
                y.reshaped(&[1, filters, out_dim.height, out_dim.width])?
                    .add(&bias)
            })
            .collect();
        let per_batch = per_batch?;

        let mut out = bufs.write(o.value);
        for (bi, y) in per_batch.iter().enumerate() {
            out.assign_batch(bi, y)?;
        }
        Ok(())
    }

    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let in_dim = self.base.input_dim[0];
        let (kh, kw) = self.kernel;
        let (ph, pw) = self.padding;
        let channels = in_dim.channel;

        // Kernels rotated 180° with filter and channel roles swapped:
        // one row per input channel, `filters * kh * kw` columns.
        let f = &self.base.weights[0].value;
        let mut rotated = Tensor::zeros_shaped(&[channels, self.filters * kh * kw]);
        for c in 0..channels {
            for fi in 0..self.filters {
                for r in 0..kh {
                    for s in 0..kw {
                        rotated.array_mut()[[c, fi * kh * kw + r * kw + s]] =
                            f.at(fi, c, kh - 1 - r, kw - 1 - s);
                    }
                }
            }
        }

        let dy = bufs.read(o.gradient).clone();
        let kernel = self.kernel;
        let stride = self.stride;
        let full_pad = (kh - 1 - ph, kw - 1 - pw);

        let per_batch: Result<Vec<Tensor>> = (0..in_dim.batch)
            .into_par_iter()
            .map(|bi| {
                let dyb = dilate(&dy.batch_slice(bi)?, stride)?;
                let col = im2col(&dyb, kernel, (1, 1), full_pad)?;
                let dx = rotated.dot(&col, false, false)?;
                let rows = dx.len() / channels;
                let dil = dyb.dim()?;
                let rh = dil.height + 2 * full_pad.0 - kh + 1;
                let rw = rows / rh;
                let dx = dx.reshaped(&[1, channels, rh, rw])?;
                // With non-divisible stride arithmetic the recovered patch
                // is smaller than the input; trailing rows never received
                // gradient and stay zero.
                let mut full = Tensor::zeros(&Dim::new(1, channels, in_dim.height, in_dim.width));
                for c in 0..channels {
                    for r in 0..rh.min(in_dim.height) {
                        for s in 0..rw.min(in_dim.width) {
                            full.set_at(0, c, r, s, dx.at(0, c, r, s));
                        }
                    }
                }
                Ok(full)
            })
            .collect();
        let per_batch = per_batch?;

        let mut grad = bufs.write(i.gradient);
        for (bi, dx) in per_batch.iter().enumerate() {
            grad.assign_batch(bi, dx)?;
        }
        Ok(())
    }

    fn calc_gradient(&mut self, bufs: &BufferManager) -> Result<()> {
        let i = bufs.slot(self.base.net_input[0]);
        let o = bufs.slot(self.base.net_hidden[0]);
        let in_dim = self.base.input_dim[0];
        let out_dim = self.base.output_dim[0];
        let ckk = in_dim.channel * self.kernel.0 * self.kernel.1;
        let ohw = out_dim.height * out_dim.width;

        let x = bufs.read(i.value).clone();
        let dy = bufs.read(o.gradient).clone();
        let kernel = self.kernel;
        let stride = self.stride;
        let padding = self.padding;
        let filters = self.filters;

        let per_batch: Result<Vec<Tensor>> = (0..in_dim.batch)
            .into_par_iter()
            .map(|bi| {
                let img = x.batch_slice(bi)?;
                let col = im2col(&img, kernel, stride, padding)?;
                let dyb = dy.batch_slice(bi)?.reshaped(&[filters, ohw])?;
                dyb.dot(&col, false, true)
            })
            .collect();

        let mut dw = Tensor::zeros_shaped(&[filters, ckk]);
        for part in per_batch? {
            dw.add_assign(&part)?;
        }
        self.base.weights[0].gradient.assign(&dw)?;
        self.base.weights[1].gradient.assign(&dy.sum_to_channel()?)
    }
}

/// Lower a `[1, c, h, w]` image into a `[c*kh*kw, oh*ow]` column matrix,
/// reading zeros for positions that fall inside the virtual padding.
fn im2col(
    image: &Tensor,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<Tensor> {
    let dim = image.dim()?;
    let (kh, kw) = kernel;
    let (sh, sw) = stride;
    let (ph, pw) = padding;
    let oh = (dim.height + 2 * ph - kh) / sh + 1;
    let ow = (dim.width + 2 * pw - kw) / sw + 1;

    let mut col = Tensor::zeros_shaped(&[dim.channel * kh * kw, oh * ow]);
    for c in 0..dim.channel {
        for r in 0..kh {
            for s in 0..kw {
                let row = c * kh * kw + r * kw + s;
                for oy in 0..oh {
                    for ox in 0..ow {
                        let iy = oy * sh + r;
                        let ix = ox * sw + s;
                        if iy < ph || ix < pw {
                            continue;
                        }
                        let (iy, ix) = (iy - ph, ix - pw);
                        if iy >= dim.height || ix >= dim.width {
                            continue;
                        }
                        col.array_mut()[[row, oy * ow + ox]] = image.at(0, c, iy, ix);
                    }
                }
            }
        }
    }
    Ok(col)
}

/// Insert `stride - 1` zeros between neighboring elements along height and
/// width; identity for stride 1.
fn dilate(t: &Tensor, stride: (usize, usize)) -> Result<Tensor> {
    let (sh, sw) = stride;
    if sh == 1 && sw == 1 {
        return Ok(t.clone());
    }
    let dim = t.dim()?;
    let dh = (dim.height - 1) * sh + 1;
    let dw = (dim.width - 1) * sw + 1;
    let mut out = Tensor::zeros(&Dim::new(dim.batch, dim.channel, dh, dw));
    for b in 0..dim.batch {
        for c in 0..dim.channel {
            for h in 0..dim.height {
                for w in 0..dim.width {
                    out.set_at(b, c, h * sh, w * sw, t.at(b, c, h, w));
                }
            }
        }
    }
    Ok(out)
}
