//! Activation functions and their derivatives.
//!
//! The graph realizes a layer's activation tag into a dedicated activation
//! node, so the functions here are consumed by `layers::activation` and by
//! the fused loss variants. Derivatives are expressed in terms of the
//! activation *output*: after in-place optimization the input storage may
//! have been overwritten, but the output is always available.

use crate::error::{EdgennError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Activation function tag carried by every layer.
///
/// `None` means "no activation realization needed"; `Unknown` is the
/// unparsed sentinel and always fails realization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// No activation
    None,
    /// Unrecognized activation; realization rejects it
    Unknown,
    /// Rectified linear unit
    ReLU,
    /// Logistic sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Row-wise softmax over the feature axis
    Softmax,
}

impl Default for Activation {
    fn default() -> Self {
        Activation::None
    }
}

impl Activation {
    /// Apply the activation to a tensor.
    ///
    /// Softmax is computed per batch row over the flattened feature axis
    /// with the usual max-subtraction for numerical stability.
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        match self {
            Activation::None => Ok(input.clone()),
            Activation::Unknown => Err(EdgennError::not_supported(
                "cannot apply unknown activation",
            )),
            Activation::ReLU => Ok(input.map(|x| x.max(0.0))),
            Activation::Sigmoid => Ok(input.map(sigmoid)),
            Activation::Tanh => Ok(input.map(f32::tanh)),
            Activation::Softmax => softmax(input),
        }
    }

    /// Derivative of the activation expressed via its output `y`,
    /// multiplied by the incoming gradient `dy`.
    pub fn derivative(&self, output: &Tensor, grad: &Tensor) -> Result<Tensor> {
        if output.shape() != grad.shape() {
            return Err(EdgennError::dimension_mismatch(
                format!("{:?}", output.shape()),
                format!("{:?}", grad.shape()),
            ));
        }
        match self {
            Activation::None => Ok(grad.clone()),
            Activation::Unknown => Err(EdgennError::not_supported(
                "cannot differentiate unknown activation",
            )),
            Activation::ReLU => {
                let mask = output.map(|y| if y > 0.0 { 1.0 } else { 0.0 });
                grad.mul(&mask)
            }
            Activation::Sigmoid => {
                let dydx = output.map(|y| y * (1.0 - y));
                grad.mul(&dydx)
            }
            Activation::Tanh => {
                let dydx = output.map(|y| 1.0 - y * y);
                grad.mul(&dydx)
            }
            Activation::Softmax => softmax_derivative(output, grad),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::None => "none",
            Activation::Unknown => "unknown",
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        };
        write!(f, "{}", name)
    }
}

/// Logistic sigmoid of one value.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Row-wise softmax over the feature axis of a 4-D tensor.
pub fn softmax(input: &Tensor) -> Result<Tensor> {
    let dim = input.dim()?;
    let rows = dim.batch;
    let cols = dim.feature_len();
    let flat = input.reshaped(&[rows, cols])?;
    let mut data = flat.to_vec();
    for r in 0..rows {
        let row = &mut data[r * cols..(r + 1) * cols];
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
    Tensor::from_vec(data, &dim)
}

/// Softmax backward: `dx = y * (dy - sum(dy * y))` per batch row.
fn softmax_derivative(output: &Tensor, grad: &Tensor) -> Result<Tensor> {
    let dim = output.dim()?;
    let rows = dim.batch;
    let cols = dim.feature_len();
    let y = output.to_vec();
    let dy = grad.to_vec();
    let mut dx = vec![0.0f32; y.len()];
    for r in 0..rows {
        let base = r * cols;
        let dot: f32 = (0..cols).map(|c| dy[base + c] * y[base + c]).sum();
        for c in 0..cols {
            dx[base + c] = y[base + c] * (dy[base + c] - dot);
        }
    }
    Tensor::from_vec(dx, &dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dim;
    use approx::assert_relative_eq;

    #[test]
    fn test_relu() {
        let dim = Dim::new(1, 1, 1, 4);
        let x = Tensor::from_vec(vec![-1.0, 0.0, 0.5, 2.0], &dim).unwrap();
        let y = Activation::ReLU.apply(&x).unwrap();
        assert_eq!(y.to_vec(), vec![0.0, 0.0, 0.5, 2.0]);

        let dy = Tensor::from_vec(vec![1.0, 1.0, 1.0, 1.0], &dim).unwrap();
        let dx = Activation::ReLU.derivative(&y, &dy).unwrap();
        assert_eq!(dx.to_vec(), vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sigmoid_derivative_via_output() {
        let dim = Dim::new(1, 1, 1, 1);
        let x = Tensor::from_vec(vec![0.0], &dim).unwrap();
        let y = Activation::Sigmoid.apply(&x).unwrap();
        assert_relative_eq!(y.to_vec()[0], 0.5);

        let dy = Tensor::from_vec(vec![1.0], &dim).unwrap();
        let dx = Activation::Sigmoid.derivative(&y, &dy).unwrap();
        assert_relative_eq!(dx.to_vec()[0], 0.25);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let dim = Dim::new(2, 1, 1, 3);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0], &dim).unwrap();
        let y = softmax(&x).unwrap();
        let v = y.to_vec();
        assert_relative_eq!(v[0] + v[1] + v[2], 1.0, epsilon = 1e-6);
        assert_relative_eq!(v[3] + v[4] + v[5], 1.0, epsilon = 1e-6);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn test_softmax_derivative_sums_to_zero() {
        // Gradient of softmax outputs against a one-hot upstream gradient
        // always sums to zero across the row.
        let dim = Dim::new(1, 1, 1, 3);
        let x = Tensor::from_vec(vec![0.1, 0.2, 0.7], &dim).unwrap();
        let y = softmax(&x).unwrap();
        let dy = Tensor::from_vec(vec![1.0, 0.0, 0.0], &dim).unwrap();
        let dx = Activation::Softmax.derivative(&y, &dy).unwrap();
        assert_relative_eq!(dx.to_vec().iter().sum::<f32>(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unknown_rejected() {
        let dim = Dim::new(1, 1, 1, 1);
        let x = Tensor::from_vec(vec![1.0], &dim).unwrap();
        assert!(Activation::Unknown.apply(&x).is_err());
    }
}
