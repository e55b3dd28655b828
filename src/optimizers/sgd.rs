//! Stochastic gradient descent.

use crate::error::{EdgennError, Result};
use crate::optimizers::{decayed_rate, Optimizer};
use crate::tensor::Tensor;

/// Plain SGD with an optional exponential learning-rate decay.
#[derive(Debug)]
pub struct Sgd {
    learning_rate: f32,
    decay_rate: f32,
    decay_steps: usize,
    iteration: u64,
}

impl Sgd {
    /// Create an SGD optimizer with the given learning rate.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            decay_rate: 1.0,
            decay_steps: 0,
            iteration: 0,
        }
    }

    /// Enable exponential learning-rate decay.
    pub fn with_decay(mut self, decay_rate: f32, decay_steps: usize) -> Self {
        self.decay_rate = decay_rate;
        self.decay_steps = decay_steps;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, parameters: &mut [Tensor], gradients: &[Tensor]) -> Result<()> {
        if parameters.len() != gradients.len() {
            return Err(EdgennError::invalid_parameter(format!(
                "{} parameters but {} gradients",
                parameters.len(),
                gradients.len()
            )));
        }
        let lr = decayed_rate(
            self.learning_rate,
            self.decay_rate,
            self.decay_steps,
            self.iteration,
        );
        for (w, g) in parameters.iter_mut().zip(gradients.iter()) {
            *w = w.sub(&g.scale(lr))?;
        }
        self.iteration += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f32) {
        self.learning_rate = learning_rate;
    }

    fn name(&self) -> &'static str {
        "sgd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dim;
    use approx::assert_relative_eq;

    #[test]
    fn test_step_moves_against_gradient() {
        let dim = Dim::new(1, 1, 1, 2);
        let mut opt = Sgd::new(0.5);
        let mut params = vec![Tensor::from_vec(vec![1.0, -1.0], &dim).unwrap()];
        let grads = vec![Tensor::from_vec(vec![2.0, -2.0], &dim).unwrap()];
        opt.step(&mut params, &grads).unwrap();
        assert_eq!(params[0].to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_decay_shrinks_updates() {
        let dim = Dim::new(1, 1, 1, 1);
        let mut opt = Sgd::new(1.0).with_decay(0.5, 1);
        let mut params = vec![Tensor::from_vec(vec![0.0], &dim).unwrap()];
        let grads = vec![Tensor::from_vec(vec![1.0], &dim).unwrap()];
        opt.step(&mut params, &grads).unwrap();
        assert_relative_eq!(params[0].to_vec()[0], -1.0);
        opt.step(&mut params, &grads).unwrap();
        // second step uses half the rate
        assert_relative_eq!(params[0].to_vec()[0], -1.5);
    }

    #[test]
    fn test_mismatched_lists_rejected() {
        let dim = Dim::new(1, 1, 1, 1);
        let mut opt = Sgd::new(0.1);
        let mut params = vec![Tensor::zeros(&dim)];
        assert!(opt.step(&mut params, &[]).is_err());
    }
}
