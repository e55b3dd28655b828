//! Adam optimizer.

use crate::error::{EdgennError, Result};
use crate::optimizers::{decayed_rate, Optimizer};
use crate::tensor::Tensor;

/// Adam with bias-corrected first and second moments.
///
/// Moment buffers are created lazily on the first step and keyed by
/// parameter position, so the parameter list must stay stable across
/// steps.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    decay_rate: f32,
    decay_steps: usize,
    iteration: u64,
    moments: Vec<(Tensor, Tensor)>,
}

impl Adam {
    /// Create an Adam optimizer.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            decay_rate: 1.0,
            decay_steps: 0,
            iteration: 0,
            moments: Vec::new(),
        }
    }

    /// Enable exponential learning-rate decay.
    pub fn with_decay(mut self, decay_rate: f32, decay_steps: usize) -> Self {
        self.decay_rate = decay_rate;
        self.decay_steps = decay_steps;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, parameters: &mut [Tensor], gradients: &[Tensor]) -> Result<()> {
        if parameters.len() != gradients.len() {
            return Err(EdgennError::invalid_parameter(format!(
                "{} parameters but {} gradients",
                parameters.len(),
                gradients.len()
            )));
        }
        if self.moments.len() != parameters.len() {
            self.moments = parameters
                .iter()
                .map(|p| (p.zeros_like(), p.zeros_like()))
                .collect();
        }

        let t = (self.iteration + 1) as i32;
        let correction =
            (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t));
        let lr = decayed_rate(
            self.learning_rate,
            self.decay_rate,
            self.decay_steps,
            self.iteration,
        ) * correction;

        for (i, (w, g)) in parameters.iter_mut().zip(gradients.iter()).enumerate() {
            let (m, v) = &mut self.moments[i];
            *m = m.scale(self.beta1).add(&g.scale(1.0 - self.beta1))?;
            *v = v
                .scale(self.beta2)
                .add(&g.mul(g)?.scale(1.0 - self.beta2))?;
            let eps = self.epsilon;
            let denom = v.map(|x| x.sqrt() + eps);
            let update = m.div(&denom)?.scale(lr);
            *w = w.sub(&update)?;
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
        "adam"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dim;

    #[test]
    fn test_converges_on_quadratic() {
        // minimize f(w) = w^2 with gradient 2w
        let dim = Dim::new(1, 1, 1, 1);
        let mut opt = Adam::new(0.1, 0.9, 0.999, 1e-7);
        let mut params = vec![Tensor::from_vec(vec![2.0], &dim).unwrap()];
        for _ in 0..200 {
            let g = params[0].scale(2.0);
            opt.step(&mut params, &[g]).unwrap();
        }
        assert!(params[0].to_vec()[0].abs() < 0.05);
    }

    #[test]
    fn test_first_step_magnitude_is_bounded_by_lr() {
        // with bias correction the very first update is close to the
        // learning rate regardless of gradient scale
        let dim = Dim::new(1, 1, 1, 1);
        let mut opt = Adam::new(0.01, 0.9, 0.999, 1e-7);
        let mut params = vec![Tensor::from_vec(vec![0.0], &dim).unwrap()];
        let grads = vec![Tensor::from_vec(vec![1000.0], &dim).unwrap()];
        opt.step(&mut params, &grads).unwrap();
        let step = params[0].to_vec()[0].abs();
        assert!(step > 0.005 && step < 0.02, "step was {}", step);
    }

    #[test]
    fn test_moments_follow_parameter_list() {
        let dim = Dim::new(1, 1, 1, 2);
        let mut opt = Adam::new(0.001, 0.9, 0.999, 1e-7);
        let mut params = vec![Tensor::zeros(&dim), Tensor::zeros(&dim)];
        let grads = vec![Tensor::zeros(&dim), Tensor::zeros(&dim)];
        opt.step(&mut params, &grads).unwrap();
        assert_eq!(opt.moments.len(), 2);
    }
}
