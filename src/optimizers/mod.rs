//! Gradient-descent optimizers.
//!
//! Optimizers operate on flat parameter/gradient lists collected from the
//! graph after backwarding; they never see layers. Stateful optimizers
//! key their internal buffers by list position, so the caller must pass
//! parameters in a stable order.

use crate::error::{EdgennError, Result};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

/// Base trait for all optimizers.
pub trait Optimizer: fmt::Debug {
    /// Apply one update step to the given parameters.
    fn step(&mut self, parameters: &mut [Tensor], gradients: &[Tensor]) -> Result<()>;

    /// The configured base learning rate.
    fn learning_rate(&self) -> f32;

    /// Change the base learning rate.
    fn set_learning_rate(&mut self, learning_rate: f32);

    /// Optimizer name.
    fn name(&self) -> &'static str;
}

/// Serializable optimizer selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// Plain stochastic gradient descent
    Sgd {
        /// Base learning rate
        learning_rate: f32,
    },
    /// Adam with optional exponential learning-rate decay
    Adam {
        /// Base learning rate
        learning_rate: f32,
        /// First-moment decay
        beta1: f32,
        /// Second-moment decay
        beta2: f32,
        /// Divisor guard added to the square-rooted second moment
        epsilon: f32,
        /// Per-schedule decay factor; 1.0 disables decay
        decay_rate: f32,
        /// Steps per decay application; 0 disables decay
        decay_steps: usize,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Sgd {
            learning_rate: 0.01,
        }
    }
}

impl OptimizerConfig {
    /// Adam with its customary defaults.
    pub fn adam(learning_rate: f32) -> Self {
        OptimizerConfig::Adam {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            decay_rate: 1.0,
            decay_steps: 0,
        }
    }
}

/// Instantiate an optimizer from its configuration.
pub fn create_optimizer(config: &OptimizerConfig) -> Result<Box<dyn Optimizer>> {
    match *config {
        OptimizerConfig::Sgd { learning_rate } => {
            if learning_rate <= 0.0 {
                return Err(EdgennError::configuration(
                    "learning rate must be positive",
                ));
            }
            Ok(Box::new(Sgd::new(learning_rate)))
        }
        OptimizerConfig::Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            decay_rate,
            decay_steps,
        } => {
            if learning_rate <= 0.0 {
                return Err(EdgennError::configuration(
                    "learning rate must be positive",
                ));
            }
            if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
                return Err(EdgennError::configuration(
                    "adam betas must lie in [0, 1)",
                ));
            }
            Ok(Box::new(
                Adam::new(learning_rate, beta1, beta2, epsilon)
                    .with_decay(decay_rate, decay_steps),
            ))
        }
    }
}

/// Exponential decay schedule shared by the optimizers; `decay_steps` of
/// zero disables it.
pub(crate) fn decayed_rate(
    base: f32,
    decay_rate: f32,
    decay_steps: usize,
    iteration: u64,
) -> f32 {
    if decay_steps == 0 {
        base
    } else {
        base * decay_rate.powf(iteration as f32 / decay_steps as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_validates_config() {
        assert!(create_optimizer(&OptimizerConfig::Sgd {
            learning_rate: 0.1
        })
        .is_ok());
        assert!(create_optimizer(&OptimizerConfig::Sgd {
            learning_rate: 0.0
        })
        .is_err());
        assert!(create_optimizer(&OptimizerConfig::adam(0.001)).is_ok());

        let bad = OptimizerConfig::Adam {
            learning_rate: 0.001,
            beta1: 1.5,
            beta2: 0.999,
            epsilon: 1e-7,
            decay_rate: 1.0,
            decay_steps: 0,
        };
        assert!(create_optimizer(&bad).is_err());
    }

    #[test]
    fn test_decay_schedule() {
        assert_eq!(decayed_rate(1.0, 0.5, 0, 100), 1.0);
        let r = decayed_rate(1.0, 0.5, 10, 10);
        assert!((r - 0.5).abs() < 1e-6);
    }
}
