//! Lightweight neural-network training engine for resource-constrained
//! targets.
//!
//! A model is described as a flat list of layers. Compilation realizes
//! that list into a single-input, single-output DAG by inserting
//! synthetic addition, activation, fan-out and flatten nodes, sorts it
//! topologically, sizes the shared tensor arena, and applies in-place
//! buffer aliasing where a layer can safely overwrite its input.
//!
//! ```no_run
//! use edgenn::prelude::*;
//!
//! # fn main() -> edgenn::Result<()> {
//! let mut net = NetworkBuilder::new()
//!     .input("in", Dim::new(4, 1, 1, 2))
//!     .fully_connected("hidden", 8, Activation::ReLU)
//!     .fully_connected("head", 1, Activation::None)
//!     .loss(LossKind::Mse)
//!     .optimizer(OptimizerConfig::adam(0.01))
//!     .build()?;
//!
//! let x = Tensor::zeros(&Dim::new(4, 1, 1, 2));
//! let t = Tensor::zeros(&Dim::new(4, 1, 1, 1));
//! let loss = net.train_step(&x, &t)?;
//! # let _ = loss;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod activations;
pub mod error;
pub mod graph;
pub mod layers;
pub mod manager;
pub mod network;
pub mod optimizers;
pub mod profiler;
pub mod tensor;

pub use error::{EdgennError, Result};
pub use network::{NetworkBuilder, NeuralNetwork};

/// Convenience re-exports for building and training networks.
pub mod prelude {
    pub use crate::activations::Activation;
    pub use crate::error::{EdgennError, Result};
    pub use crate::graph::NetworkGraph;
    pub use crate::layers::{
        shared, ActivationLayer, AdditionLayer, BatchNormLayer, ConcatLayer, Conv2dLayer,
        FlattenLayer, FullyConnectedLayer, InputLayer, Layer, LossKind, LossLayer, OutputLayer,
        SharedLayer, WeightInit,
    };
    pub use crate::network::{NetworkBuilder, NeuralNetwork};
    pub use crate::optimizers::{create_optimizer, Optimizer, OptimizerConfig};
    pub use crate::tensor::{Dim, Tensor};
}
