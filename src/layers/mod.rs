//! Neural network layers.
//!
//! Layers are opaque polymorphic units from the graph's point of view:
//! they expose a name, input/output name references, per-port dimensions
//! and the forward/derivative/gradient entry points. Common bookkeeping
//! lives in [`LayerBase`]; each layer implementation only adds its own
//! parameters and math.

use crate::activations::Activation;
use crate::error::{EdgennError, Result};
use crate::manager::{BufferManager, SlotId};
use crate::tensor::{Dim, Tensor};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub mod activation;
pub mod addition;
pub mod batch_norm;
pub mod concat;
pub mod conv2d;
pub mod flatten;
pub mod fully_connected;
pub mod input;
pub mod loss;
pub mod output;

pub use activation::ActivationLayer;
pub use addition::AdditionLayer;
pub use batch_norm::BatchNormLayer;
pub use concat::ConcatLayer;
pub use conv2d::Conv2dLayer;
pub use flatten::FlattenLayer;
pub use fully_connected::FullyConnectedLayer;
pub use input::InputLayer;
pub use loss::{LossKind, LossLayer};
pub use output::OutputLayer;

/// Layer type tags used by graph realization and in-place optimization.
pub mod layer_type {
    /// Input (external data entry) layer
    pub const INPUT: &str = "input";
    /// Fully connected layer
    pub const FULLY_CONNECTED: &str = "fully_connected";
    /// 2-D convolution layer
    pub const CONV2D: &str = "conv2d";
    /// Activation layer
    pub const ACTIVATION: &str = "activation";
    /// Elementwise addition (fan-in) layer
    pub const ADDITION: &str = "addition";
    /// Channel concatenation layer
    pub const CONCAT: &str = "concat";
    /// Output splitter (fan-out) layer
    pub const OUTPUT: &str = "output";
    /// Flatten layer
    pub const FLATTEN: &str = "flatten";
    /// Batch normalization layer
    pub const BATCH_NORM: &str = "batch_normalization";
    /// Terminal loss layer
    pub const LOSS: &str = "loss";
}

/// A shared, interior-mutable handle to a layer.
///
/// The graph holds the long-lived owning reference; lookups return shallow
/// copies of the wrapper, so mutating through any alias observes the same
/// layer state.
pub type SharedLayer = Rc<RefCell<dyn Layer>>;

/// Wrap a concrete layer into a [`SharedLayer`] handle.
pub fn shared<L: Layer + 'static>(layer: L) -> SharedLayer {
    Rc::new(RefCell::new(layer))
}

/// Weight initialization strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    /// Xavier/Glorot uniform initialization
    Xavier,
    /// Xavier/Glorot normal initialization
    XavierNormal,
    /// He uniform initialization (for ReLU)
    He,
    /// He normal initialization (for ReLU)
    HeNormal,
    /// All zeros
    Zeros,
    /// All ones
    Ones,
    /// Constant value
    Constant(f32),
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::XavierNormal
    }
}

impl WeightInit {
    /// Create an initialized tensor of the given dimension.
    pub fn initialize(&self, dim: &Dim, fan_in: usize, fan_out: usize) -> Tensor {
        use rand::prelude::*;
        use rand_distr::StandardNormal;

        let n = dim.data_len();
        let mut rng = thread_rng();
        let data: Vec<f32> = match self {
            WeightInit::Xavier => {
                let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
                (0..n).map(|_| rng.gen_range(-bound..bound)).collect()
            }
            WeightInit::XavierNormal => {
                let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
                (0..n)
                    .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
                    .collect()
            }
            WeightInit::He => {
                let bound = (6.0 / fan_in as f32).sqrt();
                (0..n).map(|_| rng.gen_range(-bound..bound)).collect()
            }
            WeightInit::HeNormal => {
                let std = (2.0 / fan_in as f32).sqrt();
                (0..n)
                    .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
                    .collect()
            }
            WeightInit::Zeros => vec![0.0; n],
            WeightInit::Ones => vec![1.0; n],
            WeightInit::Constant(value) => vec![*value; n],
        };
        let mut tensor = Tensor::zeros(dim);
        for (slot, value) in tensor.array_mut().iter_mut().zip(data) {
            *slot = value;
        }
        tensor
    }

    /// A reasonable default initialization for a given activation.
    pub fn default_for_activation(activation: &Activation) -> Self {
        match activation {
            Activation::ReLU => WeightInit::HeNormal,
            _ => WeightInit::XavierNormal,
        }
    }
}

/// One learnable parameter tensor and its gradient.
#[derive(Debug, Clone)]
pub struct Weight {
    /// Parameter name, unique within the layer
    pub name: String,
    /// Parameter values
    pub value: Tensor,
    /// Accumulated gradient, same shape as `value`
    pub gradient: Tensor,
    /// Whether the optimizer may update this parameter
    pub trainable: bool,
}

impl Weight {
    /// Create a parameter with the given initialization.
    pub fn new(name: &str, dim: &Dim, init: WeightInit, fan_in: usize, fan_out: usize) -> Self {
        let value = init.initialize(dim, fan_in, fan_out);
        let gradient = value.zeros_like();
        Self {
            name: name.to_string(),
            value,
            gradient,
            trainable: true,
        }
    }
}

/// Graph-facing state shared by every layer.
#[derive(Debug, Clone, Default)]
pub struct LayerBase {
    /// Unique layer name (case-insensitive comparisons)
    pub name: String,
    /// Declared producers, by name
    pub input_layers: Vec<String>,
    /// Declared consumers, by name
    pub output_layers: Vec<String>,
    /// Declared input port count
    pub num_inputs: usize,
    /// Declared output port count
    pub num_outputs: usize,
    /// Per-input-port dimensions
    pub input_dim: Vec<Dim>,
    /// Per-output-port dimensions
    pub output_dim: Vec<Dim>,
    /// Activation tag; `Activation::None` needs no realization
    pub activation: Activation,
    /// Whether a flatten node should be realized after this layer
    pub flatten: bool,
    /// Whether this layer's parameters receive gradient updates
    pub trainable: bool,
    /// Input buffer slots, wired during graph initialization
    pub net_input: Vec<SlotId>,
    /// Output buffer slots, wired during graph initialization
    pub net_hidden: Vec<SlotId>,
    /// Learnable parameters
    pub weights: Vec<Weight>,
}

impl LayerBase {
    /// Create a base with single input/output ports and unset dimensions.
    pub fn new(trainable: bool) -> Self {
        Self {
            num_inputs: 1,
            num_outputs: 1,
            input_dim: vec![Dim::default()],
            output_dim: vec![Dim::default()],
            trainable,
            ..Self::default()
        }
    }
}

/// Base trait for all layers.
///
/// Call order guaranteed by the graph: construction and realization first
/// (name/wiring mutation only), then `initialize` once in topological
/// order, then any number of `forwarding` passes, with
/// `calc_gradient`/`calc_derivative` in reverse order during training.
pub trait Layer: fmt::Debug {
    /// Shared graph-facing state.
    fn base(&self) -> &LayerBase;

    /// Mutable shared graph-facing state.
    fn base_mut(&mut self) -> &mut LayerBase;

    /// Type tag, one of [`layer_type`].
    fn type_name(&self) -> &'static str;

    /// Resolve output dimensions from input dimensions and create weights.
    fn initialize(&mut self, manager: &mut BufferManager) -> Result<()>;

    /// Forward computation reading `net_input` and writing `net_hidden`.
    fn forwarding(&mut self, bufs: &BufferManager, training: bool) -> Result<()>;

    /// Compute the gradient w.r.t. the layer input from the output
    /// gradient, writing into the `net_input` gradient tensors.
    fn calc_derivative(&mut self, bufs: &BufferManager) -> Result<()>;

    /// Compute gradients for this layer's weights. Default: no weights.
    fn calc_gradient(&mut self, bufs: &BufferManager) -> Result<()> {
        let _ = bufs;
        Ok(())
    }

    /// Install the target tensor (loss layers only).
    fn set_targets(&mut self, targets: Tensor) -> Result<()> {
        let _ = targets;
        Err(EdgennError::not_supported(format!(
            "{} layer does not accept targets",
            self.type_name()
        )))
    }

    /// Most recent loss value (loss layers only).
    fn loss(&self) -> f32 {
        0.0
    }

    /// For activation nodes, the function they apply.
    fn activation_function(&self) -> Option<Activation> {
        None
    }

    /// Layer name.
    fn name(&self) -> &str {
        &self.base().name
    }
}

/// Create a synthetic layer by type tag; used by graph realization. The
/// new layer is named after its type until the graph assigns a unique name.
pub fn create_layer(type_name: &str) -> Result<SharedLayer> {
    let layer = match type_name {
        layer_type::ADDITION => shared(AdditionLayer::new()),
        layer_type::ACTIVATION => shared(ActivationLayer::new(Activation::None)),
        layer_type::OUTPUT => shared(OutputLayer::new()),
        layer_type::FLATTEN => shared(FlattenLayer::new()),
        layer_type::CONCAT => shared(ConcatLayer::new()),
        other => {
            return Err(EdgennError::invalid_parameter(format!(
                "unknown layer type: {}",
                other
            )))
        }
    };
    layer.borrow_mut().base_mut().name = type_name.to_string();
    Ok(layer)
}

/// Case-insensitive layer name comparison.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_init_shapes() {
        let dim = Dim::new(1, 1, 4, 8);
        let t = WeightInit::Xavier.initialize(&dim, 4, 8);
        assert_eq!(t.len(), 32);
        assert!(t.to_vec().iter().any(|&x| x != 0.0));

        let z = WeightInit::Zeros.initialize(&dim, 4, 8);
        assert!(z.to_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_factory_known_types() {
        for ty in [
            layer_type::ADDITION,
            layer_type::ACTIVATION,
            layer_type::OUTPUT,
            layer_type::FLATTEN,
            layer_type::CONCAT,
        ] {
            let layer = create_layer(ty).unwrap();
            assert_eq!(layer.borrow().type_name(), ty);
        }
        assert!(create_layer("totally_unknown").is_err());
    }

    #[test]
    fn test_names_equal_case_insensitive() {
        assert!(names_equal("Conv1", "conv1"));
        assert!(!names_equal("conv1", "conv2"));
    }

    #[test]
    fn test_layer_base_defaults() {
        let base = LayerBase::new(true);
        assert_eq!(base.num_inputs, 1);
        assert_eq!(base.num_outputs, 1);
        assert!(!base.input_dim[0].is_set());
        assert!(base.trainable);
    }
}
