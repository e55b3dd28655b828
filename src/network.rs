//! High-level training interface.
//!
//! [`NeuralNetwork`] owns the graph, its buffer manager and an optimizer,
//! and exposes compile/forward/train entry points. [`NetworkBuilder`]
//! offers a fluent way to assemble the flat layer list the graph compiles
//! from.

use crate::activations::Activation;
use crate::error::{EdgennError, Result};
use crate::graph::NetworkGraph;
use crate::layers::{
    shared, BatchNormLayer, ConcatLayer, Conv2dLayer, FullyConnectedLayer, InputLayer, LossKind,
    SharedLayer,
};
use crate::manager::BufferManager;
use crate::optimizers::{create_optimizer, Optimizer, OptimizerConfig};
use crate::tensor::{Dim, Tensor};
use log::{debug, info};
use std::fmt::Write as _;

/// A compiled, trainable network.
pub struct NeuralNetwork {
    graph: NetworkGraph,
    manager: BufferManager,
    optimizer: Box<dyn Optimizer>,
    loss_kind: LossKind,
    layers: Vec<SharedLayer>,
    compiled: bool,
}

impl NeuralNetwork {
    /// Create an empty network with the default optimizer.
    pub fn new() -> Result<Self> {
        Ok(Self {
            graph: NetworkGraph::new(),
            manager: BufferManager::new(),
            optimizer: create_optimizer(&OptimizerConfig::default())?,
            loss_kind: LossKind::None,
            layers: Vec::new(),
            compiled: false,
        })
    }

    /// Append a layer to the (not yet compiled) network.
    pub fn add_layer(&mut self, layer: SharedLayer) -> Result<()> {
        if self.compiled {
            return Err(EdgennError::configuration(
                "cannot add layers after compilation",
            ));
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Select the training objective.
    pub fn set_loss(&mut self, kind: LossKind) -> Result<()> {
        if self.compiled {
            return Err(EdgennError::configuration(
                "cannot change the loss after compilation",
            ));
        }
        self.loss_kind = kind;
        Ok(())
    }

    /// Replace the optimizer.
    pub fn set_optimizer(&mut self, config: &OptimizerConfig) -> Result<()> {
        self.optimizer = create_optimizer(config)?;
        Ok(())
    }

    /// Chain each layer without declared producers or an explicit input
    /// dimension to its list predecessor. The graph itself rejects such
    /// layers, so the convenience lives here.
    fn chain_undeclared_inputs(&mut self) {
        for layer in &self.layers {
            if layer.borrow().name().is_empty() {
                let default = layer.borrow().type_name().to_string();
                layer.borrow_mut().base_mut().name = default;
            }
        }
        for pair in self.layers.windows(2) {
            let prev = pair[0].borrow().name().to_string();
            let mut l = pair[1].borrow_mut();
            if l.base().input_layers.is_empty() && !l.base().input_dim[0].is_set() {
                l.base_mut().input_layers.push(prev);
            }
        }
    }

    /// Realize, sort and wire the graph. Must be called exactly once
    /// before any forward or training call.
    pub fn compile(&mut self) -> Result<()> {
        if self.compiled {
            return Err(EdgennError::configuration("network is already compiled"));
        }
        self.chain_undeclared_inputs();
        self.graph.set_graph_node(&self.layers, self.loss_kind)?;
        self.graph.set_edge()?;
        self.graph.topological_sort()?;
        self.graph.set_num_net_buffer_size()?;
        self.graph.initialize(&mut self.manager)?;
        self.graph.in_place_optimize(&mut self.manager)?;
        self.compiled = true;
        info!(
            "compiled network: {} nodes, {} trainable weight elements",
            self.graph.len(),
            self.manager.tracked_weight_elements()
        );
        Ok(())
    }

    fn ensure_compiled(&self) -> Result<()> {
        if self.compiled {
            Ok(())
        } else {
            Err(EdgennError::configuration("network is not compiled"))
        }
    }

    fn inject_input(&mut self, input: &Tensor) -> Result<()> {
        let root = self
            .graph
            .sorted()
            .first()
            .cloned()
            .ok_or_else(|| EdgennError::graph("the graph has no nodes"))?;
        let slot = root.layer.borrow().base().net_input[0];
        self.manager
            .write(self.manager.slot(slot).value)
            .assign(input)
    }

    /// Run inference on one input batch.
    pub fn forward(&mut self, input: &Tensor) -> Result<Vec<Tensor>> {
        self.ensure_compiled()?;
        self.inject_input(input)?;
        self.graph.forwarding(&self.manager, false)
    }

    /// Run one forward/backward/update cycle and return the loss.
    pub fn train_step(&mut self, input: &Tensor, targets: &Tensor) -> Result<f32> {
        self.ensure_compiled()?;
        self.graph.set_targets(targets.clone())?;
        self.inject_input(input)?;
        self.graph.forwarding(&self.manager, true)?;
        self.graph.backwarding(&self.manager)?;
        self.apply_gradients()?;
        Ok(self.graph.loss())
    }

    fn apply_gradients(&mut self) -> Result<()> {
        let mut params: Vec<Tensor> = Vec::new();
        let mut grads: Vec<Tensor> = Vec::new();
        for node in self.graph.sorted() {
            let l = node.layer.borrow();
            for w in &l.base().weights {
                if w.trainable {
                    params.push(w.value.clone());
                    grads.push(w.gradient.clone());
                }
            }
        }
        self.optimizer.step(&mut params, &grads)?;

        let mut updated = params.into_iter();
        for node in self.graph.sorted() {
            let mut l = node.layer.borrow_mut();
            for w in &mut l.base_mut().weights {
                if w.trainable {
                    w.value = updated.next().ok_or_else(|| {
                        EdgennError::graph("optimizer returned too few parameters")
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Train for several epochs over a set of batches, returning the mean
    /// loss per epoch.
    pub fn train(
        &mut self,
        inputs: &[Tensor],
        targets: &[Tensor],
        epochs: usize,
    ) -> Result<Vec<f32>> {
        if inputs.len() != targets.len() {
            return Err(EdgennError::invalid_parameter(format!(
                "{} input batches but {} target batches",
                inputs.len(),
                targets.len()
            )));
        }
        if inputs.is_empty() {
            return Err(EdgennError::invalid_parameter("no training data"));
        }
        let mut history = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let mut total = 0.0;
            for (x, t) in inputs.iter().zip(targets.iter()) {
                total += self.train_step(x, t)?;
            }
            let mean = total / inputs.len() as f32;
            debug!("epoch {}: loss {:.6}", epoch + 1, mean);
            history.push(mean);
        }
        Ok(history)
    }

    /// Most recent loss value.
    pub fn loss(&self) -> f32 {
        self.graph.loss()
    }

    /// Input dimension of the compiled graph.
    pub fn input_dim(&self) -> Result<Dim> {
        self.graph.input_dim()
    }

    /// Output dimension of the compiled graph.
    pub fn output_dim(&self) -> Result<Dim> {
        self.graph.output_dim()
    }

    /// The compiled graph.
    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    /// One line per node in execution order.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<28} {:<20} {:>14}", "name", "type", "output");
        for node in self.graph.sorted() {
            let l = node.layer.borrow();
            let dim = l.base().output_dim[0];
            let _ = writeln!(out, "{:<28} {:<20} {:>14}", l.name(), l.type_name(), dim);
        }
        out
    }
}

/// Fluent assembly of a [`NeuralNetwork`].
///
/// Layers are appended in order; a layer without explicit producers is
/// chained behind its predecessor during compilation.
#[derive(Default)]
pub struct NetworkBuilder {
    layers: Vec<SharedLayer>,
    loss: LossKind,
    optimizer: OptimizerConfig,
}

impl NetworkBuilder {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn named(layer: SharedLayer, name: &str) -> SharedLayer {
        layer.borrow_mut().base_mut().name = name.to_string();
        layer
    }

    /// Append an arbitrary layer.
    pub fn layer(mut self, layer: SharedLayer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Append a data entry layer.
    pub fn input(mut self, name: &str, dim: Dim) -> Self {
        self.layers
            .push(Self::named(shared(InputLayer::new(dim)), name));
        self
    }

    /// Append a fully connected layer.
    pub fn fully_connected(mut self, name: &str, unit: usize, activation: Activation) -> Self {
        let layer = Self::named(shared(FullyConnectedLayer::new(unit)), name);
        layer.borrow_mut().base_mut().activation = activation;
        self.layers.push(layer);
        self
    }

    /// Append a convolution layer.
    pub fn conv2d(
        mut self,
        name: &str,
        filters: usize,
        kernel: (usize, usize),
        activation: Activation,
    ) -> Self {
        let layer = Self::named(shared(Conv2dLayer::new(filters, kernel)), name);
        layer.borrow_mut().base_mut().activation = activation;
        self.layers.push(layer);
        self
    }

    /// Append a batch normalization layer.
    pub fn batch_norm(mut self, name: &str) -> Self {
        self.layers
            .push(Self::named(shared(BatchNormLayer::new()), name));
        self
    }

    /// Append a concat layer joining the named producers.
    pub fn concat(mut self, name: &str, inputs: &[&str]) -> Self {
        let layer = Self::named(shared(ConcatLayer::new()), name);
        layer.borrow_mut().base_mut().input_layers =
            inputs.iter().map(|s| s.to_string()).collect();
        self.layers.push(layer);
        self
    }

    /// Mark the most recently added layer for flatten realization.
    pub fn flatten(self) -> Self {
        if let Some(last) = self.layers.last() {
            last.borrow_mut().base_mut().flatten = true;
        }
        self
    }

    /// Declare the most recently added layer's producers by name.
    pub fn from_layers(self, inputs: &[&str]) -> Self {
        if let Some(last) = self.layers.last() {
            last.borrow_mut().base_mut().input_layers =
                inputs.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    /// Select the training objective.
    pub fn loss(mut self, kind: LossKind) -> Self {
        self.loss = kind;
        self
    }

    /// Select the optimizer.
    pub fn optimizer(mut self, config: OptimizerConfig) -> Self {
        self.optimizer = config;
        self
    }

    /// Assemble and compile the network.
    pub fn build(self) -> Result<NeuralNetwork> {
        let mut network = NeuralNetwork::new()?;
        network.set_optimizer(&self.optimizer)?;
        network.set_loss(self.loss)?;
        for layer in self.layers {
            network.add_layer(layer)?;
        }
        network.compile()?;
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::WeightInit;

    #[test]
    fn test_builder_compiles_chain() {
        let net = NetworkBuilder::new()
            .input("in", Dim::new(1, 1, 1, 2))
            .fully_connected("hidden", 4, Activation::ReLU)
            .fully_connected("head", 1, Activation::None)
            .loss(LossKind::Mse)
            .build()
            .unwrap();

        // in, hidden, hidden/activation, head, loss
        assert_eq!(net.graph().len(), 5);
        assert_eq!(net.output_dim().unwrap(), Dim::new(1, 1, 1, 1));
    }

    #[test]
    fn test_compile_chains_undeclared_producers() {
        let net = NetworkBuilder::new()
            .input("in", Dim::new(1, 1, 1, 2))
            .fully_connected("head", 1, Activation::None)
            .build()
            .unwrap();
        let head = net.graph().node_by_name("head").unwrap();
        assert_eq!(
            head.layer.borrow().base().input_layers,
            vec!["in".to_string()]
        );
    }

    #[test]
    fn test_forward_requires_compilation() {
        let mut net = NeuralNetwork::new().unwrap();
        net.add_layer(shared(InputLayer::new(Dim::new(1, 1, 1, 2))))
            .unwrap();
        let x = Tensor::zeros(&Dim::new(1, 1, 1, 2));
        assert!(net.forward(&x).is_err());
    }

    #[test]
    fn test_forward_through_in_place_relu() {
        let dim = Dim::new(1, 1, 1, 2);
        let dense = shared(FullyConnectedLayer::new(2).with_init(WeightInit::Constant(1.0)));
        {
            let mut d = dense.borrow_mut();
            d.base_mut().name = "dense".to_string();
            d.base_mut().activation = Activation::ReLU;
        }
        let mut net = NetworkBuilder::new()
            .input("in", dim)
            .layer(dense)
            .build()
            .unwrap();

        // x sums to -1 in every unit, relu clamps to zero
        let x = Tensor::from_vec(vec![1.0, -2.0], &dim).unwrap();
        let out = net.forward(&x).unwrap();
        assert_eq!(out[0].to_vec(), vec![0.0, 0.0]);

        let x = Tensor::from_vec(vec![2.0, 1.0], &dim).unwrap();
        let out = net.forward(&x).unwrap();
        assert_eq!(out[0].to_vec(), vec![3.0, 3.0]);
    }

    #[test]
    fn test_training_reduces_mse_loss() {
        // learn y = x0 + x1 from four fixed samples
        let dim = Dim::new(4, 1, 1, 2);
        let tdim = Dim::new(4, 1, 1, 1);
        let dense = shared(FullyConnectedLayer::new(1).with_init(WeightInit::Constant(0.0)));
        dense.borrow_mut().base_mut().name = "dense".to_string();
        let mut net = NetworkBuilder::new()
            .input("in", dim)
            .layer(dense)
            .loss(LossKind::Mse)
            .optimizer(OptimizerConfig::Sgd {
                learning_rate: 0.05,
            })
            .build()
            .unwrap();

        let x = Tensor::from_vec(
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
            &dim,
        )
        .unwrap();
        let t = Tensor::from_vec(vec![0.0, 1.0, 1.0, 2.0], &tdim).unwrap();

        let first = net.train_step(&x, &t).unwrap();
        let mut last = first;
        for _ in 0..60 {
            last = net.train_step(&x, &t).unwrap();
        }
        assert!(
            last < first * 0.2,
            "loss did not fall: first {} last {}",
            first,
            last
        );
    }

    #[test]
    fn test_training_with_adam_and_fused_softmax() {
        // two separable one-hot classes
        let dim = Dim::new(2, 1, 1, 2);
        let dense = shared(FullyConnectedLayer::new(2).with_init(WeightInit::Constant(0.0)));
        {
            let mut d = dense.borrow_mut();
            d.base_mut().name = "dense".to_string();
            d.base_mut().activation = Activation::Softmax;
        }
        let mut net = NetworkBuilder::new()
            .input("in", dim)
            .layer(dense)
            .loss(LossKind::CrossEntropy)
            .optimizer(OptimizerConfig::adam(0.05))
            .build()
            .unwrap();

        let x = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], &dim).unwrap();
        let t = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], &dim).unwrap();

        let first = net.train_step(&x, &t).unwrap();
        let mut last = first;
        for _ in 0..100 {
            last = net.train_step(&x, &t).unwrap();
        }
        assert!(
            last < first * 0.5,
            "loss did not fall: first {} last {}",
            first,
            last
        );
    }

    #[test]
    fn test_train_epoch_history() {
        let dim = Dim::new(1, 1, 1, 1);
        let dense = shared(FullyConnectedLayer::new(1).with_init(WeightInit::Constant(0.0)));
        dense.borrow_mut().base_mut().name = "dense".to_string();
        let mut net = NetworkBuilder::new()
            .input("in", dim)
            .layer(dense)
            .loss(LossKind::Mse)
            .optimizer(OptimizerConfig::Sgd {
                learning_rate: 0.1,
            })
            .build()
            .unwrap();

        let xs = vec![Tensor::from_vec(vec![1.0], &dim).unwrap()];
        let ts = vec![Tensor::from_vec(vec![2.0], &dim).unwrap()];
        let history = net.train(&xs, &ts, 20).unwrap();
        assert_eq!(history.len(), 20);
        assert!(history[19] < history[0]);
    }

    #[test]
    fn test_summary_lists_nodes() {
        let net = NetworkBuilder::new()
            .input("in", Dim::new(1, 1, 1, 2))
            .fully_connected("head", 1, Activation::None)
            .build()
            .unwrap();
        let text = net.summary();
        assert!(text.contains("in"));
        assert!(text.contains("head"));
        assert!(text.contains("fully_connected"));
    }
}
