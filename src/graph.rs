//! Network graph construction, realization and execution.
//!
//! A flat list of user layers is turned into an executable DAG in several
//! passes: name assignment, default input wiring against the `__data__`
//! source, consumer discovery, realization of synthetic nodes (addition
//! fan-in, activation, output fan-out, flatten, loss), edge construction,
//! topological sorting, buffer sizing and finally slot wiring against a
//! [`BufferManager`]. After compilation every node has exactly the inputs
//! and outputs it declared and forward execution is a single walk over the
//! sorted order.

use crate::activations::Activation;
use crate::error::{EdgennError, Result};
use crate::layers::{
    create_layer, layer_type, names_equal, shared, ActivationLayer, LossKind, LossLayer,
    SharedLayer,
};
use crate::manager::{BufferManager, UNWIRED};
use crate::profiler::{EventKey, Profiler};
use crate::tensor::{Dim, Tensor};
use log::debug;
use std::collections::{HashMap, HashSet};

/// Name of the synthetic data source every root layer consumes from.
pub const SOURCE_NAME: &str = "__data__";

/// Name of the synthetic sink the final layer feeds into.
pub const SINK_NAME: &str = "__exit__";

/// A handle to one graph node: the shared layer plus its position and
/// profiling key. Cloning is shallow.
#[derive(Debug, Clone)]
pub struct LayerNode {
    /// The layer this node executes
    pub layer: SharedLayer,
    /// Index into the adjacency list
    pub index: usize,
    /// Profiler event accumulating this node's forward time
    pub event_key: EventKey,
}

/// The compiled layer DAG.
///
/// `adj[i]` holds node `i` at the head followed by its consumers. Name
/// lookups go through `index_by_name`; the name set and the synthetic-name
/// counter are per-graph, so two graphs never influence each other's
/// naming.
#[derive(Debug, Default)]
pub struct NetworkGraph {
    adj: Vec<Vec<LayerNode>>,
    sorted: Vec<LayerNode>,
    layer_names: HashSet<String>,
    index_by_name: HashMap<String, usize>,
    def_name_count: usize,
    skip_non_trainable: usize,
    profiler: Profiler,
}

impl NetworkGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.adj.len()
    }

    /// Whether the graph holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.adj.is_empty()
    }

    /// Nodes in execution order; empty before [`topological_sort`].
    ///
    /// [`topological_sort`]: NetworkGraph::topological_sort
    pub fn sorted(&self) -> &[LayerNode] {
        &self.sorted
    }

    /// Number of leading non-trainable nodes skipped by backwarding.
    pub fn skip_non_trainable(&self) -> usize {
        self.skip_non_trainable
    }

    /// Per-node forward timing.
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Look up a node by index.
    pub fn node(&self, index: usize) -> Result<LayerNode> {
        self.adj
            .get(index)
            .map(|l| l[0].clone())
            .ok_or_else(|| EdgennError::graph(format!("no node at index {}", index)))
    }

    /// Look up a node by layer name, case-insensitively.
    pub fn node_by_name(&self, name: &str) -> Result<LayerNode> {
        self.index_by_name
            .get(&name.to_lowercase())
            .map(|&i| self.adj[i][0].clone())
            .ok_or_else(|| EdgennError::layer_not_found(name))
    }

    /// Make the layer's name unique within this graph and record it.
    ///
    /// An already unique name is kept unless `force_rename` is set. A
    /// conflicting name is first tried as `{prefix}{name}`, then with the
    /// graph's synthetic-name counter appended until the result is free.
    pub fn ensure_name(
        &mut self,
        layer: &SharedLayer,
        prefix: &str,
        force_rename: bool,
    ) -> Result<()> {
        let orig = layer.borrow().name().to_string();
        if orig.is_empty() {
            return Err(EdgennError::invalid_parameter("layer name must not be empty"));
        }
        if !force_rename && !self.layer_names.contains(&orig.to_lowercase()) {
            self.layer_names.insert(orig.to_lowercase());
            return Ok(());
        }
        let prefixed = format!("{}{}", prefix, orig);
        let chosen = if !self.layer_names.contains(&prefixed.to_lowercase()) {
            prefixed
        } else {
            loop {
                let candidate = format!("{}{}", prefixed, self.def_name_count);
                self.def_name_count += 1;
                if !self.layer_names.contains(&candidate.to_lowercase()) {
                    break candidate;
                }
            }
        };
        self.layer_names.insert(chosen.to_lowercase());
        layer.borrow_mut().base_mut().name = chosen;
        Ok(())
    }

    /// Append a node to the adjacency list and index it by name.
    pub fn add_layer_node(&mut self, layer: SharedLayer) -> Result<()> {
        let name = layer.borrow().name().to_string();
        let index = self.adj.len();
        let event_key = self.profiler.register_event(&name);
        self.index_by_name.insert(name.to_lowercase(), index);
        self.adj.push(vec![LayerNode {
            layer,
            index,
            event_key,
        }]);
        Ok(())
    }

    fn add_edge(&mut self, ith: usize, node: LayerNode) -> Result<()> {
        if ith >= self.adj.len() {
            return Err(EdgennError::graph(
                "edge source index exceeds the number of layers",
            ));
        }
        self.adj[ith].push(node);
        Ok(())
    }

    /// Rewrite the first `from` reference found in any layer's input list
    /// to `to`, scanning graph nodes first and then `extra`.
    fn update_name_in_layers(&self, extra: &[SharedLayer], from: &str, to: &str) {
        for layer in self.adj.iter().map(|l| &l[0].layer).chain(extra.iter()) {
            let mut l = layer.borrow_mut();
            for name in l.base_mut().input_layers.iter_mut() {
                if names_equal(name, from) {
                    *name = to.to_string();
                    return;
                }
            }
        }
    }

    /// Rewrite the first `from` entry in every layer's output list to
    /// `to`; used to re-target producers when a synthetic node is spliced
    /// in front of their consumer.
    fn update_output_in_layers(&self, extra: &[SharedLayer], from: &str, to: &str) {
        for layer in self.adj.iter().map(|l| &l[0].layer).chain(extra.iter()) {
            let mut l = layer.borrow_mut();
            if let Some(entry) = l
                .base_mut()
                .output_layers
                .iter_mut()
                .find(|n| names_equal(n, from))
            {
                *entry = to.to_string();
            }
        }
    }

    /// Derive every layer's consumer list from the declared producer
    /// lists. Only the final layer may end up without a consumer; it is
    /// wired to the sink, while any earlier unconsumed layer is a
    /// dangling node and rejected.
    pub fn set_output_layers(&mut self, layers: &[SharedLayer]) -> Result<()> {
        let names: Vec<String> = layers
            .iter()
            .map(|l| l.borrow().name().to_string())
            .collect();
        for (i, layer) in layers.iter().enumerate() {
            for (j, other) in layers.iter().enumerate() {
                if i == j {
                    continue;
                }
                let consumes = other
                    .borrow()
                    .base()
                    .input_layers
                    .iter()
                    .any(|n| names_equal(n, &names[i]));
                if consumes {
                    layer
                        .borrow_mut()
                        .base_mut()
                        .output_layers
                        .push(names[j].clone());
                }
            }
        }
        let last = layers.len() - 1;
        for (i, layer) in layers.iter().enumerate() {
            let mut l = layer.borrow_mut();
            if l.base().output_layers.is_empty() {
                if i == last {
                    l.base_mut().output_layers.push(SINK_NAME.to_string());
                } else {
                    return Err(EdgennError::invalid_parameter(format!(
                        "layer {} has no consumer and is not the final layer",
                        l.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Insert an addition node in front of a single-input layer that
    /// declared several producers.
    fn realize_multi_input(&mut self, layers: &[SharedLayer], layer: &SharedLayer) -> Result<()> {
        let (lname, inputs, ltype) = {
            let l = layer.borrow();
            (
                l.name().to_string(),
                l.base().input_layers.clone(),
                l.type_name(),
            )
        };
        if inputs.len() <= 1
            || ltype == layer_type::ADDITION
            || ltype == layer_type::CONCAT
        {
            return Ok(());
        }
        let add = create_layer(layer_type::ADDITION)?;
        self.ensure_name(&add, &format!("{}/", lname), true)?;
        let aname = add.borrow().name().to_string();
        self.update_output_in_layers(layers, &lname, &aname);
        {
            let mut a = add.borrow_mut();
            let base = a.base_mut();
            base.num_inputs = inputs.len();
            base.input_dim = vec![Dim::default(); inputs.len()];
            base.input_layers = inputs;
            base.output_layers = vec![lname.clone()];
        }
        {
            let mut l = layer.borrow_mut();
            let base = l.base_mut();
            base.input_layers = vec![aname.clone()];
            base.num_inputs = 1;
            base.input_dim = vec![Dim::default()];
        }
        debug!("realized addition node {} in front of {}", aname, lname);
        self.add_layer_node(add)
    }

    /// Split a layer's activation tag into a dedicated node behind it.
    fn realize_activation(
        &mut self,
        layers: &[SharedLayer],
        layer: &SharedLayer,
    ) -> Result<SharedLayer> {
        let (lname, act, ltype, outs) = {
            let l = layer.borrow();
            (
                l.name().to_string(),
                l.base().activation,
                l.type_name(),
                l.base().output_layers.clone(),
            )
        };
        if ltype == layer_type::ACTIVATION || act == Activation::None {
            return Ok(layer.clone());
        }
        if act == Activation::Unknown {
            return Err(EdgennError::not_supported(
                "cannot realize an unknown activation",
            ));
        }
        if outs.len() > 1 {
            return Err(EdgennError::not_supported(format!(
                "activation on multi-output layer {} is not supported",
                lname
            )));
        }
        let node = shared(ActivationLayer::new(act));
        node.borrow_mut().base_mut().name = layer_type::ACTIVATION.to_string();
        self.ensure_name(&node, &format!("{}/", lname), true)?;
        let aname = node.borrow().name().to_string();
        self.update_name_in_layers(layers, &lname, &aname);
        {
            let mut a = node.borrow_mut();
            let base = a.base_mut();
            base.input_layers = vec![lname.clone()];
            base.output_layers = outs;
        }
        {
            let mut l = layer.borrow_mut();
            let base = l.base_mut();
            base.output_layers = vec![aname.clone()];
            base.activation = Activation::None;
        }
        debug!("realized activation node {} behind {}", aname, lname);
        self.add_layer_node(node.clone())?;
        Ok(node)
    }

    /// Insert an output splitter behind a single-output layer that feeds
    /// several consumers.
    fn realize_multi_output(
        &mut self,
        layers: &[SharedLayer],
        layer: &SharedLayer,
    ) -> Result<SharedLayer> {
        let (lname, ltype, outs) = {
            let l = layer.borrow();
            (
                l.name().to_string(),
                l.type_name(),
                l.base().output_layers.clone(),
            )
        };
        if outs.len() <= 1 || ltype == layer_type::OUTPUT {
            return Ok(layer.clone());
        }
        let node = create_layer(layer_type::OUTPUT)?;
        self.ensure_name(&node, &format!("{}/", lname), true)?;
        let oname = node.borrow().name().to_string();
        for _ in 0..outs.len() {
            self.update_name_in_layers(layers, &lname, &oname);
        }
        {
            let mut o = node.borrow_mut();
            let base = o.base_mut();
            base.input_layers = vec![lname.clone()];
            base.num_outputs = outs.len();
            base.output_layers = outs;
        }
        layer.borrow_mut().base_mut().output_layers = vec![oname.clone()];
        debug!("realized output splitter {} behind {}", oname, lname);
        self.add_layer_node(node.clone())?;
        Ok(node)
    }

    /// Insert a flatten node behind the current tail of a layer's realized
    /// chain when the layer carries the flatten flag.
    fn realize_flatten(
        &mut self,
        layers: &[SharedLayer],
        origin: &SharedLayer,
        tail: &SharedLayer,
    ) -> Result<SharedLayer> {
        let flatten = origin.borrow().base().flatten;
        let ttype = tail.borrow().type_name();
        if !flatten || ttype == layer_type::FLATTEN {
            return Ok(tail.clone());
        }
        let (tname, outs) = {
            let t = tail.borrow();
            (t.name().to_string(), t.base().output_layers.clone())
        };
        let oname = origin.borrow().name().to_string();
        let node = create_layer(layer_type::FLATTEN)?;
        self.ensure_name(&node, &format!("{}/", oname), true)?;
        let fname = node.borrow().name().to_string();
        for _ in 0..outs.len() {
            self.update_name_in_layers(layers, &tname, &fname);
        }
        {
            let mut f = node.borrow_mut();
            let base = f.base_mut();
            base.input_layers = vec![tname.clone()];
            base.output_layers = outs;
        }
        tail.borrow_mut().base_mut().output_layers = vec![fname.clone()];
        debug!("realized flatten node {} behind {}", fname, tname);
        self.add_layer_node(node.clone())?;
        Ok(node)
    }

    /// Append the terminal loss node, fusing plain cross entropy with a
    /// trailing sigmoid or softmax activation node. A graph whose sink is
    /// already a loss layer is left untouched.
    pub fn add_loss_layer(&mut self, kind: LossKind) -> Result<()> {
        if kind == LossKind::None {
            return Ok(());
        }
        let mut sinks: Vec<LayerNode> = self
            .adj
            .iter()
            .map(|l| l[0].clone())
            .filter(|n| {
                n.layer
                    .borrow()
                    .base()
                    .output_layers
                    .iter()
                    .any(|o| names_equal(o, SINK_NAME))
            })
            .collect();
        if sinks.len() != 1 {
            return Err(EdgennError::not_supported(format!(
                "a loss layer requires exactly one sink node, found {}",
                sinks.len()
            )));
        }
        let mut last = sinks.remove(0);
        if last.layer.borrow().type_name() == layer_type::LOSS {
            return Ok(());
        }
        let mut kind = kind;

        if kind == LossKind::CrossEntropy {
            let (lname, function, producer) = {
                let l = last.layer.borrow();
                (
                    l.name().to_string(),
                    l.activation_function(),
                    l.base().input_layers.first().cloned(),
                )
            };
            kind = match function {
                Some(Activation::Sigmoid) => LossKind::CrossEntropySigmoid,
                Some(Activation::Softmax) => LossKind::CrossEntropySoftmax,
                _ => {
                    return Err(EdgennError::not_supported(
                        "cross entropy must follow a sigmoid or softmax activation",
                    ))
                }
            };
            if last.index + 1 != self.adj.len() {
                return Err(EdgennError::graph(
                    "fused activation must be the most recently added node",
                ));
            }
            // pop the fused activation node and free its name
            self.adj.pop();
            self.index_by_name.remove(&lname.to_lowercase());
            self.layer_names.remove(&lname.to_lowercase());
            let producer = producer
                .ok_or_else(|| EdgennError::graph("activation node has no producer"))?;
            debug!("fused activation node {} into the {} loss", lname, kind);
            last = self.node_by_name(&producer)?;
        }

        let loss = shared(LossLayer::new(kind));
        loss.borrow_mut().base_mut().name = layer_type::LOSS.to_string();
        self.ensure_name(&loss, "", false)?;
        let loss_name = loss.borrow().name().to_string();
        let last_name = last.layer.borrow().name().to_string();
        {
            let mut l = loss.borrow_mut();
            let base = l.base_mut();
            base.input_layers = vec![last_name];
            base.output_layers = vec![SINK_NAME.to_string()];
        }
        {
            let mut l = last.layer.borrow_mut();
            let outs = &mut l.base_mut().output_layers;
            outs.clear();
            outs.push(loss_name);
        }
        self.add_layer_node(loss)
    }

    /// Build the graph's node set from a flat layer list.
    ///
    /// Assigns unique names, wires layers with an explicit input dimension
    /// and no declared producers to the data source, derives consumer
    /// lists and realizes every synthetic node including the loss. A
    /// layer with neither producers nor a dimension is rejected.
    pub fn set_graph_node(&mut self, layers: &[SharedLayer], loss: LossKind) -> Result<()> {
        if layers.is_empty() {
            return Err(EdgennError::graph("cannot compile an empty layer list"));
        }
        for layer in layers {
            if layer.borrow().name().is_empty() {
                let default = layer.borrow().type_name().to_string();
                layer.borrow_mut().base_mut().name = default;
            }
            self.ensure_name(layer, "", false)?;
        }

        for layer in layers {
            let mut l = layer.borrow_mut();
            if l.base().input_layers.is_empty() {
                if l.base().input_dim[0].is_set() {
                    l.base_mut().input_layers.push(SOURCE_NAME.to_string());
                } else {
                    return Err(EdgennError::invalid_parameter(format!(
                        "layer {} has neither declared producers nor an input dimension",
                        l.name()
                    )));
                }
            }
            let n = l.base().input_layers.len();
            l.base_mut().num_inputs = n;
            if l.base().input_dim.len() < n {
                l.base_mut().input_dim.resize(n, Dim::default());
            }
        }

        self.set_output_layers(layers)?;

        for layer in layers {
            self.realize_multi_input(layers, layer)?;
            self.add_layer_node(layer.clone())?;
            let tail = self.realize_activation(layers, layer)?;
            let tail = self.realize_multi_output(layers, &tail)?;
            self.realize_flatten(layers, layer, &tail)?;
        }
        self.add_loss_layer(loss)
    }

    /// Build adjacency edges by resolving every declared producer name.
    pub fn set_edge(&mut self) -> Result<()> {
        for i in 0..self.adj.len() {
            let node = self.adj[i][0].clone();
            let inputs = node.layer.borrow().base().input_layers.clone();
            for name in inputs {
                if names_equal(&name, SOURCE_NAME) {
                    continue;
                }
                let pi = *self
                    .index_by_name
                    .get(&name.to_lowercase())
                    .ok_or_else(|| EdgennError::layer_not_found(name.clone()))?;
                self.add_edge(pi, node.clone())?;
            }
        }
        Ok(())
    }

    fn sort_util(&self, ith: usize, visited: &mut [bool], stack: &mut Vec<LayerNode>) {
        visited[ith] = true;
        for consumer in self.adj[ith].iter().skip(1) {
            if !visited[consumer.index] {
                self.sort_util(consumer.index, visited, stack);
            }
        }
        stack.push(self.adj[ith][0].clone());
    }

    /// Order nodes so every producer precedes its consumers, and count the
    /// leading non-trainable prefix skipped by backwarding.
    pub fn topological_sort(&mut self) -> Result<()> {
        let n = self.adj.len();
        let mut visited = vec![false; n];
        let mut stack: Vec<LayerNode> = Vec::with_capacity(n);
        for i in 0..n {
            if !visited[i] {
                self.sort_util(i, &mut visited, &mut stack);
            }
        }
        self.sorted.clear();
        while let Some(node) = stack.pop() {
            self.sorted.push(node);
        }
        self.skip_non_trainable = self
            .sorted
            .iter()
            .position(|node| node.layer.borrow().base().trainable)
            .unwrap_or(self.sorted.len());
        Ok(())
    }

    /// Size every node's slot lists, filling them with the unwired
    /// placeholder for [`initialize`] to replace.
    ///
    /// [`initialize`]: NetworkGraph::initialize
    pub fn set_num_net_buffer_size(&mut self) -> Result<()> {
        let n = self.sorted.len();
        for (i, node) in self.sorted.iter().enumerate() {
            let mut l = node.layer.borrow_mut();
            let base = l.base_mut();
            let n_in = if i == 0 {
                base.num_inputs
            } else {
                base.input_layers.len()
            };
            let n_out = if i + 1 == n {
                base.num_outputs
            } else {
                base.output_layers.len()
            };
            base.net_input = vec![UNWIRED; n_in.max(1)];
            base.net_hidden = vec![UNWIRED; n_out.max(1)];
        }
        Ok(())
    }

    /// Walk the sorted order inferring input dimensions from producers,
    /// initializing each layer and allocating its output buffers.
    pub fn initialize(&mut self, manager: &mut BufferManager) -> Result<()> {
        let order = self.sorted.clone();
        for node in &order {
            let (lname, input_layers) = {
                let l = node.layer.borrow();
                (l.name().to_string(), l.base().input_layers.clone())
            };
            for (k, pname) in input_layers.iter().enumerate() {
                if names_equal(pname, SOURCE_NAME) {
                    let dim = node.layer.borrow().base().input_dim[k];
                    if !dim.is_set() {
                        return Err(EdgennError::graph(format!(
                            "root layer {} has no input dimension",
                            lname
                        )));
                    }
                    let slot = manager.alloc_slot(&dim);
                    node.layer.borrow_mut().base_mut().net_input[k] = slot;
                    continue;
                }
                let producer = self.node_by_name(pname)?;
                let (dim, slot) = {
                    let p = producer.layer.borrow();
                    let base = p.base();
                    let loc = base
                        .output_layers
                        .iter()
                        .position(|n| names_equal(n, &lname))
                        .ok_or_else(|| {
                            EdgennError::graph(format!(
                                "{} is not listed as an output of {}",
                                lname, pname
                            ))
                        })?;
                    if loc >= base.net_hidden.len() || base.net_hidden[loc] == UNWIRED {
                        return Err(EdgennError::graph(format!(
                            "producer {} has no initialized buffer for {}",
                            pname, lname
                        )));
                    }
                    let dim_idx = if base.output_dim.len() == 1 { 0 } else { loc };
                    (base.output_dim[dim_idx], base.net_hidden[loc])
                };
                let mut l = node.layer.borrow_mut();
                l.base_mut().input_dim[k] = dim;
                l.base_mut().net_input[k] = slot;
            }

            node.layer.borrow_mut().initialize(manager)?;

            {
                let mut l = node.layer.borrow_mut();
                let ports = l.base().net_hidden.len();
                for h in 0..ports {
                    let dims = &l.base().output_dim;
                    let dim = if dims.len() == 1 {
                        dims[0]
                    } else {
                        dims[h.min(dims.len() - 1)]
                    };
                    let slot = manager.alloc_slot(&dim);
                    l.base_mut().net_hidden[h] = slot;
                }
                let slots = l.base().net_hidden.clone();
                manager.track_layer_in_outs(l.name(), &slots);
            }
        }
        Ok(())
    }

    /// Alias batch-normalization and non-softmax activation buffers onto
    /// their producer's so those nodes compute in place.
    ///
    /// Chains of in-place nodes are not collapsed; only the first node
    /// behind a regular producer is optimized.
    pub fn in_place_optimize(&mut self, manager: &mut BufferManager) -> Result<()> {
        let order = self.sorted.clone();
        for node in &order {
            let (ltype, lname, inputs, function) = {
                let l = node.layer.borrow();
                (
                    l.type_name(),
                    l.name().to_string(),
                    l.base().input_layers.clone(),
                    l.activation_function(),
                )
            };
            let optimizable = ltype == layer_type::BATCH_NORM
                || (ltype == layer_type::ACTIVATION && function != Some(Activation::Softmax));
            if !optimizable {
                continue;
            }
            if inputs.len() != 1 {
                return Err(EdgennError::invalid_parameter(format!(
                    "in-place candidate {} must have exactly one input",
                    lname
                )));
            }
            let pname = &inputs[0];
            if names_equal(pname, SOURCE_NAME) {
                continue;
            }
            let producer = self.node_by_name(pname)?;
            let ptype = producer.layer.borrow().type_name();
            if ptype == layer_type::INPUT
                || ptype == layer_type::ACTIVATION
                || ptype == layer_type::BATCH_NORM
            {
                continue;
            }
            let loc = {
                let p = producer.layer.borrow();
                p.base()
                    .output_layers
                    .iter()
                    .position(|n| names_equal(n, &lname))
                    .ok_or_else(|| {
                        EdgennError::graph(format!(
                            "{} is not listed as an output of {}",
                            lname, pname
                        ))
                    })?
            };
            if ltype == layer_type::BATCH_NORM {
                // slot-level alias: the producer writes straight into this
                // node's hidden slot
                let hidden = node.layer.borrow().base().net_hidden[0];
                producer.layer.borrow_mut().base_mut().net_hidden[loc] = hidden;
                node.layer.borrow_mut().base_mut().net_input[0] = hidden;
            } else {
                // tensor-level alias: the shared slot's value and gradient
                // both point at this node's hidden value tensor
                let hidden_value = manager
                    .slot(node.layer.borrow().base().net_hidden[0])
                    .value;
                let in_slot = node.layer.borrow().base().net_input[0];
                manager.set_value_of(in_slot, hidden_value);
                manager.set_gradient_of(in_slot, hidden_value);
            }
            manager.untrack_layer_in_outs(pname)?;
            debug!("{} now runs in place over {}", lname, pname);
        }
        Ok(())
    }

    /// Execute every node in sorted order and return the final node's
    /// output tensors.
    pub fn forwarding(&mut self, manager: &BufferManager, training: bool) -> Result<Vec<Tensor>> {
        let order = self.sorted.clone();
        for node in &order {
            self.profiler.start(node.event_key);
            let result = node.layer.borrow_mut().forwarding(manager, training);
            self.profiler.finish(node.event_key);
            result?;
        }
        let last = order
            .last()
            .ok_or_else(|| EdgennError::graph("the graph has not been compiled"))?;
        let outputs = last
            .layer
            .borrow()
            .base()
            .net_hidden
            .iter()
            .map(|&s| manager.read(manager.slot(s).value).clone())
            .collect();
        Ok(outputs)
    }

    /// Run gradient and derivative computation in reverse sorted order,
    /// skipping the leading non-trainable prefix.
    pub fn backwarding(&mut self, manager: &BufferManager) -> Result<()> {
        let order = self.sorted.clone();
        let skip = self.skip_non_trainable.min(order.len());
        for node in order[skip..].iter().rev() {
            let mut l = node.layer.borrow_mut();
            l.calc_gradient(manager)?;
            l.calc_derivative(manager)?;
        }
        Ok(())
    }

    /// Install targets on the terminal loss node.
    pub fn set_targets(&mut self, targets: Tensor) -> Result<()> {
        let last = self
            .sorted
            .last()
            .ok_or_else(|| EdgennError::graph("the graph has not been compiled"))?;
        last.layer.borrow_mut().set_targets(targets)
    }

    /// Sum of the loss values reported by all nodes.
    pub fn loss(&self) -> f32 {
        self.sorted
            .iter()
            .map(|n| n.layer.borrow().loss())
            .sum()
    }

    /// Input dimension of the first executed node.
    pub fn input_dim(&self) -> Result<Dim> {
        let first = self
            .sorted
            .first()
            .ok_or_else(|| EdgennError::graph("the graph has not been compiled"))?;
        Ok(first.layer.borrow().base().input_dim[0])
    }

    /// Output dimension of the final executed node.
    pub fn output_dim(&self) -> Result<Dim> {
        let last = self
            .sorted
            .last()
            .ok_or_else(|| EdgennError::graph("the graph has not been compiled"))?;
        Ok(last.layer.borrow().base().output_dim[0])
    }
}
