//! Tensor buffer ownership and aliasing.
//!
//! The graph never allocates raw memory itself; it asks the manager for
//! buffer slots and later re-points them during in-place optimization.
//! Every value and gradient tensor lives in one arena and is addressed by
//! id, so an alias is simply two slots referring to the same tensor id.
//! The execution path is agnostic to whether a slot tensor is owned or
//! aliased.

use crate::error::{EdgennError, Result};
use crate::layers::Weight;
use crate::tensor::{Dim, Tensor};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;

/// Id of one tensor in the arena.
pub type TensorId = usize;

/// Id of one input/output buffer slot.
pub type SlotId = usize;

/// Placeholder for a slot position that has been sized but not yet wired
/// to a producer. Buffer-size assignment fills slot lists with this value;
/// graph initialization replaces every occurrence.
pub const UNWIRED: SlotId = usize::MAX;

/// One buffer slot: a forward value tensor and its gradient tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarGrad {
    /// Id of the forward value tensor
    pub value: TensorId,
    /// Id of the gradient tensor
    pub gradient: TensorId,
}

/// Arena of layer input/output buffers plus weight tracking.
#[derive(Debug, Default)]
pub struct BufferManager {
    tensors: Vec<RefCell<Tensor>>,
    slots: Vec<VarGrad>,
    /// Registered learnable parameters: (owner layer, elements)
    tracked_weights: Vec<(String, usize)>,
    /// Slots registered per layer name, released when the layer's buffers
    /// become aliased elsewhere
    tracked_in_outs: HashMap<String, Vec<SlotId>>,
}

impl BufferManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate one zero-filled tensor.
    pub fn alloc_tensor(&mut self, dim: &Dim) -> TensorId {
        self.tensors.push(RefCell::new(Tensor::zeros(dim)));
        self.tensors.len() - 1
    }

    /// Allocate a value/gradient slot of the given dimension.
    pub fn alloc_slot(&mut self, dim: &Dim) -> SlotId {
        let value = self.alloc_tensor(dim);
        let gradient = self.alloc_tensor(dim);
        self.slots.push(VarGrad { value, gradient });
        self.slots.len() - 1
    }

    /// Number of slots allocated so far.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Look up a slot's current tensor ids.
    pub fn slot(&self, id: SlotId) -> VarGrad {
        self.slots[id]
    }

    /// Re-point a slot's value tensor. Used by in-place optimization.
    pub fn set_value_of(&mut self, slot: SlotId, tensor: TensorId) {
        self.slots[slot].value = tensor;
    }

    /// Re-point a slot's gradient tensor. Used by in-place optimization.
    pub fn set_gradient_of(&mut self, slot: SlotId, tensor: TensorId) {
        self.slots[slot].gradient = tensor;
    }

    /// Immutably borrow a tensor.
    pub fn read(&self, id: TensorId) -> Ref<'_, Tensor> {
        self.tensors[id].borrow()
    }

    /// Mutably borrow a tensor.
    pub fn write(&self, id: TensorId) -> RefMut<'_, Tensor> {
        self.tensors[id].borrow_mut()
    }

    /// Compute `dst = f(src)`, tolerating `src` and `dst` being the same
    /// tensor (the in-place case).
    pub fn transform<F>(&self, src: TensorId, dst: TensorId, f: F) -> Result<()>
    where
        F: FnOnce(&Tensor) -> Result<Tensor>,
    {
        if src == dst {
            let mut t = self.tensors[src].borrow_mut();
            let out = f(&t)?;
            *t = out;
        } else {
            let x = self.tensors[src].borrow();
            let out = f(&x)?;
            drop(x);
            *self.tensors[dst].borrow_mut() = out;
        }
        Ok(())
    }

    /// Register a layer's learnable parameters.
    pub fn track_weights(&mut self, layer_name: &str, weights: &[Weight]) {
        for w in weights {
            self.tracked_weights
                .push((layer_name.to_string(), w.value.len()));
        }
    }

    /// Register the buffer slots a layer's outputs own.
    pub fn track_layer_in_outs(&mut self, layer_name: &str, slots: &[SlotId]) {
        self.tracked_in_outs
            .entry(layer_name.to_lowercase())
            .or_default()
            .extend_from_slice(slots);
    }

    /// Release tracking for a layer's input/output buffers; called when
    /// the buffers become aliased elsewhere.
    pub fn untrack_layer_in_outs(&mut self, layer_name: &str) -> Result<()> {
        self.tracked_in_outs
            .remove(&layer_name.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| EdgennError::layer_not_found(layer_name))
    }

    /// Whether a layer's in/out buffers are still tracked.
    pub fn is_tracked(&self, layer_name: &str) -> bool {
        self.tracked_in_outs
            .contains_key(&layer_name.to_lowercase())
    }

    /// Total number of tracked weight elements, for memory accounting.
    pub fn tracked_weight_elements(&self) -> usize {
        self.tracked_weights.iter().map(|(_, n)| n).sum()
    }
}
