//! Graph container: owns every tensor and operator, keeps use/def edges
//! coherent under mutation, and drives the plan pipeline.
//!
//! The intended flow is:
//!
//! ```text
//! build graph
//!      |
//!      v
//! topo_sort -> optimize -> shape_infer -> data_malloc
//!      |
//!      v
//! NativeCpuRuntime::run (kernel dispatch in stored order)
//! ```
//!
//! Storage is an arena of id-keyed tables plus insertion-order id lists; all
//! edges are [`TensorId`]/[`OpId`] values, so no edge can outlive the graph.
//! The operator order list doubles as the schedule once `topo_sort` has run;
//! any mutation clears the sorted flag.

pub mod allocator;
mod optimize;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Result};
use tracing::debug;

use crate::operator::{OpId, Operation, Operator};
use crate::runtime::NativeCpuRuntime;
use crate::tensor::{DType, FamilyId, Shape, Tensor, TensorId};

use allocator::OffsetAllocator;

pub struct Graph {
    runtime: Arc<NativeCpuRuntime>,
    tensors: HashMap<TensorId, Tensor>,
    tensor_order: Vec<TensorId>,
    ops: HashMap<OpId, Operator>,
    op_order: Vec<OpId>,
    allocator: OffsetAllocator,
    next_tensor: u32,
    next_op: u32,
    next_family: u32,
    sorted: bool,
}

impl Graph {
    pub fn new(runtime: Arc<NativeCpuRuntime>) -> Self {
        let allocator = OffsetAllocator::new(Arc::clone(&runtime));
        Graph {
            runtime,
            tensors: HashMap::new(),
            tensor_order: Vec::new(),
            ops: HashMap::new(),
            op_order: Vec::new(),
            allocator,
            next_tensor: 0,
            next_op: 0,
            next_family: 0,
            sorted: false,
        }
    }

    pub fn runtime(&self) -> &Arc<NativeCpuRuntime> {
        &self.runtime
    }

    /// Registers a fresh tensor with no producer and no consumers.
    pub fn add_tensor(&mut self, shape: Shape, dtype: DType) -> TensorId {
        let id = TensorId(self.next_tensor);
        self.next_tensor += 1;
        let family = FamilyId(self.next_family);
        self.next_family += 1;
        self.tensors.insert(id, Tensor::new(id, family, shape, dtype));
        self.tensor_order.push(id);
        self.sorted = false;
        id
    }

    /// Constructs an operator, inferring output shapes from the inputs and
    /// registering fresh output tensors. Outputs inherit the first input's
    /// dtype.
    pub fn add_op(&mut self, op: Operation, inputs: Vec<TensorId>) -> Result<OpId> {
        ensure!(!inputs.is_empty(), "{} has no inputs", op.kind());
        let shapes = {
            let views = self.tensor_views(&inputs)?;
            op.infer_shapes(&views)?
        };
        let dtype = self.tensor(inputs[0]).dtype();
        let outputs = shapes
            .into_iter()
            .map(|shape| self.add_tensor(shape, dtype))
            .collect();
        self.install_op(op, inputs, outputs)
    }

    /// Constructs an operator over pre-existing output tensors.
    ///
    /// The inputs must still pass shape inference; output shapes are left to
    /// a later `shape_infer` pass.
    pub fn add_op_with_outputs(
        &mut self,
        op: Operation,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Result<OpId> {
        ensure!(!inputs.is_empty(), "{} has no inputs", op.kind());
        let shapes = {
            let views = self.tensor_views(&inputs)?;
            op.infer_shapes(&views)?
        };
        ensure!(
            shapes.len() == outputs.len(),
            "{} infers {} outputs but {} were supplied",
            op.kind(),
            shapes.len(),
            outputs.len()
        );
        for &output in &outputs {
            ensure!(
                self.tensors.contains_key(&output),
                "output tensor {} is not registered in this graph",
                output.0
            );
        }
        self.install_op(op, inputs, outputs)
    }

    /// Installs a payload-identical copy of `src` over new inputs/outputs
    /// under a fresh id, with edges rebuilt.
    pub fn add_cloned_op(
        &mut self,
        src: OpId,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Result<OpId> {
        let payload = self.op(src).op().clone();
        self.add_op_with_outputs(payload, inputs, outputs)
    }

    /// Registers the operator and installs every back-edge atomically:
    /// consumer edges on inputs, producer edges on outputs, and the mirrored
    /// predecessor/successor lists implied by both. Both endpoint lists are
    /// validated before any edge is touched.
    fn install_op(&mut self, op: Operation, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Result<OpId> {
        for &id in inputs.iter().chain(outputs.iter()) {
            ensure!(
                self.tensors.contains_key(&id),
                "tensor {} is not registered in this graph",
                id.0
            );
        }
        let id = OpId(self.next_op);
        self.next_op += 1;
        let mut operator = Operator::new(id, op, inputs, outputs);
        self.sorted = false;

        for input in operator.inputs().to_vec() {
            self.tensor_mut(input).add_consumer(id);
            if let Some(pred) = self.tensor(input).producer() {
                operator.add_predecessor(pred);
                self.op_mut(pred).add_successor(id);
            }
        }

        for output in operator.outputs().to_vec() {
            self.tensor_mut(output).set_producer(Some(id));
            for succ in self.tensor(output).consumers().to_vec() {
                operator.add_successor(succ);
                self.op_mut(succ).add_predecessor(id);
            }
        }

        self.ops.insert(id, operator);
        self.op_order.push(id);
        Ok(id)
    }

    /// Erases an operator. The caller has already rewired every edge that
    /// referenced it; this primitive never walks edges itself.
    pub fn remove_op(&mut self, id: OpId) {
        self.op_order.retain(|&o| o != id);
        self.ops.remove(&id);
        self.sorted = false;
    }

    /// Erases a tensor. The caller has already rewired every edge that
    /// referenced it.
    pub fn remove_tensor(&mut self, id: TensorId) {
        self.tensor_order.retain(|&t| t != id);
        self.tensors.remove(&id);
        self.sorted = false;
    }

    /// Swaps `old` for `new` in an operator's input list without touching
    /// edges; callers pair it with the matching edge updates.
    pub fn replace_input(&mut self, op: OpId, old: TensorId, new: TensorId) {
        self.op_mut(op).replace_input(old, new);
        self.sorted = false;
    }

    pub fn tensor(&self, id: TensorId) -> &Tensor {
        self.tensors
            .get(&id)
            .unwrap_or_else(|| panic!("tensor {} is not registered in this graph", id.0))
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> &mut Tensor {
        self.tensors
            .get_mut(&id)
            .unwrap_or_else(|| panic!("tensor {} is not registered in this graph", id.0))
    }

    pub fn op(&self, id: OpId) -> &Operator {
        self.ops
            .get(&id)
            .unwrap_or_else(|| panic!("op {} is not registered in this graph", id.0))
    }

    pub(crate) fn op_mut(&mut self, id: OpId) -> &mut Operator {
        self.ops
            .get_mut(&id)
            .unwrap_or_else(|| panic!("op {} is not registered in this graph", id.0))
    }

    /// Tensor ids in registration order.
    pub fn tensor_ids(&self) -> &[TensorId] {
        &self.tensor_order
    }

    /// Operator ids in their current order; this is the schedule once
    /// `topo_sort` has succeeded.
    pub fn op_ids(&self) -> &[OpId] {
        &self.op_order
    }

    pub fn tensor_count(&self) -> usize {
        self.tensor_order.len()
    }

    pub fn op_count(&self) -> usize {
        self.op_order.len()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// First tensor carrying the given family id, if any.
    pub fn tensor_by_family(&self, family: FamilyId) -> Option<TensorId> {
        self.tensor_order
            .iter()
            .copied()
            .find(|&id| self.tensor(id).family_id() == family)
    }

    /// Tensors with no producer.
    pub fn inputs(&self) -> Vec<TensorId> {
        self.tensor_order
            .iter()
            .copied()
            .filter(|&id| self.tensor(id).producer().is_none())
            .collect()
    }

    /// Tensors with no consumers.
    pub fn outputs(&self) -> Vec<TensorId> {
        self.tensor_order
            .iter()
            .copied()
            .filter(|&id| self.tensor(id).consumers().is_empty())
            .collect()
    }

    fn tensor_views(&self, ids: &[TensorId]) -> Result<Vec<&Tensor>> {
        ids.iter()
            .map(|&id| {
                self.tensors
                    .get(&id)
                    .ok_or_else(|| anyhow!("tensor {} is not registered in this graph", id.0))
            })
            .collect()
    }

    /// Orders the operator list topologically with a repeated-sweep Kahn
    /// scan. Ties keep the existing order, so the schedule is deterministic
    /// given insertion order. Fails when a sweep makes no progress, which
    /// means the graph contains a cycle.
    pub fn topo_sort(&mut self) -> Result<()> {
        if self.sorted {
            return Ok(());
        }
        let mut order = Vec::with_capacity(self.op_order.len());
        let mut placed: HashSet<OpId> = HashSet::with_capacity(self.op_order.len());
        while order.len() < self.op_order.len() {
            let mut modified = false;
            for &id in &self.op_order {
                if placed.contains(&id) {
                    continue;
                }
                let ready = self.ops[&id].inputs().iter().all(|&input| {
                    match self.tensor(input).producer() {
                        None => true,
                        Some(producer) => placed.contains(&producer),
                    }
                });
                if ready {
                    order.push(id);
                    placed.insert(id);
                    modified = true;
                }
            }
            if !modified {
                bail!("operator dependencies form a cycle; topological sort failed");
            }
        }
        self.op_order = order;
        self.sorted = true;
        Ok(())
    }

    /// Re-infers every operator's output shapes in topological order and
    /// updates the graph's tensors where they differ.
    ///
    /// The tensor to update is located by family id: an operator may hold a
    /// cloned output whose shape lags, and the family id is the identity
    /// that survives cloning.
    pub fn shape_infer(&mut self) -> Result<()> {
        self.topo_sort()?;
        for op_id in self.op_order.clone() {
            let (shapes, outputs) = {
                let op = self.op(op_id);
                let views = self.tensor_views(op.inputs())?;
                (op.op().infer_shapes(&views)?, op.outputs().to_vec())
            };
            ensure!(
                shapes.len() == outputs.len(),
                "op {} infers {} outputs but holds {}",
                op_id.0,
                shapes.len(),
                outputs.len()
            );
            for (output, new_shape) in outputs.into_iter().zip(shapes) {
                if self.tensor(output).shape() == &new_shape {
                    continue;
                }
                let family = self.tensor(output).family_id();
                let target = self.tensor_by_family(family).ok_or_else(|| {
                    anyhow!("no tensor with family {} in this graph", family.0)
                })?;
                self.tensor_mut(target).set_shape(new_shape);
            }
        }
        Ok(())
    }

    /// Plans arena offsets for every tensor, materialises the arena, and
    /// binds each tensor's data pointer to `base + offset`.
    ///
    /// Graph inputs are allocated up front; the sorted operator walk then
    /// allocates each operator's outputs and releases each input slot once
    /// its last consumer has run.
    pub fn data_malloc(&mut self) -> Result<()> {
        self.topo_sort()?;

        let mut offsets: HashMap<TensorId, usize> = HashMap::with_capacity(self.tensor_count());
        let mut remaining_uses: HashMap<TensorId, usize> = HashMap::new();

        for &id in self.tensor_order.clone().iter() {
            let (producer, consumers, bytes) = {
                let tensor = self.tensor(id);
                (tensor.producer(), tensor.consumers().len(), tensor.bytes())
            };
            if producer.is_none() {
                offsets.insert(id, self.allocator.alloc(bytes));
            }
            if consumers != 0 {
                remaining_uses.insert(id, consumers);
            }
        }

        for op_id in self.op_order.clone() {
            let (op_inputs, op_outputs) = {
                let op = self.op(op_id);
                (op.inputs().to_vec(), op.outputs().to_vec())
            };
            for &output in &op_outputs {
                let bytes = self.tensor(output).bytes();
                offsets.insert(output, self.allocator.alloc(bytes));
            }
            let mut released: HashSet<TensorId> = HashSet::new();
            for &input in &op_inputs {
                if !released.insert(input) {
                    continue;
                }
                if let Some(count) = remaining_uses.get_mut(&input) {
                    *count -= 1;
                    if *count == 0 {
                        let bytes = self.tensor(input).bytes();
                        self.allocator.free(offsets[&input], bytes);
                        remaining_uses.remove(&input);
                    }
                }
            }
        }

        let base = self.allocator.materialize()?;
        for &id in self.tensor_order.clone().iter() {
            let offset = *offsets
                .get(&id)
                .unwrap_or_else(|| panic!("tensor {} was never planned a slot", id.0));
            let ptr = unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) };
            self.tensor_mut(id).bind_data(ptr);
        }
        debug!(
            tensors = self.tensor_count(),
            used = self.allocator.used(),
            peak = self.allocator.peak(),
            "memory plan bound"
        );
        Ok(())
    }

    pub fn allocator(&self) -> &OffsetAllocator {
        &self.allocator
    }

    /// Verifies the structural invariants by direct membership tests:
    /// every edge endpoint is registered, producer/consumer edges mirror the
    /// operator lists, predecessor/successor lists mirror the tensor edges,
    /// no tensor is unreachable, and family ids are unique. Violations are
    /// fatal.
    pub fn check_valid(&self) -> bool {
        for (&id, tensor) in &self.tensors {
            assert!(
                tensor.producer().is_some() || !tensor.consumers().is_empty(),
                "tensor {} has neither producer nor consumers",
                id.0
            );
            for &consumer in tensor.consumers() {
                let op = self.ops.get(&consumer).unwrap_or_else(|| {
                    panic!("tensor {} lists unregistered consumer {}", id.0, consumer.0)
                });
                assert!(
                    op.inputs().contains(&id),
                    "tensor {} lists consumer {} that does not read it",
                    id.0,
                    consumer.0
                );
            }
            if let Some(producer) = tensor.producer() {
                let op = self.ops.get(&producer).unwrap_or_else(|| {
                    panic!("tensor {} lists unregistered producer {}", id.0, producer.0)
                });
                assert!(
                    op.outputs().contains(&id),
                    "tensor {} lists producer {} that does not write it",
                    id.0,
                    producer.0
                );
            }
        }

        for (&id, op) in &self.ops {
            for &input in op.inputs() {
                assert!(
                    self.tensors.contains_key(&input),
                    "op {} reads unregistered tensor {}",
                    id.0,
                    input.0
                );
                if let Some(producer) = self.tensor(input).producer() {
                    assert!(
                        op.predecessors().contains(&producer),
                        "op {} is missing predecessor {}",
                        id.0,
                        producer.0
                    );
                }
            }
            for &output in op.outputs() {
                assert!(
                    self.tensors.contains_key(&output),
                    "op {} writes unregistered tensor {}",
                    id.0,
                    output.0
                );
                for &consumer in self.tensor(output).consumers() {
                    assert!(
                        op.successors().contains(&consumer),
                        "op {} is missing successor {}",
                        id.0,
                        consumer.0
                    );
                }
            }
            for &pred in op.predecessors() {
                let pred_op = self
                    .ops
                    .get(&pred)
                    .unwrap_or_else(|| panic!("op {} lists unregistered predecessor {}", id.0, pred.0));
                assert!(
                    pred_op
                        .outputs()
                        .iter()
                        .any(|output| op.inputs().contains(output)),
                    "op {} lists predecessor {} with no connecting tensor",
                    id.0,
                    pred.0
                );
            }
            for &succ in op.successors() {
                let succ_op = self
                    .ops
                    .get(&succ)
                    .unwrap_or_else(|| panic!("op {} lists unregistered successor {}", id.0, succ.0));
                assert!(
                    succ_op
                        .inputs()
                        .iter()
                        .any(|input| op.outputs().contains(input)),
                    "op {} lists successor {} with no connecting tensor",
                    id.0,
                    succ.0
                );
            }
        }

        let mut families = HashSet::new();
        for tensor in self.tensors.values() {
            assert!(
                families.insert(tensor.family_id()),
                "family {} appears on two tensors",
                tensor.family_id().0
            );
        }
        true
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph tensors:")?;
        for &id in &self.tensor_order {
            writeln!(f, "  {}", self.tensor(id))?;
        }
        writeln!(f, "graph operators:")?;
        for &id in &self.op_order {
            writeln!(f, "  {}", self.op(id))?;
        }
        Ok(())
    }
}
