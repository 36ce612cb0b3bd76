//! Operator kinds, per-kind attributes, and output shape inference.
//!
//! Operators are a common header (identity, input/output tensor ids, and
//! predecessor/successor back-edges) around a tagged [`Operation`] payload.
//! The closed kind set dispatches by exhaustive match; extending the engine
//! means adding a payload variant and registering kernels for it.

use std::fmt;

use anyhow::{ensure, Result};

use crate::tensor::shape::{infer_broadcast, normalize_axis};
use crate::tensor::{Shape, Tensor, TensorId};

/// Stable per-object operator identifier issued by the owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// Fieldless operator tag used for kernel registry keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    MatMul,
    Transpose,
    Concat,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::MatMul => "matmul",
            OpKind::Transpose => "transpose",
            OpKind::Concat => "concat",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes of a batched matrix multiplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatMulSpec {
    pub trans_a: bool,
    pub trans_b: bool,
}

/// Attributes of an axis permutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeSpec {
    pub perm: Vec<usize>,
}

impl TransposeSpec {
    pub fn new<P: Into<Vec<usize>>>(perm: P) -> Self {
        TransposeSpec { perm: perm.into() }
    }

    /// Whether the permutation swaps the last two axes and leaves every
    /// earlier axis in place. This is the only transpose shape a matmul can
    /// absorb into its `trans_a`/`trans_b` flags.
    pub fn is_last_axes_swap(&self) -> bool {
        let rank = self.perm.len();
        rank >= 2
            && self.perm[..rank - 2].iter().copied().eq(0..rank - 2)
            && self.perm[rank - 2] == rank - 1
            && self.perm[rank - 1] == rank - 2
    }
}

/// Attributes of an axis concatenation. Negative axes count from the back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcatSpec {
    pub axis: isize,
}

/// Tagged operator payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
    MatMul(MatMulSpec),
    Transpose(TransposeSpec),
    Concat(ConcatSpec),
}

impl Operation {
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Add => OpKind::Add,
            Operation::Sub => OpKind::Sub,
            Operation::Mul => OpKind::Mul,
            Operation::Div => OpKind::Div,
            Operation::MatMul(_) => OpKind::MatMul,
            Operation::Transpose(_) => OpKind::Transpose,
            Operation::Concat(_) => OpKind::Concat,
        }
    }

    /// Infers output shapes from the current input tensors.
    ///
    /// Returns one shape per output. Incompatible inputs abort graph
    /// construction or optimisation with a diagnostic.
    pub fn infer_shapes(&self, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
        match self {
            Operation::Add | Operation::Sub | Operation::Mul | Operation::Div => {
                ensure!(
                    inputs.len() == 2,
                    "{} expects 2 inputs, got {}",
                    self.kind(),
                    inputs.len()
                );
                ensure!(
                    inputs[0].dtype() == inputs[1].dtype(),
                    "{} operands must share a dtype ({:?} vs {:?})",
                    self.kind(),
                    inputs[0].dtype(),
                    inputs[1].dtype()
                );
                let shape = infer_broadcast(inputs[0].shape(), inputs[1].shape())?;
                Ok(vec![shape])
            }
            Operation::MatMul(spec) => infer_matmul(spec, inputs),
            Operation::Transpose(spec) => infer_transpose(spec, inputs),
            Operation::Concat(spec) => infer_concat(spec, inputs),
        }
    }
}

fn infer_matmul(spec: &MatMulSpec, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
    ensure!(inputs.len() == 2, "matmul expects 2 inputs, got {}", inputs.len());
    let (a, b) = (inputs[0], inputs[1]);
    ensure!(
        a.dtype() == b.dtype(),
        "matmul operands must share a dtype ({:?} vs {:?})",
        a.dtype(),
        b.dtype()
    );
    let rank = a.rank();
    ensure!(rank >= 2, "matmul operands must have rank >= 2, got {rank}");
    ensure!(
        b.rank() == rank,
        "matmul operand ranks differ ({rank} vs {})",
        b.rank()
    );

    let a_dims = a.shape().dims();
    let b_dims = b.shape().dims();
    let (mut m, mut k_a) = (a_dims[rank - 2], a_dims[rank - 1]);
    let (mut k_b, mut n) = (b_dims[rank - 2], b_dims[rank - 1]);
    if spec.trans_a {
        std::mem::swap(&mut m, &mut k_a);
    }
    if spec.trans_b {
        std::mem::swap(&mut k_b, &mut n);
    }
    ensure!(
        k_a == k_b,
        "matmul reduction extents differ: {k_a} vs {k_b} (shapes {} and {})",
        a.shape(),
        b.shape()
    );

    let leading = infer_broadcast(
        &Shape::new(&a_dims[..rank - 2]),
        &Shape::new(&b_dims[..rank - 2]),
    )?;
    let mut dims = leading.dims().to_vec();
    dims.push(m);
    dims.push(n);
    Ok(vec![Shape::new(dims)])
}

fn infer_transpose(spec: &TransposeSpec, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
    ensure!(
        inputs.len() == 1,
        "transpose expects 1 input, got {}",
        inputs.len()
    );
    let input = inputs[0];
    let rank = input.rank();
    ensure!(
        spec.perm.len() == rank,
        "transpose permutation length {} must equal rank {rank}",
        spec.perm.len()
    );
    let mut seen = vec![false; rank];
    let mut dims = Vec::with_capacity(rank);
    for &axis in &spec.perm {
        ensure!(axis < rank, "transpose axis {axis} out of range for rank {rank}");
        ensure!(
            !std::mem::replace(&mut seen[axis], true),
            "transpose permutation repeats axis {axis}"
        );
        dims.push(input.shape().dims()[axis]);
    }
    Ok(vec![Shape::new(dims)])
}

fn infer_concat(spec: &ConcatSpec, inputs: &[&Tensor]) -> Result<Vec<Shape>> {
    ensure!(!inputs.is_empty(), "concat requires at least one input");
    let first = inputs[0];
    let rank = first.rank();
    let axis = normalize_axis(spec.axis, rank)?;
    let mut dims = first.shape().dims().to_vec();
    for input in &inputs[1..] {
        ensure!(
            input.dtype() == first.dtype(),
            "concat operands must share a dtype ({:?} vs {:?})",
            first.dtype(),
            input.dtype()
        );
        ensure!(
            input.rank() == rank,
            "concat operand ranks differ ({rank} vs {})",
            input.rank()
        );
        for (idx, (&lhs, &rhs)) in dims.iter().zip(input.shape().dims().iter()).enumerate() {
            if idx == axis {
                continue;
            }
            ensure!(
                lhs == rhs,
                "concat extents differ at axis {idx}: {lhs} vs {rhs}"
            );
        }
        dims[axis] += input.shape().dims()[axis];
    }
    Ok(vec![Shape::new(dims)])
}

/// A computation node registered in a graph.
///
/// Inputs and outputs are owning in the sense that the graph's tensor table
/// holds the storage and the operator holds the ordered id lists; the
/// predecessor/successor lists are duplicate-free back-edges mirroring the
/// tensor-level producer/consumer edges.
pub struct Operator {
    id: OpId,
    op: Operation,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    predecessors: Vec<OpId>,
    successors: Vec<OpId>,
}

impl Operator {
    pub(crate) fn new(id: OpId, op: Operation, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Operator {
            id,
            op,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn op(&self) -> &Operation {
        &self.op
    }

    pub(crate) fn op_mut(&mut self) -> &mut Operation {
        &mut self.op
    }

    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// The `i`-th input tensor id.
    pub fn input(&self, i: usize) -> TensorId {
        self.inputs[i]
    }

    /// The `i`-th output tensor id.
    pub fn output(&self, i: usize) -> TensorId {
        self.outputs[i]
    }

    pub fn predecessors(&self) -> &[OpId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[OpId] {
        &self.successors
    }

    pub(crate) fn add_predecessor(&mut self, op: OpId) {
        if !self.predecessors.contains(&op) {
            self.predecessors.push(op);
        }
    }

    pub(crate) fn remove_predecessor(&mut self, op: OpId) {
        self.predecessors.retain(|&p| p != op);
    }

    pub(crate) fn add_successor(&mut self, op: OpId) {
        if !self.successors.contains(&op) {
            self.successors.push(op);
        }
    }

    pub(crate) fn remove_successor(&mut self, op: OpId) {
        self.successors.retain(|&s| s != op);
    }

    /// Swaps `old` for `new` in the input list. Edge bookkeeping is the
    /// caller's responsibility.
    pub(crate) fn replace_input(&mut self, old: TensorId, new: TensorId) {
        for input in &mut self.inputs {
            if *input == old {
                *input = new;
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op {} {}", self.id.0, self.kind())?;
        write!(f, ", in [")?;
        for (i, t) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t.0)?;
        }
        write!(f, "], out [")?;
        for (i, t) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", t.0)?;
        }
        write!(f, "], pred ")?;
        write!(f, "{:?}", self.predecessors.iter().map(|p| p.0).collect::<Vec<_>>())?;
        write!(f, ", succ ")?;
        write!(f, "{:?}", self.successors.iter().map(|s| s.0).collect::<Vec<_>>())
    }
}
