//! Tensor entity: shape, dtype, data binding, and use/def back-edges.
//!
//! Tensors are owned by a [`Graph`](crate::graph::Graph) and referenced
//! everywhere else through [`TensorId`] values. Two identity schemes coexist:
//! the per-object [`TensorId`] and a [`FamilyId`] that operator clones
//! preserve, which shape inference uses to correlate an operator's view of an
//! output with the graph's authoritative copy.

pub mod dtype;
pub mod shape;

use std::fmt;
use std::ptr::NonNull;

pub use dtype::{DType, Elem};
pub use shape::Shape;

use crate::operator::OpId;

/// Stable per-object tensor identifier issued by the owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u32);

/// Identifier shared by a tensor and all of its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(pub u32);

/// A multi-dimensional array value registered in a graph.
///
/// The data handle starts unbound and is pointed into the graph's memory
/// arena by `data_malloc`. Back-edges (`producer`, `consumers`) are
/// non-owning id references maintained by the graph's mutation primitives.
pub struct Tensor {
    id: TensorId,
    family: FamilyId,
    shape: Shape,
    dtype: DType,
    data: Option<NonNull<u8>>,
    producer: Option<OpId>,
    consumers: Vec<OpId>,
}

impl Tensor {
    pub(crate) fn new(id: TensorId, family: FamilyId, shape: Shape, dtype: DType) -> Self {
        Tensor {
            id,
            family,
            shape,
            dtype,
            data: None,
            producer: None,
            consumers: Vec::new(),
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn family_id(&self) -> FamilyId {
        self.family
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Storage footprint in bytes.
    pub fn bytes(&self) -> usize {
        self.num_elements() * self.dtype.size_in_bytes()
    }

    /// The operator producing this tensor, if any. `None` marks a graph input.
    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }

    /// Operators consuming this tensor. Empty marks a graph output.
    pub fn consumers(&self) -> &[OpId] {
        &self.consumers
    }

    pub(crate) fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub(crate) fn set_producer(&mut self, producer: Option<OpId>) {
        self.producer = producer;
    }

    pub(crate) fn add_consumer(&mut self, op: OpId) {
        if !self.consumers.contains(&op) {
            self.consumers.push(op);
        }
    }

    pub(crate) fn remove_consumer(&mut self, op: OpId) {
        self.consumers.retain(|&c| c != op);
    }

    /// Whether `data_malloc` has bound this tensor to arena storage.
    pub fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    pub fn data_ptr(&self) -> Option<NonNull<u8>> {
        self.data
    }

    pub(crate) fn bind_data(&mut self, ptr: NonNull<u8>) {
        self.data = Some(ptr);
    }

    /// Views the bound storage as a typed slice.
    ///
    /// The dtype must match `T` and the tensor must be bound; both are
    /// structural requirements, so violations are fatal.
    pub fn as_slice<T: Elem>(&self) -> &[T] {
        assert_eq!(
            self.dtype,
            T::DTYPE,
            "tensor {} holds {:?}, not {:?}",
            self.id.0,
            self.dtype,
            T::DTYPE
        );
        let data = self.data.expect("tensor data pointer is unbound");
        unsafe { std::slice::from_raw_parts(data.as_ptr() as *const T, self.num_elements()) }
    }

    /// Views the bound storage as a mutable typed slice.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no other reference to this tensor's
    /// bytes is live for the duration of the borrow. Kernels satisfy this
    /// because the planner gives overlapping-lifetime tensors disjoint arena
    /// ranges and execution is single-threaded.
    pub unsafe fn as_mut_slice<T: Elem>(&self) -> &mut [T] {
        assert_eq!(
            self.dtype,
            T::DTYPE,
            "tensor {} holds {:?}, not {:?}",
            self.id.0,
            self.dtype,
            T::DTYPE
        );
        let data = self.data.expect("tensor data pointer is unbound");
        std::slice::from_raw_parts_mut(data.as_ptr() as *mut T, self.num_elements())
    }

    /// Copies `values` into the bound storage.
    pub fn copy_from<T: Elem>(&self, values: &[T]) {
        assert_eq!(
            values.len(),
            self.num_elements(),
            "tensor {} expects {} elements, got {}",
            self.id.0,
            self.num_elements(),
            values.len()
        );
        unsafe { self.as_mut_slice::<T>() }.copy_from_slice(values);
    }

    /// Fills the bound storage from a generator over the linear index.
    pub fn fill_with<T: Elem, F: FnMut(usize) -> T>(&self, mut generator: F) {
        let slot = unsafe { self.as_mut_slice::<T>() };
        for (i, value) in slot.iter_mut().enumerate() {
            *value = generator(i);
        }
    }

    /// Copies the bound storage out into a vector.
    pub fn to_vec<T: Elem>(&self) -> Vec<T> {
        self.as_slice::<T>().to_vec()
    }

    /// Compares the bound storage against `expected` with the default
    /// relative error of 1e-6.
    pub fn equal_data<T: Elem>(&self, expected: &[T]) -> bool {
        self.equal_data_rel(expected, 1e-6)
    }

    /// Compares the bound storage against `expected`: exact for integer
    /// dtypes, relative-error for floats.
    pub fn equal_data_rel<T: Elem>(&self, expected: &[T], relative_error: f64) -> bool {
        if expected.len() != self.num_elements() {
            return false;
        }
        self.as_slice::<T>()
            .iter()
            .zip(expected.iter())
            .all(|(&a, &b)| T::approx_eq(a, b, relative_error))
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tensor {} (family {}) {:?} {}",
            self.id.0, self.family.0, self.dtype, self.shape
        )?;
        match self.producer {
            Some(op) => write!(f, ", source op {}", op.0)?,
            None => write!(f, ", graph input")?,
        }
        Ok(())
    }
}
