pub use linkme;

pub mod graph;
pub mod kernel;
pub mod operator;
pub mod runtime;
pub mod tensor;

pub use graph::Graph;
pub use operator::{ConcatSpec, MatMulSpec, OpId, OpKind, Operation, Operator, TransposeSpec};
pub use runtime::{Device, NativeCpuRuntime};
pub use tensor::{DType, Elem, FamilyId, Shape, Tensor, TensorId};
