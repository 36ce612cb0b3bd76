//! Enumerates the scalar element types supported by graph tensors.

/// Logical dtype identifier shared between tensors and kernel dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 16-bit floating point with full mantissa (fp16).
    F16,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit signed integer.
    I32,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::U32 | DType::I32 => 4,
        }
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }

    /// Returns `true` when the dtype is a signed or unsigned integer.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::U32 | DType::I32)
    }
}

/// Trait binding a Rust scalar to its logical dtype tag.
///
/// Kernels and data accessors are generic over `Elem` so a single
/// implementation covers every supported element type. `approx_eq` encodes
/// the comparison rule used by tensor equality checks: exact for integers,
/// relative-error for floats (with an absolute bound when one operand is
/// zero).
pub trait Elem: Copy + Default + PartialEq + Send + Sync + 'static {
    const DTYPE: DType;

    fn approx_eq(a: Self, b: Self, relative_error: f64) -> bool;
}

impl Elem for f32 {
    const DTYPE: DType = DType::F32;

    fn approx_eq(a: Self, b: Self, relative_error: f64) -> bool {
        let (a, b) = (a as f64, b as f64);
        let diff = (a - b).abs();
        if a.abs().min(b.abs()) == 0.0 {
            diff <= relative_error
        } else {
            diff / a.abs().max(b.abs()) <= relative_error
        }
    }
}

impl Elem for u32 {
    const DTYPE: DType = DType::U32;

    fn approx_eq(a: Self, b: Self, _relative_error: f64) -> bool {
        a == b
    }
}

impl Elem for i32 {
    const DTYPE: DType = DType::I32;

    fn approx_eq(a: Self, b: Self, _relative_error: f64) -> bool {
        a == b
    }
}
