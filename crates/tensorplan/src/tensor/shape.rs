//! Tensor shapes and the broadcast / indexing arithmetic shared by shape
//! inference and the CPU kernels.

use std::fmt;

use anyhow::{ensure, Result};

/// Stores the logical dimensions of a tensor.
///
/// Rank 0 is a scalar; it broadcasts against any other shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// The rank-0 scalar shape.
    pub fn scalar() -> Self {
        Shape { dims: Vec::new() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    ///
    /// A scalar has one element.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return write!(f, "scalar");
        }
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{dim}")?;
        }
        Ok(())
    }
}

/// Bidirectional broadcast of two shapes.
///
/// Shapes are aligned right; missing leading axes count as 1. At each aligned
/// position the extents must be equal or at least one must be 1, and the
/// result extent is the larger of the two. Commutative by construction.
pub fn infer_broadcast(a: &Shape, b: &Shape) -> Result<Shape> {
    let rank = a.rank().max(b.rank());
    let mut dims = Vec::with_capacity(rank);
    for axis in 0..rank {
        let da = padded_dim(a, rank, axis);
        let db = padded_dim(b, rank, axis);
        ensure!(
            da == db || da == 1 || db == 1,
            "shapes {a} and {b} are not broadcast-compatible at axis {axis}"
        );
        dims.push(da.max(db));
    }
    Ok(Shape::new(dims))
}

fn padded_dim(shape: &Shape, rank: usize, axis: usize) -> usize {
    let offset = rank - shape.rank();
    if axis < offset {
        1
    } else {
        shape.dims()[axis - offset]
    }
}

/// Resolves a possibly negative axis against a rank.
pub fn normalize_axis(axis: isize, rank: usize) -> Result<usize> {
    ensure!(rank >= 1, "axis normalisation requires rank >= 1");
    let rank = rank as isize;
    ensure!(
        axis >= -rank && axis < rank,
        "axis {axis} is out of range for rank {rank}"
    );
    Ok(if axis < 0 { (rank + axis) as usize } else { axis as usize })
}

/// Builds row-major contiguous strides for the given dimensions.
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; dims.len()];
    let mut stride = 1usize;
    for axis in (0..dims.len()).rev() {
        strides[axis] = stride;
        stride *= dims[axis];
    }
    strides
}

/// Converts a linear row-major index into per-axis coordinates.
pub fn unravel_index(mut linear: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0usize; dims.len()];
    for axis in (0..dims.len()).rev() {
        coords[axis] = linear % dims[axis];
        linear /= dims[axis];
    }
    coords
}

/// Maps output coordinates into the linear offset of a broadcast operand.
///
/// `dims`/`strides` describe the operand, which may have lower rank than the
/// coordinate vector; axes are aligned right and size-1 operand axes wrap via
/// modulo, so the same element is revisited along broadcast axes.
pub fn broadcast_offset(coords: &[usize], dims: &[usize], strides: &[usize]) -> usize {
    debug_assert_eq!(dims.len(), strides.len());
    debug_assert!(dims.len() <= coords.len());
    let offset = coords.len() - dims.len();
    let mut linear = 0usize;
    for (axis, (&dim, &stride)) in dims.iter().zip(strides.iter()).enumerate() {
        linear += (coords[offset + axis] % dim) * stride;
    }
    linear
}
