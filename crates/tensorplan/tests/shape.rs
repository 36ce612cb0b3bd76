use tensorplan::tensor::shape::{
    broadcast_offset, contiguous_strides, infer_broadcast, normalize_axis, unravel_index,
};
use tensorplan::tensor::{Elem, Shape};

#[test]
fn broadcast_matches_onnx_alignment_rules() {
    let cases: &[(&[usize], &[usize], &[usize])] = &[
        (&[2, 3, 3, 4], &[2, 3, 3, 4], &[2, 3, 3, 4]),
        (&[2, 3, 4, 5], &[], &[2, 3, 4, 5]),
        (&[2, 3, 4, 5], &[5], &[2, 3, 4, 5]),
        (&[4, 5], &[2, 3, 4, 5], &[2, 3, 4, 5]),
        (&[1, 4, 5], &[2, 3, 1, 1], &[2, 3, 4, 5]),
        (&[3, 4, 5], &[2, 1, 1, 1], &[2, 3, 4, 5]),
        (&[1, 2, 2, 3, 1], &[2, 1, 1], &[1, 2, 2, 3, 1]),
    ];
    for &(a, b, expected) in cases {
        let a = Shape::new(a);
        let b = Shape::new(b);
        let result = infer_broadcast(&a, &b).unwrap();
        assert_eq!(result.dims(), expected, "broadcast({a}, {b})");
    }
}

#[test]
fn broadcast_is_commutative() {
    let a = Shape::new([1, 4, 5]);
    let b = Shape::new([2, 3, 1, 1]);
    assert_eq!(
        infer_broadcast(&a, &b).unwrap(),
        infer_broadcast(&b, &a).unwrap()
    );
}

#[test]
fn broadcast_rejects_incompatible_extents() {
    let a = Shape::new([2, 3]);
    let b = Shape::new([4, 3]);
    assert!(infer_broadcast(&a, &b).is_err());
}

#[test]
fn scalar_broadcasts_to_anything() {
    let a = Shape::scalar();
    let b = Shape::new([7, 1, 2]);
    assert_eq!(infer_broadcast(&a, &b).unwrap().dims(), &[7, 1, 2]);
}

#[test]
fn axis_normalisation_handles_negative_axes() {
    assert_eq!(normalize_axis(0, 4).unwrap(), 0);
    assert_eq!(normalize_axis(3, 4).unwrap(), 3);
    assert_eq!(normalize_axis(-1, 4).unwrap(), 3);
    assert_eq!(normalize_axis(-4, 4).unwrap(), 0);
    assert!(normalize_axis(4, 4).is_err());
    assert!(normalize_axis(-5, 4).is_err());
}

#[test]
fn strides_and_unravel_round_trip() {
    let dims = [2, 3, 4];
    let strides = contiguous_strides(&dims);
    assert_eq!(strides, vec![12, 4, 1]);
    for linear in 0..24usize {
        let coords = unravel_index(linear, &dims);
        let back: usize = coords
            .iter()
            .zip(strides.iter())
            .map(|(&c, &s)| c * s)
            .sum();
        assert_eq!(back, linear);
    }
}

#[test]
fn broadcast_offset_wraps_size_one_axes() {
    // Operand (2, 1, 1) viewed through output coordinates of rank 5.
    let dims = [2, 1, 1];
    let strides = contiguous_strides(&dims);
    assert_eq!(broadcast_offset(&[0, 0, 1, 2, 0], &dims, &strides), 1);
    assert_eq!(broadcast_offset(&[0, 1, 0, 1, 0], &dims, &strides), 0);
    // A scalar operand always maps to offset 0.
    assert_eq!(broadcast_offset(&[3, 1, 4], &[], &[]), 0);
}

#[test]
fn float_comparison_uses_relative_error_with_zero_rule() {
    assert!(f32::approx_eq(1.0, 1.0 + 5e-7, 1e-6));
    assert!(!f32::approx_eq(1.0, 1.01, 1e-6));
    // One operand zero: absolute bound.
    assert!(f32::approx_eq(0.0, 5e-7, 1e-6));
    assert!(!f32::approx_eq(0.0, 0.1, 1e-6));
    // Integers compare exactly.
    assert!(u32::approx_eq(7, 7, 1e-6));
    assert!(!u32::approx_eq(7, 8, 1e-6));
}
