use tensorplan::{
    DType, Graph, MatMulSpec, NativeCpuRuntime, OpKind, Operation, Shape, TransposeSpec,
};

fn graph() -> Graph {
    Graph::new(NativeCpuRuntime::shared())
}

#[test]
fn equal_transpose_pair_collapses_onto_the_consumer() {
    let mut g = graph();
    let x = g.add_tensor(Shape::new([2, 3]), DType::F32);
    let w = g.add_tensor(Shape::new([2, 3]), DType::F32);
    let perm = TransposeSpec::new([1, 0]);
    let t1 = g
        .add_op(Operation::Transpose(perm.clone()), vec![x])
        .unwrap();
    let y1 = g.op(t1).output(0);
    let t2 = g.add_op(Operation::Transpose(perm), vec![y1]).unwrap();
    let y2 = g.op(t2).output(0);
    let add = g.add_op(Operation::Add, vec![y2, w]).unwrap();

    g.optimize().unwrap();

    assert_eq!(g.op_count(), 1);
    assert_eq!(g.op(add).kind(), OpKind::Add);
    assert_eq!(g.op(add).inputs(), &[x, w]);
    assert_eq!(g.tensor(x).consumers(), &[add]);
    assert!(g.op(add).predecessors().is_empty());
    // x, w, and the add output survive; both transpose outputs are gone.
    assert_eq!(g.tensor_count(), 3);
    assert!(g.check_valid());
}

#[test]
fn dangling_transpose_pair_leaves_only_the_input() {
    let mut g = graph();
    let x = g.add_tensor(Shape::new([4, 4]), DType::F32);
    let perm = TransposeSpec::new([1, 0]);
    let t1 = g
        .add_op(Operation::Transpose(perm.clone()), vec![x])
        .unwrap();
    let y1 = g.op(t1).output(0);
    g.add_op(Operation::Transpose(perm), vec![y1]).unwrap();

    g.optimize().unwrap();

    assert_eq!(g.op_count(), 0);
    assert_eq!(g.tensor_count(), 1);
    assert!(g.tensor(x).consumers().is_empty());
}

#[test]
fn differing_permutations_are_left_alone() {
    let mut g = graph();
    let x = g.add_tensor(Shape::new([2, 3]), DType::F32);
    let t1 = g
        .add_op(Operation::Transpose(TransposeSpec::new([1, 0])), vec![x])
        .unwrap();
    let y1 = g.op(t1).output(0);
    g.add_op(Operation::Transpose(TransposeSpec::new([0, 1])), vec![y1])
        .unwrap();

    g.optimize().unwrap();
    assert_eq!(g.op_count(), 2);
}

#[test]
fn last_axes_swap_folds_into_matmul_flag() {
    let mut g = graph();
    let a = g.add_tensor(Shape::new([3, 2]), DType::F32);
    let b = g.add_tensor(Shape::new([3, 4]), DType::F32);
    let t = g
        .add_op(Operation::Transpose(TransposeSpec::new([1, 0])), vec![a])
        .unwrap();
    let t_out = g.op(t).output(0);
    let mm = g
        .add_op(Operation::MatMul(MatMulSpec::default()), vec![t_out, b])
        .unwrap();

    g.optimize().unwrap();

    assert_eq!(g.op_count(), 1);
    let Operation::MatMul(spec) = g.op(mm).op() else {
        panic!("matmul payload expected");
    };
    assert!(spec.trans_a);
    assert!(!spec.trans_b);
    assert_eq!(g.op(mm).inputs(), &[a, b]);
    assert_eq!(g.tensor(a).consumers(), &[mm]);
    assert!(g.check_valid());

    // The fused operator reads (3, 2) transposed against (3, 4).
    g.shape_infer().unwrap();
    assert_eq!(g.tensor(g.op(mm).output(0)).shape().dims(), &[2, 4]);
}

#[test]
fn second_matmul_input_flips_trans_b() {
    let mut g = graph();
    let a = g.add_tensor(Shape::new([2, 3]), DType::F32);
    let b = g.add_tensor(Shape::new([4, 3]), DType::F32);
    let t = g
        .add_op(Operation::Transpose(TransposeSpec::new([1, 0])), vec![b])
        .unwrap();
    let t_out = g.op(t).output(0);
    let mm = g
        .add_op(Operation::MatMul(MatMulSpec::default()), vec![a, t_out])
        .unwrap();

    g.optimize().unwrap();

    let Operation::MatMul(spec) = g.op(mm).op() else {
        panic!("matmul payload expected");
    };
    assert!(!spec.trans_a);
    assert!(spec.trans_b);
    assert_eq!(g.op(mm).inputs(), &[a, b]);
}

#[test]
fn fusion_skips_a_transpose_with_other_users() {
    let mut g = graph();
    let a = g.add_tensor(Shape::new([2, 2]), DType::F32);
    let b = g.add_tensor(Shape::new([2, 2]), DType::F32);
    let t = g
        .add_op(Operation::Transpose(TransposeSpec::new([1, 0])), vec![a])
        .unwrap();
    let t_out = g.op(t).output(0);
    g.add_op(Operation::MatMul(MatMulSpec::default()), vec![t_out, b])
        .unwrap();
    // A second reader keeps the transpose output alive.
    g.add_op(Operation::Add, vec![t_out, b]).unwrap();

    g.optimize().unwrap();
    assert_eq!(g.op_count(), 3);
    assert!(g.check_valid());
}

#[test]
fn fusion_skips_permutations_that_touch_leading_axes() {
    let mut g = graph();
    let a = g.add_tensor(Shape::new([1, 2, 3, 4]), DType::F32);
    let b = g.add_tensor(Shape::new([1, 3, 4, 5]), DType::F32);
    let t = g
        .add_op(Operation::Transpose(TransposeSpec::new([0, 2, 1, 3])), vec![a])
        .unwrap();
    let t_out = g.op(t).output(0);
    let mm = g
        .add_op(Operation::MatMul(MatMulSpec::default()), vec![t_out, b])
        .unwrap();

    g.optimize().unwrap();

    assert_eq!(g.op_count(), 2);
    let Operation::MatMul(spec) = g.op(mm).op() else {
        panic!("matmul payload expected");
    };
    assert!(!spec.trans_a);
}

#[test]
fn optimize_is_idempotent() {
    let mut g = graph();
    let x = g.add_tensor(Shape::new([2, 3]), DType::F32);
    let w = g.add_tensor(Shape::new([2, 3]), DType::F32);
    let perm = TransposeSpec::new([1, 0]);
    let t1 = g
        .add_op(Operation::Transpose(perm.clone()), vec![x])
        .unwrap();
    let y1 = g.op(t1).output(0);
    let t2 = g.add_op(Operation::Transpose(perm), vec![y1]).unwrap();
    let y2 = g.op(t2).output(0);
    g.add_op(Operation::Add, vec![y2, w]).unwrap();

    g.optimize().unwrap();
    let ops_once: Vec<_> = g.op_ids().to_vec();
    let tensors_once = g.tensor_count();

    g.optimize().unwrap();
    assert_eq!(g.op_ids(), ops_once.as_slice());
    assert_eq!(g.tensor_count(), tensors_once);
}
