use tensorplan::{DType, Graph, NativeCpuRuntime, Operation, Shape, TensorId};
use tensorplan_kernels_cpu as _;

fn incremental(n: usize) -> Vec<f32> {
    (0..n).map(|v| v as f32).collect()
}

fn run_binary(op: Operation, shape1: Shape, shape2: Shape, divisor_ones: bool) -> (Graph, TensorId) {
    let mut g = Graph::new(NativeCpuRuntime::shared());
    let t1 = g.add_tensor(shape1, DType::F32);
    let t2 = g.add_tensor(shape2, DType::F32);
    let op = g.add_op(op, vec![t1, t2]).unwrap();
    let out = g.op(op).output(0);

    g.data_malloc().unwrap();
    g.tensor(t1).copy_from(&incremental(g.tensor(t1).num_elements()));
    if divisor_ones {
        g.tensor(t2).fill_with(|_| 1.0f32);
    } else {
        g.tensor(t2).copy_from(&incremental(g.tensor(t2).num_elements()));
    }

    NativeCpuRuntime::shared().run(&g).unwrap();
    (g, out)
}

#[test]
fn broadcast_add() {
    let (g, out) = run_binary(
        Operation::Add,
        Shape::new([1, 2, 2, 3, 1]),
        Shape::new([2, 1, 1]),
        false,
    );
    assert_eq!(g.tensor(out).shape().dims(), &[1, 2, 2, 3, 1]);
    assert!(g
        .tensor(out)
        .equal_data(&[0.0, 1.0, 2.0, 4.0, 5.0, 6.0, 6.0, 7.0, 8.0, 10.0, 11.0, 12.0]));
}

#[test]
fn broadcast_mul() {
    let (g, out) = run_binary(
        Operation::Mul,
        Shape::new([1, 2, 2, 3, 1]),
        Shape::new([2, 1, 1]),
        false,
    );
    assert!(g
        .tensor(out)
        .equal_data(&[0.0, 0.0, 0.0, 3.0, 4.0, 5.0, 0.0, 0.0, 0.0, 9.0, 10.0, 11.0]));
}

#[test]
fn broadcast_sub() {
    let (g, out) = run_binary(
        Operation::Sub,
        Shape::new([1, 2, 2, 3, 1]),
        Shape::new([2, 1, 1]),
        false,
    );
    assert!(g
        .tensor(out)
        .equal_data(&[0.0, 1.0, 2.0, 2.0, 3.0, 4.0, 6.0, 7.0, 8.0, 8.0, 9.0, 10.0]));
}

#[test]
fn div_by_ones_is_identity() {
    let (g, out) = run_binary(
        Operation::Div,
        Shape::new([1, 2, 2, 3, 1]),
        Shape::new([2, 1, 1]),
        true,
    );
    assert!(g
        .tensor(out)
        .equal_data(&incremental(12)));
}

#[test]
fn unsigned_add_against_a_scalar() {
    let mut g = Graph::new(NativeCpuRuntime::shared());
    let a = g.add_tensor(Shape::new([2, 2]), DType::U32);
    let b = g.add_tensor(Shape::scalar(), DType::U32);
    let add = g.add_op(Operation::Add, vec![a, b]).unwrap();
    let out = g.op(add).output(0);

    g.data_malloc().unwrap();
    g.tensor(a).copy_from(&[1u32, 2, 3, 4]);
    g.tensor(b).copy_from(&[10u32]);
    NativeCpuRuntime::shared().run(&g).unwrap();

    assert!(g.tensor(out).equal_data(&[11u32, 12, 13, 14]));
    assert!(!g.tensor(out).equal_data(&[11u32, 12, 13, 15]));
}
