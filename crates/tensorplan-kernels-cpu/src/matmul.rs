//! Batched last-two-dims matrix multiplication with leading-dims broadcast.

use anyhow::{bail, Result};
use linkme::distributed_slice;

use tensorplan::kernel::{KernelDef, KERNEL_DEFS};
use tensorplan::tensor::shape::{broadcast_offset, contiguous_strides, unravel_index};
use tensorplan::{DType, Device, Graph, OpKind, Operation, Operator};

#[distributed_slice(KERNEL_DEFS)]
static MATMUL_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::MatMul,
    run: run_matmul,
};

fn run_matmul(graph: &Graph, op: &Operator) -> Result<()> {
    let Operation::MatMul(spec) = op.op() else {
        bail!("matmul kernel dispatched on {}", op.kind());
    };
    let a = graph.tensor(op.input(0));
    let b = graph.tensor(op.input(1));
    let out = graph.tensor(op.output(0));
    if out.dtype() != DType::F32 {
        bail!("matmul kernel does not support {:?}", out.dtype());
    }

    let rank = a.rank();
    let a_dims = a.shape().dims();
    let b_dims = b.shape().dims();
    let out_dims = out.shape().dims();

    let lead = &out_dims[..rank - 2];
    let m = out_dims[rank - 2];
    let n = out_dims[rank - 1];
    let k = if spec.trans_a { a_dims[rank - 2] } else { a_dims[rank - 1] };

    let a_cols = a_dims[rank - 1];
    let b_cols = b_dims[rank - 1];
    let a_matrix = a_dims[rank - 2] * a_dims[rank - 1];
    let b_matrix = b_dims[rank - 2] * b_dims[rank - 1];
    let a_lead = &a_dims[..rank - 2];
    let b_lead = &b_dims[..rank - 2];
    let a_lead_strides = contiguous_strides(a_lead);
    let b_lead_strides = contiguous_strides(b_lead);

    let src_a = a.as_slice::<f32>();
    let src_b = b.as_slice::<f32>();
    // The planner gives the output a range disjoint from both inputs.
    let dst = unsafe { out.as_mut_slice::<f32>() };

    let batch_count: usize = lead.iter().product();
    for batch in 0..batch_count {
        let coords = unravel_index(batch, lead);
        let a_base = broadcast_offset(&coords, a_lead, &a_lead_strides) * a_matrix;
        let b_base = broadcast_offset(&coords, b_lead, &b_lead_strides) * b_matrix;
        let out_base = batch * m * n;
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0f32;
                for l in 0..k {
                    let lhs = if spec.trans_a {
                        src_a[a_base + l * a_cols + i]
                    } else {
                        src_a[a_base + i * a_cols + l]
                    };
                    let rhs = if spec.trans_b {
                        src_b[b_base + j * b_cols + l]
                    } else {
                        src_b[b_base + l * b_cols + j]
                    };
                    acc += lhs * rhs;
                }
                dst[out_base + i * n + j] = acc;
            }
        }
    }
    Ok(())
}
