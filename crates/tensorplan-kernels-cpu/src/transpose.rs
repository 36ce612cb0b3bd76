//! Axis-permutation kernel.

use anyhow::{bail, Result};
use linkme::distributed_slice;

use tensorplan::kernel::{KernelDef, KERNEL_DEFS};
use tensorplan::tensor::shape::{contiguous_strides, unravel_index};
use tensorplan::{DType, Device, Elem, Graph, OpKind, Operation, Operator, Tensor};

#[distributed_slice(KERNEL_DEFS)]
static TRANSPOSE_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::Transpose,
    run: run_transpose,
};

fn run_transpose(graph: &Graph, op: &Operator) -> Result<()> {
    let Operation::Transpose(spec) = op.op() else {
        bail!("transpose kernel dispatched on {}", op.kind());
    };
    let input = graph.tensor(op.input(0));
    let out = graph.tensor(op.output(0));
    match out.dtype() {
        DType::F32 => permute_copy::<f32>(input, out, &spec.perm),
        DType::U32 => permute_copy::<u32>(input, out, &spec.perm),
        DType::I32 => permute_copy::<i32>(input, out, &spec.perm),
        other => bail!("transpose kernel does not support {other:?}"),
    }
    Ok(())
}

fn permute_copy<T: Elem>(input: &Tensor, out: &Tensor, perm: &[usize]) {
    let out_dims = out.shape().dims();
    let in_strides = contiguous_strides(input.shape().dims());
    let src = input.as_slice::<T>();
    let dst = unsafe { out.as_mut_slice::<T>() };
    for (i, slot) in dst.iter_mut().enumerate() {
        let coords = unravel_index(i, out_dims);
        let mut linear = 0usize;
        for (axis, &coord) in coords.iter().enumerate() {
            linear += coord * in_strides[perm[axis]];
        }
        *slot = src[linear];
    }
}
