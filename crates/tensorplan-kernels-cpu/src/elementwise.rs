//! Broadcast-capable elementwise binary kernels.

use std::ops::{Add, Div, Mul, Sub};

use anyhow::{bail, Result};
use linkme::distributed_slice;

use tensorplan::kernel::{KernelDef, KERNEL_DEFS};
use tensorplan::tensor::shape::{broadcast_offset, contiguous_strides, unravel_index};
use tensorplan::{DType, Device, Elem, Graph, OpKind, Operator, Tensor};

#[distributed_slice(KERNEL_DEFS)]
static ADD_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::Add,
    run: run_elementwise,
};

#[distributed_slice(KERNEL_DEFS)]
static SUB_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::Sub,
    run: run_elementwise,
};

#[distributed_slice(KERNEL_DEFS)]
static MUL_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::Mul,
    run: run_elementwise,
};

#[distributed_slice(KERNEL_DEFS)]
static DIV_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::Div,
    run: run_elementwise,
};

fn run_elementwise(graph: &Graph, op: &Operator) -> Result<()> {
    let lhs = graph.tensor(op.input(0));
    let rhs = graph.tensor(op.input(1));
    let out = graph.tensor(op.output(0));
    match out.dtype() {
        DType::F32 => apply::<f32>(lhs, rhs, out, op.kind()),
        DType::U32 => apply::<u32>(lhs, rhs, out, op.kind()),
        DType::I32 => apply::<i32>(lhs, rhs, out, op.kind()),
        other => bail!("elementwise kernel does not support {other:?}"),
    }
}

fn apply<T>(lhs: &Tensor, rhs: &Tensor, out: &Tensor, kind: OpKind) -> Result<()>
where
    T: Elem + Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T>,
{
    let out_dims = out.shape().dims();
    let lhs_strides = contiguous_strides(lhs.shape().dims());
    let rhs_strides = contiguous_strides(rhs.shape().dims());
    let a = lhs.as_slice::<T>();
    let b = rhs.as_slice::<T>();
    // The planner gives the output a range disjoint from both inputs.
    let dst = unsafe { out.as_mut_slice::<T>() };
    for (i, slot) in dst.iter_mut().enumerate() {
        let coords = unravel_index(i, out_dims);
        let x = a[broadcast_offset(&coords, lhs.shape().dims(), &lhs_strides)];
        let y = b[broadcast_offset(&coords, rhs.shape().dims(), &rhs_strides)];
        *slot = match kind {
            OpKind::Add => x + y,
            OpKind::Sub => x - y,
            OpKind::Mul => x * y,
            OpKind::Div => x / y,
            other => bail!("{other} is not an elementwise kernel"),
        };
    }
    Ok(())
}
