//! Axis-concatenation kernel.

use anyhow::{bail, Result};
use linkme::distributed_slice;

use tensorplan::kernel::{KernelDef, KERNEL_DEFS};
use tensorplan::tensor::shape::{contiguous_strides, normalize_axis, unravel_index};
use tensorplan::{DType, Device, Elem, Graph, OpKind, Operation, Operator, Tensor};

#[distributed_slice(KERNEL_DEFS)]
static CONCAT_CPU: KernelDef = KernelDef {
    device: Device::Cpu,
    kind: OpKind::Concat,
    run: run_concat,
};

fn run_concat(graph: &Graph, op: &Operator) -> Result<()> {
    let Operation::Concat(spec) = op.op() else {
        bail!("concat kernel dispatched on {}", op.kind());
    };
    let out = graph.tensor(op.output(0));
    let axis = normalize_axis(spec.axis, out.rank())?;
    let inputs: Vec<&Tensor> = op.inputs().iter().map(|&id| graph.tensor(id)).collect();
    match out.dtype() {
        DType::F32 => copy_parts::<f32>(&inputs, out, axis),
        DType::U32 => copy_parts::<u32>(&inputs, out, axis),
        DType::I32 => copy_parts::<i32>(&inputs, out, axis),
        other => bail!("concat kernel does not support {other:?}"),
    }
    Ok(())
}

fn copy_parts<T: Elem>(inputs: &[&Tensor], out: &Tensor, axis: usize) {
    let out_strides = contiguous_strides(out.shape().dims());
    let dst = unsafe { out.as_mut_slice::<T>() };
    let mut axis_offset = 0usize;
    for input in inputs {
        let in_dims = input.shape().dims();
        let src = input.as_slice::<T>();
        for (i, &value) in src.iter().enumerate() {
            let mut coords = unravel_index(i, in_dims);
            coords[axis] += axis_offset;
            let linear: usize = coords
                .iter()
                .zip(out_strides.iter())
                .map(|(&coord, &stride)| coord * stride)
                .sum();
            dst[linear] = value;
        }
        axis_offset += in_dims[axis];
    }
}
