//! Process-wide kernel registry keyed by `(Device, OpKind)`.
//!
//! Kernel crates contribute [`KernelDef`] entries through the `KERNEL_DEFS`
//! distributed slice; the registry index is frozen on first lookup and never
//! mutated afterwards, so read-only lookup is safe from any context.

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::graph::Graph;
use crate::operator::{OpKind, Operator};
use crate::runtime::Device;

/// A kernel reads its operator's inputs and writes its outputs in place
/// through the tensors' bound data pointers.
pub type KernelFn = fn(&Graph, &Operator) -> Result<()>;

pub struct KernelDef {
    pub device: Device,
    pub kind: OpKind,
    pub run: KernelFn,
}

#[linkme::distributed_slice]
pub static KERNEL_DEFS: [KernelDef] = [..];

static INDEX: Lazy<HashMap<(Device, OpKind), &'static KernelDef>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for def in KERNEL_DEFS {
        index.insert((def.device, def.kind), def);
    }
    index
});

/// Looks up the kernel registered for a device / operator kind pair.
pub fn lookup(device: Device, kind: OpKind) -> Option<&'static KernelDef> {
    INDEX.get(&(device, kind)).copied()
}

/// Every registered kernel definition, in link order.
pub fn registered() -> &'static [KernelDef] {
    &KERNEL_DEFS
}
