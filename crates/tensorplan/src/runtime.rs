//! Host runtime: zeroed aligned allocation and the kernel dispatch loop.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use once_cell::sync::Lazy;

use crate::graph::Graph;
use crate::kernel;

/// Execution device. Only host CPU exists in this engine; the enumeration is
/// part of the kernel registry key so further devices slot in beside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
}

/// Host-memory runtime.
///
/// `alloc` returns zero-initialised memory rounded up to an 8-byte multiple
/// and aligned to 8 bytes; `dealloc` releases exactly what `alloc` returned.
#[derive(Debug)]
pub struct NativeCpuRuntime {
    device: Device,
}

static SHARED: Lazy<Arc<NativeCpuRuntime>> =
    Lazy::new(|| Arc::new(NativeCpuRuntime { device: Device::Cpu }));

impl NativeCpuRuntime {
    pub const ALIGNMENT: usize = 8;

    /// The process-wide runtime instance.
    pub fn shared() -> Arc<NativeCpuRuntime> {
        Arc::clone(&SHARED)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn layout_for(bytes: usize) -> Option<Layout> {
        let rounded = bytes.div_ceil(Self::ALIGNMENT).max(1) * Self::ALIGNMENT;
        Layout::from_size_align(rounded, Self::ALIGNMENT).ok()
    }

    /// Allocates zero-initialised host memory. `None` on exhaustion.
    pub fn alloc(&self, bytes: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout_for(bytes)?;
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    /// Releases memory previously returned by [`alloc`](Self::alloc).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc(bytes)` on this runtime with the same
    /// `bytes`, and must not be used afterwards.
    pub unsafe fn dealloc(&self, ptr: NonNull<u8>, bytes: usize) {
        let layout = Self::layout_for(bytes).expect("layout was valid at allocation time");
        dealloc(ptr.as_ptr(), layout);
    }

    /// Executes every operator of the graph in its stored topological order,
    /// dispatching through the process-wide kernel registry.
    pub fn run(&self, graph: &Graph) -> Result<()> {
        ensure!(
            graph.is_sorted(),
            "graph must be topologically sorted before execution"
        );
        for &op_id in graph.op_ids() {
            let op = graph.op(op_id);
            let kernel = kernel::lookup(self.device, op.kind()).ok_or_else(|| {
                anyhow!(
                    "no kernel registered for ({:?}, {}); cannot execute op {}",
                    self.device,
                    op.kind(),
                    op.id().0
                )
            })?;
            (kernel.run)(graph, op)?;
        }
        Ok(())
    }
}
