//! Registry of compute kernels, indexed by function id.
//!
//! Kernels are black boxes to the orchestration runtime: a handler taking
//! the task's argument words and returning a status (0 = success). Each
//! registered id also gets a stable pseudo device address, carried in the
//! dispatch payload the way the device build carries the kernel binary's
//! GM address.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Kernel entry point: argument words in, completion status out.
pub type KernelFn = dyn Fn(&[u64]) -> i32 + Send + Sync;

struct KernelEntry {
    handler: Box<KernelFn>,
    gm_addr: u64,
}

#[derive(Default)]
pub struct KernelRegistry {
    kernels: RwLock<HashMap<i32, Arc<KernelEntry>>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, function_id: i32, handler: impl Fn(&[u64]) -> i32 + Send + Sync + 'static) {
        let entry = Arc::new(KernelEntry {
            handler: Box::new(handler),
            gm_addr: 0x1000_0000 + ((function_id as u64) << 12),
        });
        self.kernels.write().insert(function_id, entry);
    }

    /// Pseudo device address of a registered kernel.
    pub fn gm_addr(&self, function_id: i32) -> Option<u64> {
        self.kernels.read().get(&function_id).map(|entry| entry.gm_addr)
    }

    /// Run a kernel; unknown ids report a non-zero status to the caller's
    /// handshake instead of faulting the worker.
    pub fn run(&self, function_id: i32, args: &[u64]) -> i32 {
        let entry = self.kernels.read().get(&function_id).cloned();
        match entry {
            Some(entry) => (entry.handler)(args),
            None => -1,
        }
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry").field("kernels", &self.kernels.read().len()).finish()
    }
}
