//! Per-core handshake buffers and the worker-side control loop.
//!
//! Each worker core owns one [`Handshake`]. The executor writes a
//! [`DispatchPayload`] and raises `aicpu_ready`; the core runs the kernel,
//! stores its status and raises `aicore_done`; the executor reaps the
//! completion and clears both flags. `control = 1` tells the core to quit.
//!
//! At startup a core announces itself by storing `core_index + 1` into
//! `aicore_done`; the executor acknowledges by clearing it before any
//! dispatch.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::config::MAX_ARGS;
use crate::kernel::KernelRegistry;
use crate::task::WorkerKind;

pub const CONTROL_QUIT: u32 = 1;

/// Execution request handed to a worker core.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DispatchPayload {
    pub task_id: i32,
    pub kernel_id: i32,
    pub worker_kind: WorkerKind,
    pub function_bin_addr: u64,
    pub num_args: i32,
    pub args: [u64; MAX_ARGS],
}

impl Default for DispatchPayload {
    fn default() -> Self {
        Self {
            task_id: -1,
            kernel_id: -1,
            worker_kind: WorkerKind::Vector,
            function_bin_addr: 0,
            num_args: 0,
            args: [0; MAX_ARGS],
        }
    }
}

impl DispatchPayload {
    pub fn args(&self) -> &[u64] {
        &self.args[..self.num_args as usize]
    }
}

/// One worker core's coordination record.
#[repr(C)]
pub struct Handshake {
    /// Raised by the executor once the payload is in place.
    pub aicpu_ready: AtomicU32,
    /// Raised by the core on completion; also carries the startup
    /// announcement (`core_index + 1`).
    pub aicore_done: AtomicU32,
    /// Kernel status of the last completed task; 0 means success.
    pub task_status: AtomicI32,
    /// Non-zero requests the core to quit its loop.
    pub control: AtomicU32,
    kind: WorkerKind,
    payload: UnsafeCell<DispatchPayload>,
}

// The payload cell has one writer (the executor) and is handed over via the
// release store of `aicpu_ready` / read back only after `aicore_done`.
unsafe impl Sync for Handshake {}

impl Handshake {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            aicpu_ready: AtomicU32::new(0),
            aicore_done: AtomicU32::new(0),
            task_status: AtomicI32::new(0),
            control: AtomicU32::new(0),
            kind,
            payload: UnsafeCell::new(DispatchPayload::default()),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// # Safety
    ///
    /// Executor only, and only while the core is idle (`aicpu_ready == 0`
    /// and `aicore_done == 0`).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut DispatchPayload {
        unsafe { &mut *self.payload.get() }
    }

    /// # Safety
    ///
    /// Core only, after observing `aicpu_ready == 1` with acquire ordering.
    pub(crate) unsafe fn payload_ref(&self) -> &DispatchPayload {
        unsafe { &*self.payload.get() }
    }
}

/// Worker-core control loop. Runs until the executor sets `control`.
///
/// The done-before-ready read order matters: observing `aicore_done == 0`
/// (acquire) proves the executor's reap also cleared `aicpu_ready`, so a
/// stale ready flag can never re-run the previous task.
pub fn worker_loop(handshake: &Handshake, core_index: usize, registry: &KernelRegistry) {
    handshake.aicore_done.store(core_index as u32 + 1, Ordering::Release);

    loop {
        if handshake.control.load(Ordering::Acquire) == CONTROL_QUIT {
            break;
        }
        if handshake.aicore_done.load(Ordering::Acquire) == 0
            && handshake.aicpu_ready.load(Ordering::Acquire) == 1
        {
            let payload = unsafe { handshake.payload_ref() };
            let status = registry.run(payload.kernel_id, payload.args());
            handshake.task_status.store(status, Ordering::Relaxed);
            handshake.aicore_done.store(1, Ordering::Release);
        } else {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}
