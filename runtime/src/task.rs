//! Task window slots, dependency-list nodes and submission parameters.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use veter_tensor::Tensor;

use crate::config::{MAX_ARGS, TASK_LABEL_LEN};

/// Worker core kinds: vector units and cube (matrix) units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::FromRepr, strum::EnumIter)]
#[repr(i32)]
pub enum WorkerKind {
    Vector = 0,
    Cube = 1,
}

/// Lifecycle of a window slot. Transitions are exactly
/// `Empty → Pending → Ready → Running → Done → Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(strum::FromRepr)]
#[repr(u32)]
pub enum TaskStatus {
    Empty = 0,
    Pending = 1,
    Ready = 2,
    Running = 3,
    Done = 4,
}

/// Execution-relevant task fields, written once by the orchestrator before
/// the slot is published.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TaskPayload {
    pub function_id: i32,
    pub worker_kind: WorkerKind,
    pub num_args: i32,
    pub kernel_addr: u64,
    pub args: [u64; MAX_ARGS],
    pub label: [u8; TASK_LABEL_LEN],
}

impl Default for TaskPayload {
    fn default() -> Self {
        Self {
            function_id: -1,
            worker_kind: WorkerKind::Vector,
            num_args: 0,
            kernel_addr: 0,
            args: [0; MAX_ARGS],
            label: [0; TASK_LABEL_LEN],
        }
    }
}

impl TaskPayload {
    pub fn label(&self) -> &str {
        let len = self.label.iter().position(|&b| b == 0).unwrap_or(TASK_LABEL_LEN);
        std::str::from_utf8(&self.label[..len]).unwrap_or("")
    }

    pub(crate) fn set_label(&mut self, label: &str) {
        self.label = [0; TASK_LABEL_LEN];
        let bytes = label.as_bytes();
        let len = bytes.len().min(TASK_LABEL_LEN - 1);
        self.label[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn args(&self) -> &[u64] {
        &self.args[..self.num_args as usize]
    }
}

/// One slot of the bounded task window.
///
/// Ownership is split: the orchestrator writes the payload and the initial
/// counters while the slot is unpublished; after `submitted_count` covers
/// the id, status transitions belong to the executor (plus the
/// orchestrator's satisfy-on-submit decrement for already-retired
/// predecessors).
#[repr(C)]
pub struct TaskSlot {
    pub status: AtomicU32,
    pub pending_preds: AtomicI32,
    /// Head of this task's successor list in the dep pool, or -1.
    pub successor_head: AtomicI32,
    payload: UnsafeCell<TaskPayload>,
}

// Payload access is single-writer before publication and read-only after;
// see `payload_mut`/`payload_ref`.
unsafe impl Sync for TaskSlot {}

impl TaskSlot {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU32::new(TaskStatus::Empty as u32),
            pending_preds: AtomicI32::new(0),
            successor_head: AtomicI32::new(-1),
            payload: UnsafeCell::new(TaskPayload::default()),
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_repr(self.status.load(Ordering::Acquire)).expect("corrupt task status")
    }

    pub(crate) fn store_status(&self, status: TaskStatus, order: Ordering) {
        self.status.store(status as u32, order);
    }

    pub(crate) fn transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.status
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reset a retired slot for reuse. Executor-only, before it advances
    /// `last_task_alive` past this id.
    pub(crate) fn retire(&self) {
        self.successor_head.store(-1, Ordering::Relaxed);
        self.pending_preds.store(0, Ordering::Relaxed);
        self.store_status(TaskStatus::Empty, Ordering::Release);
    }

    /// # Safety
    ///
    /// Caller must be the orchestrator and the slot must not be published
    /// yet (no concurrent reader exists).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut TaskPayload {
        unsafe { &mut *self.payload.get() }
    }

    /// # Safety
    ///
    /// Caller must have observed `submitted_count > id` with acquire
    /// ordering; the payload is immutable from that point on.
    pub(crate) unsafe fn payload_ref(&self) -> &TaskPayload {
        unsafe { &*self.payload.get() }
    }
}

/// Successor-list node in the shared dependency pool.
///
/// `successor` doubles as the claim word: decrementing the successor's
/// pending count requires winning `successor.swap(-1)`, so the executor's
/// completion walk and the orchestrator's satisfy-on-submit path settle
/// each edge exactly once.
#[repr(C)]
pub struct DepNode {
    pub successor: AtomicI32,
    pub next: AtomicI32,
    /// Task whose successor list this node is linked on; the node is
    /// reusable once that task has retired.
    pub owner: AtomicI32,
}

impl DepNode {
    pub(crate) fn new() -> Self {
        Self { successor: AtomicI32::new(-1), next: AtomicI32::new(-1), owner: AtomicI32::new(-1) }
    }
}

/// Task parameter: a closed sum over the four dispatch tags.
///
/// `Output` placeholders (address 0) are allocated from the runtime heap at
/// submission and the address is written back through the caller's
/// descriptor. Each parameter contributes one argument word to the kernel:
/// the tensor's base address, or the raw scalar.
#[derive(Debug)]
pub enum Param<'a> {
    Input(&'a Tensor),
    Output(&'a mut Tensor),
    InOut(&'a Tensor),
    Scalar(u64),
}

impl Param<'_> {
    pub fn tensor(&self) -> Option<&Tensor> {
        match self {
            Param::Input(t) | Param::InOut(t) => Some(t),
            Param::Output(t) => Some(t),
            Param::Scalar(_) => None,
        }
    }

    pub(crate) fn arg_word(&self) -> u64 {
        match self {
            Param::Input(t) | Param::InOut(t) => t.buffer.addr,
            Param::Output(t) => t.buffer.addr,
            Param::Scalar(value) => *value,
        }
    }

    pub(crate) fn tracks_production(&self) -> bool {
        matches!(self, Param::Output(_) | Param::InOut(_))
    }
}
