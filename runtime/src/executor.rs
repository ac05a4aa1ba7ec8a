//! Execution side of the runtime: claims ready tasks, drives worker cores
//! through their handshakes, propagates completions and retires the window
//! prefix.
//!
//! Protocol invariants:
//! - a task is claimed with a `Ready → Running` exchange before its payload
//!   is copied into a handshake;
//! - `Done` is stored (SeqCst) *before* the successor walk, pairing with
//!   the orchestrator's link-then-check-status order so a concurrently
//!   added edge is observed by at least one side;
//! - `last_task_alive` advances (release) only over a uniformly-`Done`
//!   prefix whose slots have been reset for reuse.

use std::sync::atomic::Ordering;

use tracing::{debug, trace, warn};

use crate::handshake::{CONTROL_QUIT, Handshake};
use crate::shm::SharedRegion;
use crate::task::{TaskStatus, WorkerKind};

/// Non-zero kernel status reported by a worker core. The failed task keeps
/// its slot and every transitive successor stays `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFailure {
    pub task_id: i32,
    pub status: i32,
}

#[derive(Debug, Default, Clone)]
pub struct ExecutorReport {
    pub dispatched: u64,
    pub retired: u64,
    pub failures: Vec<TaskFailure>,
}

pub struct Executor<'a> {
    region: &'a SharedRegion,
    workers: &'a [Handshake],
    /// First task id not yet retired; mirror of `header.last_task_alive`.
    alive: i32,
    /// Task currently running on each worker core.
    inflight: Vec<Option<i32>>,
    report: ExecutorReport,
}

impl<'a> Executor<'a> {
    pub fn new(region: &'a SharedRegion, workers: &'a [Handshake]) -> Self {
        let alive = region.header().last_task_alive.load(Ordering::Acquire);
        Self {
            region,
            workers,
            alive,
            inflight: vec![None; workers.len()],
            report: ExecutorReport::default(),
        }
    }

    /// Drive the window until the orchestrator has finished and every
    /// submitted task has retired, then quiesce the workers.
    pub fn run(mut self) -> ExecutorReport {
        self.await_workers();
        loop {
            let mut progress = false;
            progress |= self.reap_completions();
            progress |= self.dispatch_ready();
            progress |= self.advance_retirement();

            let header = self.region.header();
            // Done first, then the count: acquiring the done flag makes the
            // orchestrator's final publication visible to the count load.
            let orchestrator_done = header.orchestrator_done.load(Ordering::Acquire) == 1;
            let submitted = header.submitted_count.load(Ordering::Acquire);
            let idle = self.inflight.iter().all(Option::is_none);
            if orchestrator_done && idle && self.alive == submitted {
                break;
            }
            if !progress && idle && !self.report.failures.is_empty() {
                // A failed task pins the window: nothing behind it can
                // retire. Stop instead of spinning on a stall that is, by
                // contract, unrecoverable.
                warn!(failures = self.report.failures.len(), "executor stalled on failed tasks");
                break;
            }
            if !progress {
                std::hint::spin_loop();
                std::thread::yield_now();
            }
        }
        self.shutdown_workers();
        debug!(
            dispatched = self.report.dispatched,
            retired = self.report.retired,
            "executor finished"
        );
        self.report
    }

    /// Wait for each core's startup announcement (`core_index + 1` in
    /// `aicore_done`) and acknowledge it.
    fn await_workers(&self) {
        for (index, handshake) in self.workers.iter().enumerate() {
            while handshake.aicore_done.load(Ordering::Acquire) != index as u32 + 1 {
                std::hint::spin_loop();
                std::thread::yield_now();
            }
            handshake.aicore_done.store(0, Ordering::Release);
        }
    }

    fn shutdown_workers(&self) {
        for handshake in self.workers {
            handshake.control.store(CONTROL_QUIT, Ordering::Release);
        }
    }

    fn idle_worker(&self, kind: WorkerKind) -> Option<usize> {
        self.workers
            .iter()
            .enumerate()
            .find_map(|(i, hs)| (hs.kind() == kind && self.inflight[i].is_none()).then_some(i))
    }

    /// Scan the live range for `Ready` slots and hand them to idle workers
    /// of the matching kind.
    fn dispatch_ready(&mut self) -> bool {
        let submitted = self.region.header().submitted_count.load(Ordering::Acquire);
        let mut progress = false;
        for task_id in self.alive..submitted {
            let slot = self.region.slot(task_id);
            if slot.status() != TaskStatus::Ready {
                continue;
            }
            // SAFETY: task_id < submitted_count was acquired above; the
            // payload is immutable once published.
            let payload = unsafe { slot.payload_ref() };
            let Some(worker_index) = self.idle_worker(payload.worker_kind) else { continue };
            if !slot.transition(TaskStatus::Ready, TaskStatus::Running) {
                continue;
            }

            let handshake = &self.workers[worker_index];
            // SAFETY: the worker is idle — both handshake flags clear.
            unsafe {
                let dispatch = handshake.payload_mut();
                dispatch.task_id = task_id;
                dispatch.kernel_id = payload.function_id;
                dispatch.worker_kind = payload.worker_kind;
                dispatch.function_bin_addr = payload.kernel_addr;
                dispatch.num_args = payload.num_args;
                dispatch.args = payload.args;
            }
            handshake.task_status.store(0, Ordering::Relaxed);
            handshake.aicpu_ready.store(1, Ordering::Release);
            self.inflight[worker_index] = Some(task_id);
            self.report.dispatched += 1;
            trace!(task.id = task_id, worker = worker_index, "task dispatched");
            progress = true;
        }
        progress
    }

    fn reap_completions(&mut self) -> bool {
        let mut progress = false;
        for worker_index in 0..self.workers.len() {
            let Some(task_id) = self.inflight[worker_index] else { continue };
            let handshake = &self.workers[worker_index];
            if handshake.aicore_done.load(Ordering::Acquire) == 0 {
                continue;
            }
            let status = handshake.task_status.load(Ordering::Relaxed);
            // Clear ready before done: the core re-arms only after it sees
            // done == 0, which release/acquire orders after this store.
            handshake.aicpu_ready.store(0, Ordering::Relaxed);
            handshake.aicore_done.store(0, Ordering::Release);
            self.inflight[worker_index] = None;

            if status != 0 {
                self.report.failures.push(TaskFailure { task_id, status });
                debug!(task.id = task_id, status, "task failed");
            } else {
                self.complete_task(task_id);
            }
            progress = true;
        }
        progress
    }

    /// Publish `Done`, then settle every successor edge linked so far.
    fn complete_task(&mut self, task_id: i32) {
        let slot = self.region.slot(task_id);
        debug_assert_eq!(slot.status(), TaskStatus::Running);
        slot.status.store(TaskStatus::Done as u32, Ordering::SeqCst);

        let mut offset = slot.successor_head.load(Ordering::SeqCst);
        while offset >= 0 {
            let node = self.region.dep_node(offset);
            let successor = node.successor.swap(-1, Ordering::AcqRel);
            if successor >= 0 {
                self.satisfy_dependency(successor);
            }
            offset = node.next.load(Ordering::Relaxed);
        }
        trace!(task.id = task_id, "task done");
    }

    fn satisfy_dependency(&self, successor: i32) {
        let slot = self.region.slot(successor);
        if slot.pending_preds.fetch_sub(1, Ordering::SeqCst) == 1 {
            let promoted = slot.transition(TaskStatus::Pending, TaskStatus::Ready);
            debug_assert!(promoted);
        }
    }

    /// Retire the uniformly-`Done` prefix, resetting slots and publishing
    /// the new `last_task_alive`.
    fn advance_retirement(&mut self) -> bool {
        let header = self.region.header();
        let submitted = header.submitted_count.load(Ordering::Acquire);
        let mut progress = false;
        while self.alive < submitted {
            let slot = self.region.slot(self.alive);
            if slot.status() != TaskStatus::Done {
                break;
            }
            slot.retire();
            self.alive += 1;
            self.report.retired += 1;
            header.last_task_alive.store(self.alive, Ordering::Release);
            progress = true;
        }
        if progress {
            trace!(last_task_alive = self.alive, "window advanced");
        }
        progress
    }
}
