//! Submission side of the runtime: dependency inference, window admission,
//! output allocation and publication.
//!
//! The orchestrator is single-threaded and cooperative. It suspends only by
//! spinning at three points — task window full, tensor map pool full,
//! dependency pool full — each time re-reading `last_task_alive` so the
//! executor's progress unblocks it. A bounded-iteration watchdog turns a
//! stuck spin into a fatal assertion.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tracing::debug;
use veter_tensor::{OverlapStatus, Tensor};

use crate::config::{MAX_ARGS, OUTPUT_ALLOC_ALIGN, RuntimeConfig, WATCHDOG_SPIN_LIMIT};
use crate::error::*;
use crate::heap::Heap;
use crate::kernel::KernelRegistry;
use crate::shm::SharedRegion;
use crate::task::{Param, TaskStatus, WorkerKind};
use crate::tensormap::TensorMap;

pub struct Orchestrator {
    region: SharedRegion,
    registry: Arc<KernelRegistry>,
    heap: Heap,
    tensor_map: TensorMap,
    config: RuntimeConfig,
    /// Next task id; mirrors `header.submitted_count` between publications.
    submitted: i32,
    /// Ring cursor into the dependency pool.
    dep_head: usize,
    /// Acquire-cached `header.last_task_alive`.
    last_alive: i32,
    tensormap_last_cleanup: i32,
}

impl Orchestrator {
    pub fn new(
        region: SharedRegion,
        registry: Arc<KernelRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        config.validate()?;
        debug_assert_eq!(region.window_size(), config.task_window_size);
        let header = region.header();
        let heap = Heap::new(header.heap_base_ptr, header.heap_size);
        let tensor_map = TensorMap::new(&config)?;
        let submitted = header.submitted_count.load(Ordering::Acquire);
        let last_alive = header.last_task_alive.load(Ordering::Acquire);
        Ok(Self {
            region,
            registry,
            heap,
            tensor_map,
            config,
            submitted,
            dep_head: 0,
            last_alive,
            tensormap_last_cleanup: last_alive,
        })
    }

    /// Submit one task. Infers predecessors from tensor overlap against
    /// recent producers, allocates placeholder outputs from the heap
    /// (writing addresses back through the caller's descriptors), fills the
    /// window slot, links successor edges, records this task's outputs and
    /// publishes the slot with a release increment of `submitted_count`.
    pub fn submit_task(
        &mut self,
        function_id: i32,
        worker_kind: WorkerKind,
        label: &str,
        params: &mut [Param<'_>],
    ) -> Result<i32> {
        ensure!(!params.is_empty(), EmptySubmitSnafu);
        ensure!(
            params.len() <= MAX_ARGS,
            TooManyParamsSnafu { count: params.len(), max: MAX_ARGS }
        );
        let kernel_addr =
            self.registry.gm_addr(function_id).context(UnknownFunctionSnafu { function_id })?;

        let task_id = self.submitted;
        self.wait_for_window(task_id);

        // Validate every param before touching the heap: a rejected
        // submission must not leave allocations behind.
        for (index, param) in params.iter().enumerate() {
            if let Param::Input(tensor) | Param::InOut(tensor) = param {
                ensure!(tensor.buffer.addr != 0, NullParamSnafu { index });
            }
        }

        let mut with_alloc = [false; MAX_ARGS];
        let heap_mark = self.heap.used();
        for (index, param) in params.iter_mut().enumerate() {
            if let Param::Output(tensor) = param
                && tensor.buffer.addr == 0
            {
                match self.heap.alloc(tensor.buffer.size, OUTPUT_ALLOC_ALIGN) {
                    Ok(addr) => {
                        tensor.fill_addr(addr);
                        with_alloc[index] = true;
                    }
                    Err(error) => {
                        // Release the partial allocations of this call; the
                        // addresses already written back are dead.
                        self.heap.rewind(heap_mark);
                        return Err(error);
                    }
                }
            }
        }

        // Unique producers overlapping any tensor parameter. A covered
        // overlap on a pure output still orders behind the producer: the
        // write-after-write edge keeps retirement in program order.
        let mut preds: SmallVec<[i32; 16]> = SmallVec::new();
        for param in params.iter() {
            let Some(tensor) = param.tensor() else { continue };
            for (producer, status) in self.tensor_map.lookup(tensor) {
                debug_assert_ne!(status, OverlapStatus::NoOverlap);
                if !preds.contains(&producer) {
                    preds.push(producer);
                }
            }
        }

        let slot = self.region.slot(task_id);
        debug_assert_eq!(slot.status(), TaskStatus::Empty);
        // SAFETY: the slot is unpublished; this thread is the only writer.
        unsafe {
            let payload = slot.payload_mut();
            payload.function_id = function_id;
            payload.worker_kind = worker_kind;
            payload.kernel_addr = kernel_addr;
            payload.num_args = params.len() as i32;
            for (i, param) in params.iter().enumerate() {
                payload.args[i] = param.arg_word();
            }
            payload.set_label(label);
        }
        slot.pending_preds.store(preds.len() as i32, Ordering::Relaxed);
        slot.successor_head.store(-1, Ordering::Relaxed);
        slot.store_status(TaskStatus::Pending, Ordering::Relaxed);

        for &pred in &preds {
            self.link_dependency(pred, task_id);
        }
        if preds.is_empty() {
            let promoted =
                self.region.slot(task_id).transition(TaskStatus::Pending, TaskStatus::Ready);
            debug_assert!(promoted);
        }

        for (index, param) in params.iter().enumerate() {
            if param.tracks_production() {
                let tensor = param.tensor().expect("production param carries a tensor");
                self.insert_producer(tensor, task_id, with_alloc[index]);
            }
        }

        self.submitted += 1;
        self.region.header().submitted_count.store(self.submitted, Ordering::Release);
        debug!(task.id = task_id, task.label = label, deps = preds.len(), "task submitted");
        Ok(task_id)
    }

    /// Push a heap scope; intermediate outputs allocated inside it are
    /// released by the matching [`Self::scope_end`].
    pub fn scope_begin(&mut self) {
        self.heap.scope_begin();
    }

    /// Pop the innermost heap scope. Caller contract: every producer that
    /// wrote into the scope's allocations has retired, or will retire
    /// before the memory is reused.
    pub fn scope_end(&mut self) -> Result<()> {
        self.heap.scope_end()
    }

    /// Signal that no further tasks will be submitted.
    pub fn orchestration_done(&self) {
        self.region.header().orchestrator_done.store(1, Ordering::Release);
    }

    /// Record the graph's result buffer for the host.
    pub fn set_graph_output(&self, addr: u64, size: u64) {
        let header = self.region.header();
        header.graph_output_ptr.store(addr, Ordering::Relaxed);
        header.graph_output_size.store(size, Ordering::Relaxed);
    }

    pub fn submitted_count(&self) -> i32 {
        self.submitted
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn tensor_map(&self) -> &TensorMap {
        &self.tensor_map
    }

    #[cfg(test)]
    pub(crate) fn tensor_map_mut(&mut self) -> &mut TensorMap {
        &mut self.tensor_map
    }

    /// Re-read executor progress: refresh the validity threshold and run
    /// the periodic eager cleanup of retired producers.
    pub fn sync_tensormap(&mut self) {
        let alive = self.region.header().last_task_alive.load(Ordering::Acquire);
        self.last_alive = alive;
        self.tensor_map.sync_validity(alive);
        if alive - self.tensormap_last_cleanup >= self.config.cleanup_interval {
            self.tensor_map.cleanup_retired(self.tensormap_last_cleanup, alive);
            self.tensormap_last_cleanup = alive;
        }
    }

    /// Admission control: task `id` needs slot `id mod window`, free once
    /// `id - last_task_alive < window`.
    fn wait_for_window(&mut self, task_id: i32) {
        let window = self.region.window_size() as i32;
        let mut spins: u64 = 0;
        while task_id - self.last_alive >= window {
            self.sync_tensormap();
            spins += 1;
            assert!(spins <= WATCHDOG_SPIN_LIMIT, "task window stalled admitting task {task_id}");
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Prepend a successor edge `pred → task_id` to the predecessor's list.
    ///
    /// The SeqCst head-store / status-load pair mirrors the executor's
    /// Done-store / head-load: whichever side misses the other's write is
    /// guaranteed to see its flag, and the node's claim swap settles the
    /// edge exactly once.
    fn link_dependency(&mut self, pred: i32, task_id: i32) {
        let node_index = self.alloc_dep_node(pred);
        let node = self.region.dep_node(node_index);
        node.successor.store(task_id, Ordering::Relaxed);

        let pred_slot = self.region.slot(pred);
        node.next.store(pred_slot.successor_head.load(Ordering::Relaxed), Ordering::Relaxed);
        pred_slot.successor_head.store(node_index, Ordering::SeqCst);

        let status = pred_slot.status.load(Ordering::SeqCst);
        if status == TaskStatus::Done as u32 || status == TaskStatus::Empty as u32 {
            // Predecessor completed (Empty: already retired) before the
            // executor could see this edge; settle it here.
            if node.successor.swap(-1, Ordering::AcqRel) == task_id {
                self.satisfy_dependency(task_id);
            }
        }
    }

    fn satisfy_dependency(&self, successor: i32) {
        let slot = self.region.slot(successor);
        if slot.pending_preds.fetch_sub(1, Ordering::SeqCst) == 1 {
            let promoted = slot.transition(TaskStatus::Pending, TaskStatus::Ready);
            debug_assert!(promoted);
        }
    }

    /// Take the next dependency-pool slot, spinning while its previous
    /// owner is still alive.
    fn alloc_dep_node(&mut self, owner: i32) -> i32 {
        let mut spins: u64 = 0;
        loop {
            let index = self.dep_head;
            let node = self.region.dep_node(index as i32);
            if node.owner.load(Ordering::Relaxed) < self.last_alive {
                node.owner.store(owner, Ordering::Relaxed);
                self.dep_head = (self.dep_head + 1) % self.region.dep_pool_size();
                return index as i32;
            }
            self.sync_tensormap();
            spins += 1;
            assert!(spins <= WATCHDOG_SPIN_LIMIT, "dependency pool stalled");
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }

    /// Record a produced tensor, spinning while the ring's reuse slot still
    /// holds a live entry.
    fn insert_producer(&mut self, tensor: &Tensor, task_id: i32, with_alloc: bool) {
        let mut spins: u64 = 0;
        while !self.tensor_map.can_insert() {
            self.sync_tensormap();
            spins += 1;
            assert!(spins <= WATCHDOG_SPIN_LIMIT, "tensor map pool stalled");
            std::hint::spin_loop();
            std::thread::yield_now();
        }
        self.tensor_map.insert(tensor, task_id, with_alloc);
    }
}
