//! Device-side orchestration runtime for a heterogeneous accelerator.
//!
//! A host-compiled program running on the scheduler core issues
//! [`Orchestrator::submit_task`] calls whose parameters carry strided
//! [`veter_tensor::Tensor`] descriptors. The runtime infers the task DAG
//! from tensor overlap (via the [`TensorMap`] index of recent producers),
//! allocates intermediate outputs from a scope-anchored bump [`Heap`],
//! admits tasks into a bounded window in shared memory, and hands ready
//! tasks to vector/cube worker cores through per-core [`Handshake`]
//! buffers driven by the [`Executor`].
//!
//! Cross-core coordination uses two atomics in the [`shm::SharedHeader`]:
//! `submitted_count` (orchestrator releases, executor acquires) and
//! `last_task_alive` (the mirror discipline). Everything else in the
//! region is either written once before publication or owned by a single
//! core at a time.

pub mod config;
pub mod error;
pub mod executor;
pub mod handshake;
pub mod heap;
pub mod kernel;
pub mod orchestrator;
pub mod runtime;
pub mod shm;
pub mod task;
pub mod tensormap;

#[cfg(test)]
pub mod test;

pub use config::{MAX_ARGS, OUTPUT_ALLOC_ALIGN, RuntimeConfig, TASK_LABEL_LEN};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorReport, TaskFailure};
pub use handshake::{CONTROL_QUIT, DispatchPayload, Handshake, worker_loop};
pub use heap::Heap;
pub use kernel::{KernelFn, KernelRegistry};
pub use orchestrator::Orchestrator;
pub use runtime::Runtime;
pub use shm::{OwnedRegion, SharedRegion};
pub use task::{Param, TaskPayload, TaskStatus, WorkerKind};
pub use tensormap::{TensorMap, TensorMapStats};
