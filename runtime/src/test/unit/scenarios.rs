//! End-to-end scenarios: orchestrator, executor and simulated worker cores
//! running concurrently against one shared region.

use std::sync::Arc;

use veter_dtype::DType;
use veter_tensor::Tensor;

use crate::test::support::*;
use crate::{
    Executor, Handshake, KernelRegistry, OwnedRegion, Param, Runtime, RuntimeConfig, TaskFailure,
    WorkerKind, worker_loop,
};

/// `(a + b + 1) * (a + b + 2)` with `a = 2`, `b = 3`: every element of the
/// result must equal 42.
#[test]
fn diamond_formula_runs_to_completion() {
    const N: usize = 16384;
    const BYTES: u64 = (N * 4) as u64;
    const HEAP_SIZE: u64 = 256 * 1024;

    let config = small_config();
    let registry = Arc::new(KernelRegistry::new());
    register_kernels(&registry);

    let mut memory = DeviceMemory::new(1 << 20);
    let a_addr = memory.carve(BYTES);
    let b_addr = memory.carve(BYTES);
    let f_addr = memory.carve(BYTES);
    let heap_base = memory.carve(HEAP_SIZE);
    fill_f32(a_addr, N, 2.0);
    fill_f32(b_addr, N, 3.0);

    let owned = OwnedRegion::new(&config, heap_base, HEAP_SIZE).unwrap();
    let region = owned.region();
    let workers =
        [Handshake::new(WorkerKind::Vector), Handshake::new(WorkerKind::Vector)];
    let mut rt = Runtime::new(owned.region(), Arc::clone(&registry), config).unwrap();

    let a = Tensor::external(a_addr, BYTES, DType::Float32, 0).unwrap();
    let b = Tensor::external(b_addr, BYTES, DType::Float32, 0).unwrap();
    let mut f = Tensor::external(f_addr, BYTES, DType::Float32, 0).unwrap();
    let mut c = Tensor::placeholder(BYTES, DType::Float32, 0).unwrap();
    let mut d = Tensor::placeholder(BYTES, DType::Float32, 0).unwrap();
    let mut e = Tensor::placeholder(BYTES, DType::Float32, 0).unwrap();

    let report = std::thread::scope(|scope| {
        for (index, handshake) in workers.iter().enumerate() {
            let registry = Arc::clone(&registry);
            scope.spawn(move || worker_loop(handshake, index, &registry));
        }
        let executor_region = region.clone();
        let executor_workers = &workers;
        let executor =
            scope.spawn(move || Executor::new(&executor_region, executor_workers).run());

        rt.scope(|orch| {
            let n = N as u64;
            orch.submit_task(
                KERNEL_ADD,
                WorkerKind::Vector,
                "kernel_add",
                &mut [
                    Param::Input(&a),
                    Param::Input(&b),
                    Param::Output(&mut c),
                    Param::Scalar(n),
                ],
            )?;
            orch.submit_task(
                KERNEL_ADD_SCALAR,
                WorkerKind::Vector,
                "kernel_add_scalar",
                &mut [
                    Param::Input(&c),
                    Param::Scalar(1.0f32.to_bits() as u64),
                    Param::Output(&mut d),
                    Param::Scalar(n),
                ],
            )?;
            orch.submit_task(
                KERNEL_ADD_SCALAR,
                WorkerKind::Vector,
                "kernel_add_scalar",
                &mut [
                    Param::Input(&c),
                    Param::Scalar(2.0f32.to_bits() as u64),
                    Param::Output(&mut e),
                    Param::Scalar(n),
                ],
            )?;
            orch.submit_task(
                KERNEL_MUL,
                WorkerKind::Vector,
                "kernel_mul",
                &mut [
                    Param::Input(&d),
                    Param::Input(&e),
                    Param::Output(&mut f),
                    Param::Scalar(n),
                ],
            )?;
            Ok(())
        })
        .unwrap();
        rt.set_graph_output(f_addr, BYTES);
        rt.orchestration_done();

        executor.join().unwrap()
    });

    assert_eq!(report.dispatched, 4);
    assert_eq!(report.retired, 4);
    assert!(report.failures.is_empty());

    let result = read_f32(f_addr, N);
    assert!(result.iter().all(|&v| (v - 42.0).abs() < 1e-3), "result {:?}", &result[..8]);

    let header = region.header();
    assert_eq!(header.graph_output_ptr.load(std::sync::atomic::Ordering::Relaxed), f_addr);
    assert_eq!(header.last_task_alive.load(std::sync::atomic::Ordering::Relaxed), 4);
}

/// Twice the window size of independent tasks: slots and tensor-map ring
/// entries must be reclaimed and reused without a stall or fault.
#[test]
fn ring_retirement_reuses_slots() {
    const TASKS: i32 = 40;
    const WINDOW: usize = 16;

    let config = RuntimeConfig::builder()
        .task_window_size(WINDOW)
        .dep_pool_size(64)
        .tensormap_buckets(16)
        .tensormap_pool_size(16)
        .cleanup_interval(4)
        .build();
    let registry = Arc::new(KernelRegistry::new());
    register_kernels(&registry);

    let mut memory = DeviceMemory::new(1 << 20);
    let buffers: Vec<u64> = (0..TASKS).map(|_| memory.carve(1024)).collect();

    let owned = OwnedRegion::new(&config, 0, 0).unwrap();
    let region = owned.region();
    let workers = [Handshake::new(WorkerKind::Vector)];
    let mut rt = Runtime::new(owned.region(), Arc::clone(&registry), config).unwrap();

    let report = std::thread::scope(|scope| {
        let worker = &workers[0];
        let worker_registry = Arc::clone(&registry);
        scope.spawn(move || worker_loop(worker, 0, &worker_registry));
        let executor_region = region.clone();
        let executor_workers = &workers;
        let executor =
            scope.spawn(move || Executor::new(&executor_region, executor_workers).run());

        rt.scope(|orch| {
            for &addr in &buffers {
                let mut out = Tensor::external(addr, 1024, DType::Float32, 0).unwrap();
                orch.submit_task(
                    KERNEL_NOOP,
                    WorkerKind::Vector,
                    "noop",
                    &mut [Param::Output(&mut out)],
                )?;
            }
            Ok(())
        })
        .unwrap();
        rt.orchestration_done();
        executor.join().unwrap()
    });

    assert_eq!(report.retired, TASKS as u64);
    assert!(report.failures.is_empty());

    // All producers have retired; after a final sync the map holds no valid
    // entries and its chains are still ordered.
    let orch = rt.orchestrator();
    orch.sync_tensormap();
    assert!(orch.tensor_map_mut().bucket_order_holds());
    let hits = orch
        .tensor_map_mut()
        .lookup(&Tensor::external(buffers[0], 1024, DType::Float32, 0).unwrap());
    assert!(hits.is_empty());
}

/// Mixed worker kinds: cube tasks only run on cube cores.
#[test]
fn dispatch_respects_worker_kind() {
    const N: usize = 64;
    const BYTES: u64 = (N * 4) as u64;

    let config = small_config();
    let registry = Arc::new(KernelRegistry::new());
    register_kernels(&registry);

    let mut memory = DeviceMemory::new(1 << 16);
    let src = memory.carve(BYTES);
    let dst = memory.carve(BYTES);
    fill_f32(src, N, 20.0);

    let owned = OwnedRegion::new(&config, 0, 0).unwrap();
    let region = owned.region();
    let workers = [Handshake::new(WorkerKind::Vector), Handshake::new(WorkerKind::Cube)];
    let mut rt = Runtime::new(owned.region(), Arc::clone(&registry), config).unwrap();

    let a = Tensor::external(src, BYTES, DType::Float32, 0).unwrap();
    let mut out = Tensor::external(dst, BYTES, DType::Float32, 0).unwrap();

    let report = std::thread::scope(|scope| {
        for (index, handshake) in workers.iter().enumerate() {
            let registry = Arc::clone(&registry);
            scope.spawn(move || worker_loop(handshake, index, &registry));
        }
        let executor_region = region.clone();
        let executor_workers = &workers;
        let executor =
            scope.spawn(move || Executor::new(&executor_region, executor_workers).run());

        rt.scope(|orch| {
            orch.submit_task(
                KERNEL_MUL,
                WorkerKind::Cube,
                "cube_mul",
                &mut [
                    Param::Input(&a),
                    Param::Input(&a),
                    Param::Output(&mut out),
                    Param::Scalar(N as u64),
                ],
            )?;
            Ok(())
        })
        .unwrap();
        rt.orchestration_done();
        executor.join().unwrap()
    });

    assert_eq!(report.retired, 1);
    assert!(read_f32(dst, N).iter().all(|&v| v == 400.0));
}

/// A dependency recorded against a producer that already retired must be
/// satisfied at submission time, not left pending forever.
#[test]
fn dependency_on_retired_predecessor_is_satisfied_at_submit() {
    let config = small_config();
    let registry = Arc::new(KernelRegistry::new());
    register_kernels(&registry);

    let mut memory = DeviceMemory::new(1 << 16);
    let buf = memory.carve(1024);

    let owned = OwnedRegion::new(&config, 0, 0).unwrap();
    let region = owned.region();
    let workers = [Handshake::new(WorkerKind::Vector)];
    let mut rt = Runtime::new(owned.region(), Arc::clone(&registry), config).unwrap();

    let mut out = Tensor::external(buf, 1024, DType::Float32, 0).unwrap();
    let reader = Tensor::external(buf, 1024, DType::Float32, 0).unwrap();

    let report = std::thread::scope(|scope| {
        let worker = &workers[0];
        let worker_registry = Arc::clone(&registry);
        scope.spawn(move || worker_loop(worker, 0, &worker_registry));
        let executor_region = region.clone();
        let executor_workers = &workers;
        let executor =
            scope.spawn(move || Executor::new(&executor_region, executor_workers).run());

        rt.scope(|orch| {
            orch.submit_task(KERNEL_NOOP, WorkerKind::Vector, "first", &mut [Param::Output(
                &mut out,
            )])?;
            Ok(())
        })
        .unwrap();

        // Wait until the producer has fully retired before submitting the
        // consumer; its tensor-map entry is still cached as valid, so the
        // edge is linked against an emptied slot.
        while region.header().last_task_alive.load(std::sync::atomic::Ordering::Acquire) < 1 {
            std::thread::yield_now();
        }

        rt.scope(|orch| {
            orch.submit_task(KERNEL_NOOP, WorkerKind::Vector, "second", &mut [Param::InOut(
                &reader,
            )])?;
            Ok(())
        })
        .unwrap();
        rt.orchestration_done();
        executor.join().unwrap()
    });

    assert_eq!(report.retired, 2);
    assert!(report.failures.is_empty());
}

/// A non-zero kernel status is surfaced per task; nothing downstream runs.
#[test]
fn worker_failure_stalls_by_design() {
    let config = small_config();
    let registry = Arc::new(KernelRegistry::new());
    registry.register(9, |_| 7);

    let mut memory = DeviceMemory::new(1 << 16);
    let buf = memory.carve(1024);

    let owned = OwnedRegion::new(&config, 0, 0).unwrap();
    let region = owned.region();
    let workers = [Handshake::new(WorkerKind::Vector)];
    let mut rt = Runtime::new(owned.region(), Arc::clone(&registry), config).unwrap();

    let mut out = Tensor::external(buf, 1024, DType::Float32, 0).unwrap();
    let reader = Tensor::external(buf, 1024, DType::Float32, 0).unwrap();

    let report = std::thread::scope(|scope| {
        let worker = &workers[0];
        let worker_registry = Arc::clone(&registry);
        scope.spawn(move || worker_loop(worker, 0, &worker_registry));
        let executor_region = region.clone();
        let executor_workers = &workers;
        let executor =
            scope.spawn(move || Executor::new(&executor_region, executor_workers).run());

        rt.scope(|orch| {
            orch.submit_task(9, WorkerKind::Vector, "boom", &mut [Param::Output(&mut out)])?;
            orch.submit_task(9, WorkerKind::Vector, "after", &mut [Param::InOut(&reader)])?;
            Ok(())
        })
        .unwrap();
        rt.orchestration_done();
        executor.join().unwrap()
    });

    assert_eq!(report.failures, vec![TaskFailure { task_id: 0, status: 7 }]);
    assert_eq!(report.retired, 0);
    // The dependent task never left Pending.
    assert_eq!(status_of(&region, 1), crate::TaskStatus::Pending);
}
