//! Shared-memory layout: header, task window and dependency pool.
//!
//! The cross-core region is a single byte range laid out as
//! `SharedHeader | task_window[] | dep_list_pool[]`, each section 64-byte
//! aligned. `submitted_count` and `last_task_alive` are the only cross-core
//! atomics; everything else is either written once during initialization or
//! owned by a single core at a time.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU64};

use snafu::ensure;

use crate::config::RuntimeConfig;
use crate::error::*;
use crate::task::{DepNode, TaskSlot};

const SECTION_ALIGN: usize = 64;

/// Header at offset zero of the shared region. Field order and sizes are
/// part of the device ABI; counters are 32-bit.
#[repr(C)]
pub struct SharedHeader {
    /// Tasks published by the orchestrator (release; executor acquires).
    pub submitted_count: AtomicI32,
    /// First task id not yet retired (executor releases; orchestrator
    /// acquires). Monotonic, `last_task_alive <= submitted_count`.
    pub last_task_alive: AtomicI32,
    /// Set to 1 once the orchestrator has published its final task.
    pub orchestrator_done: AtomicI32,
    _reserved: i32,
    pub graph_output_ptr: AtomicU64,
    pub graph_output_size: AtomicU64,
    pub window_base_ptr: u64,
    pub dep_pool_base_ptr: u64,
    pub heap_base_ptr: u64,
    pub heap_size: u64,
    pub task_window_size: i32,
    pub dep_pool_size: i32,
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Typed view over an initialized shared region. Cheap to clone; the caller
/// keeps the backing memory alive for as long as any view exists.
#[derive(Clone)]
pub struct SharedRegion {
    header: NonNull<SharedHeader>,
    window: NonNull<TaskSlot>,
    dep_pool: NonNull<DepNode>,
    window_size: usize,
    dep_pool_size: usize,
}

// All shared mutation goes through atomics or the documented single-writer
// payload cells.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Bytes required for a region with the given capacities.
    pub fn required_size(task_window_size: usize, dep_pool_size: usize) -> usize {
        let header_end = align_up(size_of::<SharedHeader>(), SECTION_ALIGN);
        let window_end =
            align_up(header_end + task_window_size * size_of::<TaskSlot>(), SECTION_ALIGN);
        align_up(window_end + dep_pool_size * size_of::<DepNode>(), SECTION_ALIGN)
    }

    /// Initialize a region in `[ptr, ptr + len)` and return a view of it.
    ///
    /// `heap` is the device heap range recorded in the header for the
    /// orchestrator's output allocations; it lives outside this region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes, unaliased by
    /// any other live reference, and must outlive every clone of the
    /// returned view.
    pub unsafe fn from_raw(
        ptr: *mut u8,
        len: usize,
        config: &RuntimeConfig,
        heap_base: u64,
        heap_size: u64,
    ) -> Result<Self> {
        config.validate()?;
        let need = Self::required_size(config.task_window_size, config.dep_pool_size);
        ensure!(len >= need, RegionTooSmallSnafu { got: len, need });
        ensure!(
            ptr as usize % SECTION_ALIGN == 0,
            RegionMisalignedSnafu { align: SECTION_ALIGN }
        );

        let header_end = align_up(size_of::<SharedHeader>(), SECTION_ALIGN);
        let window_ptr = unsafe { ptr.add(header_end) }.cast::<TaskSlot>();
        let window_end =
            align_up(header_end + config.task_window_size * size_of::<TaskSlot>(), SECTION_ALIGN);
        let dep_ptr = unsafe { ptr.add(window_end) }.cast::<DepNode>();

        let header_ptr = ptr.cast::<SharedHeader>();
        unsafe {
            header_ptr.write(SharedHeader {
                submitted_count: AtomicI32::new(0),
                last_task_alive: AtomicI32::new(0),
                orchestrator_done: AtomicI32::new(0),
                _reserved: 0,
                graph_output_ptr: AtomicU64::new(0),
                graph_output_size: AtomicU64::new(0),
                window_base_ptr: window_ptr as u64,
                dep_pool_base_ptr: dep_ptr as u64,
                heap_base_ptr: heap_base,
                heap_size,
                task_window_size: config.task_window_size as i32,
                dep_pool_size: config.dep_pool_size as i32,
            });
            for i in 0..config.task_window_size {
                window_ptr.add(i).write(TaskSlot::new());
            }
            for i in 0..config.dep_pool_size {
                dep_ptr.add(i).write(DepNode::new());
            }
        }

        Ok(Self {
            header: NonNull::new(header_ptr).expect("null region pointer"),
            window: NonNull::new(window_ptr).expect("null window pointer"),
            dep_pool: NonNull::new(dep_ptr).expect("null dep pool pointer"),
            window_size: config.task_window_size,
            dep_pool_size: config.dep_pool_size,
        })
    }

    pub fn header(&self) -> &SharedHeader {
        unsafe { self.header.as_ref() }
    }

    /// Window slot for a task id (`id mod window`).
    pub fn slot(&self, task_id: i32) -> &TaskSlot {
        debug_assert!(task_id >= 0);
        let index = task_id as usize & (self.window_size - 1);
        unsafe { self.window.add(index).as_ref() }
    }

    pub fn dep_node(&self, index: i32) -> &DepNode {
        debug_assert!((0..self.dep_pool_size as i32).contains(&index));
        unsafe { self.dep_pool.add(index as usize).as_ref() }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn dep_pool_size(&self) -> usize {
        self.dep_pool_size
    }
}

/// Shared region backed by an owned, aligned allocation. In-process hosts
/// (tests, the simulator) use this in place of a device-mapped range.
pub struct OwnedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
    region: SharedRegion,
}

impl OwnedRegion {
    pub fn new(config: &RuntimeConfig, heap_base: u64, heap_size: u64) -> Result<Self> {
        let size = SharedRegion::required_size(config.task_window_size, config.dep_pool_size);
        let layout = Layout::from_size_align(size, SECTION_ALIGN).expect("region layout");
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout));
        let region =
            unsafe { SharedRegion::from_raw(ptr.as_ptr(), size, config, heap_base, heap_size) }?;
        Ok(Self { ptr, layout, region })
    }

    pub fn region(&self) -> SharedRegion {
        self.region.clone()
    }
}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
