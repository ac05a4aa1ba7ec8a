//! Hash index of recent producers with ring-buffer storage and lazy
//! invalidation.
//!
//! Buckets are selected by the buffer's base address only, so every access
//! pattern over one buffer lands in the same chain and can be compared for
//! overlap. Entries live in a fixed ring pool; a slot is reclaimed when its
//! producer task retires, either lazily (chain truncation during lookup) or
//! eagerly (`cleanup_retired` batches over a task's entry list).
//!
//! Chain invariant: producers are prepended, so within a bucket
//! `producer_task_id` strictly decreases from head to tail. The first stale
//! entry found during a walk therefore proves the whole tail stale, and the
//! chain is cut there.

use smallvec::SmallVec;
use tracing::trace;

use veter_tensor::{OverlapStatus, Tensor};

use crate::config::RuntimeConfig;
use crate::error::*;

#[derive(Debug, Clone)]
pub(crate) struct MapEntry {
    pub tensor: Tensor,
    pub producer_task_id: i32,
    /// The producer's output was heap-allocated by the runtime.
    pub with_alloc: bool,
    pub in_bucket: bool,
    pub next_in_bucket: i32,
    pub prev_in_bucket: i32,
    pub next_in_task: i32,
    pub prev_in_task: i32,
}

impl Default for MapEntry {
    fn default() -> Self {
        Self {
            tensor: Tensor::default(),
            producer_task_id: -1,
            with_alloc: false,
            in_bucket: false,
            next_in_bucket: -1,
            prev_in_bucket: -1,
            next_in_task: -1,
            prev_in_task: -1,
        }
    }
}

/// Producers found overlapping a lookup tensor.
pub type LookupHits = SmallVec<[(i32, OverlapStatus); 8]>;

#[derive(Debug)]
pub struct TensorMap {
    buckets: Box<[i32]>,
    pool: Box<[MapEntry]>,
    /// Head of each live task's entry list, indexed by `task_id mod window`.
    task_entry_head: Box<[i32]>,
    pool_head: usize,
    window_mask: i32,
    last_task_alive: i32,
}

/// Occupancy snapshot, for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TensorMapStats {
    pub valid_entries: usize,
    pub stale_entries: usize,
    pub empty_buckets: usize,
    pub max_chain_len: usize,
}

impl TensorMap {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buckets: vec![-1; config.tensormap_buckets].into_boxed_slice(),
            pool: vec![MapEntry::default(); config.tensormap_pool_size].into_boxed_slice(),
            task_entry_head: vec![-1; config.task_window_size].into_boxed_slice(),
            pool_head: 0,
            window_mask: config.task_window_size as i32 - 1,
            last_task_alive: 0,
        })
    }

    /// Bucket for a tensor. Hashes the base address only — never the offset
    /// or dtype — so overlapping regions share a chain. High bits are mixed
    /// down because device addresses have aligned low bits.
    fn bucket_of(&self, tensor: &Tensor) -> usize {
        let mut key = tensor.buffer.addr;
        key ^= key >> 16;
        key ^= key >> 32;
        (key & (self.buckets.len() as u64 - 1)) as usize
    }

    /// An entry describes live state iff its producer has not retired.
    fn entry_valid(&self, entry: &MapEntry) -> bool {
        entry.producer_task_id >= self.last_task_alive
    }

    /// True when the next ring slot can be taken without clobbering a live
    /// entry. When false the caller must make the executor progress (sync
    /// validity, cleanup) and retry.
    pub fn can_insert(&self) -> bool {
        !self.pool[self.pool_head].in_bucket
    }

    /// Record `producer_task_id` as the producer of `tensor`'s bytes.
    /// Prepends to the bucket chain and to the task's entry list.
    pub fn insert(&mut self, tensor: &Tensor, producer_task_id: i32, with_alloc: bool) {
        assert!(self.can_insert(), "tensor map ring slot still live; sync before inserting");
        let index = self.pool_head as i32;
        self.pool_head = (self.pool_head + 1) % self.pool.len();

        let bucket = self.bucket_of(tensor);
        let bucket_head = self.buckets[bucket];
        let task_slot = (producer_task_id & self.window_mask) as usize;
        let task_head = self.task_entry_head[task_slot];

        {
            let entry = &mut self.pool[index as usize];
            entry.tensor = tensor.clone();
            entry.producer_task_id = producer_task_id;
            entry.with_alloc = with_alloc;
            entry.in_bucket = true;
            entry.next_in_bucket = bucket_head;
            entry.prev_in_bucket = -1;
            entry.next_in_task = task_head;
            entry.prev_in_task = -1;
        }
        if bucket_head >= 0 {
            self.pool[bucket_head as usize].prev_in_bucket = index;
        }
        self.buckets[bucket] = index;
        if task_head >= 0 {
            self.pool[task_head as usize].prev_in_task = index;
        }
        self.task_entry_head[task_slot] = index;

        trace!(producer = producer_task_id, bucket, entry = index, "tensor map insert");
    }

    /// Collect every valid producer whose recorded tensor overlaps `tensor`.
    ///
    /// Walking stops at the first stale entry: all further entries were
    /// inserted earlier and are stale too, so the tail is unlinked from the
    /// bucket wholesale.
    pub fn lookup(&mut self, tensor: &Tensor) -> LookupHits {
        let bucket = self.bucket_of(tensor);
        let mut hits = LookupHits::new();
        let mut prev: i32 = -1;
        let mut offset = self.buckets[bucket];

        while offset >= 0 {
            let entry = &self.pool[offset as usize];
            if !self.entry_valid(entry) {
                if prev < 0 {
                    self.buckets[bucket] = -1;
                } else {
                    self.pool[prev as usize].next_in_bucket = -1;
                }
                let mut stale = offset;
                while stale >= 0 {
                    let e = &mut self.pool[stale as usize];
                    let next = e.next_in_bucket;
                    e.in_bucket = false;
                    e.next_in_bucket = -1;
                    e.prev_in_bucket = -1;
                    stale = next;
                }
                return hits;
            }

            let status = tensor.overlap(&entry.tensor);
            if status != OverlapStatus::NoOverlap {
                hits.push((entry.producer_task_id, status));
            }
            prev = offset;
            offset = entry.next_in_bucket;
        }
        hits
    }

    /// Move the validity threshold forward.
    pub fn sync_validity(&mut self, last_task_alive: i32) {
        debug_assert!(last_task_alive >= self.last_task_alive);
        self.last_task_alive = last_task_alive;
    }

    pub fn last_task_alive(&self) -> i32 {
        self.last_task_alive
    }

    /// Unlink every entry of the tasks in `[old, new)` from their buckets
    /// and clear the tasks' entry lists. An entry is only unlinked if it
    /// still records the retiring task: the ring may have handed its slot
    /// to a newer producer already.
    pub fn cleanup_retired(&mut self, old_last_task_alive: i32, new_last_task_alive: i32) {
        for task_id in old_last_task_alive..new_last_task_alive {
            let task_slot = (task_id & self.window_mask) as usize;
            let mut offset = self.task_entry_head[task_slot];
            while offset >= 0 {
                let next = self.pool[offset as usize].next_in_task;
                if self.pool[offset as usize].producer_task_id == task_id {
                    self.remove_from_bucket(offset);
                    let entry = &mut self.pool[offset as usize];
                    entry.next_in_task = -1;
                    entry.prev_in_task = -1;
                }
                offset = next;
            }
            self.task_entry_head[task_slot] = -1;
        }
        trace!(
            old = old_last_task_alive,
            new = new_last_task_alive,
            "tensor map retired cleanup"
        );
    }

    fn remove_from_bucket(&mut self, index: i32) {
        let (prev, next, in_bucket) = {
            let entry = &self.pool[index as usize];
            (entry.prev_in_bucket, entry.next_in_bucket, entry.in_bucket)
        };
        if !in_bucket {
            return;
        }
        if prev < 0 {
            let bucket = self.bucket_of(&self.pool[index as usize].tensor);
            self.buckets[bucket] = next;
        } else {
            self.pool[prev as usize].next_in_bucket = next;
        }
        if next >= 0 {
            self.pool[next as usize].prev_in_bucket = prev;
        }
        let entry = &mut self.pool[index as usize];
        entry.in_bucket = false;
        entry.next_in_bucket = -1;
        entry.prev_in_bucket = -1;
    }

    pub fn valid_count(&self) -> usize {
        self.pool.iter().filter(|e| e.in_bucket && self.entry_valid(e)).count()
    }

    pub fn stats(&self) -> TensorMapStats {
        let mut stats = TensorMapStats::default();
        for entry in &self.pool {
            if entry.in_bucket {
                if self.entry_valid(entry) {
                    stats.valid_entries += 1;
                } else {
                    stats.stale_entries += 1;
                }
            }
        }
        for &head in &self.buckets {
            let mut len = 0;
            let mut offset = head;
            while offset >= 0 {
                len += 1;
                offset = self.pool[offset as usize].next_in_bucket;
            }
            if len == 0 {
                stats.empty_buckets += 1;
            }
            stats.max_chain_len = stats.max_chain_len.max(len);
        }
        stats
    }

    /// Every bucket chain keeps strictly decreasing producer ids.
    #[cfg(test)]
    pub(crate) fn bucket_order_holds(&self) -> bool {
        self.buckets.iter().all(|&head| {
            let mut offset = head;
            let mut last = i32::MAX;
            while offset >= 0 {
                let entry = &self.pool[offset as usize];
                if entry.producer_task_id >= last {
                    return false;
                }
                last = entry.producer_task_id;
                offset = entry.next_in_bucket;
            }
            true
        })
    }
}
