use crate::descriptor::Tensor;
use crate::iter::ContiguousSegments;
use crate::segment::Segment;

/// How aggressively a producer's footprint is compared against later
/// accesses. `Fuzzy` collapses the pattern to its enclosing byte interval;
/// any intersection then reads as an overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    #[default]
    Accurate,
    Fuzzy,
}

/// Relation between a reader's and a prior producer's reachable byte sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapStatus {
    /// Disjoint byte sets, or different base buffers.
    NoOverlap,
    /// The reader's byte set contains the producer's entirely.
    Covered,
    /// The sets intersect without the reader covering the producer, or the
    /// comparison was degraded (fuzzy producer, newer reader generation).
    Other,
}

pub mod path_tracker {
    //! Per-thread counter recording invocations of the segment-walking
    //! fallback, so tests can assert the cheap paths short-circuited.

    use std::cell::Cell;

    thread_local! {
        static COMPLEX_CALLS: Cell<usize> = const { Cell::new(0) };
    }

    pub fn reset() {
        COMPLEX_CALLS.with(|calls| calls.set(0));
    }

    pub fn complex_calls() -> usize {
        COMPLEX_CALLS.with(Cell::get)
    }

    pub(crate) fn record_complex_call() {
        COMPLEX_CALLS.with(|calls| calls.set(calls.get() + 1));
    }
}

impl Tensor {
    /// Classify this descriptor (the reader) against a prior producer's
    /// output over the same buffer.
    ///
    /// The reader's version must be at least the producer's; a strictly
    /// newer version marks an in-place update generation and suppresses
    /// exact comparison.
    pub fn overlap(&self, producer: &Tensor) -> OverlapStatus {
        if !self.same_buffer(producer) {
            return OverlapStatus::NoOverlap;
        }
        debug_assert!(
            self.version >= producer.version,
            "reader version {} below producer version {}",
            self.version,
            producer.version,
        );
        if self.version > producer.version {
            return OverlapStatus::Other;
        }

        // Byte intervals make descriptors of different dtypes comparable.
        let reader_bytes = self.fuzzy_byte_segment();
        let producer_bytes = producer.fuzzy_byte_segment();
        if !reader_bytes.intersects(&producer_bytes) {
            return OverlapStatus::NoOverlap;
        }

        if producer.overlap_policy == OverlapPolicy::Fuzzy {
            return OverlapStatus::Other;
        }

        if self.ndims() == 1 && producer.ndims() == 1 {
            debug_assert_eq!(self.strides()[0], 1);
            debug_assert_eq!(producer.strides()[0], 1);
            return if reader_bytes.contains(&producer_bytes) {
                OverlapStatus::Covered
            } else {
                OverlapStatus::Other
            };
        }

        // Exact O(ndims) hyper-rectangle comparison; valid only when both
        // sides index the buffer identically.
        if self.dtype == producer.dtype
            && self.ndims() == producer.ndims()
            && self.same_strides(producer)
        {
            if let Some(status) = self.hyper_rect_overlap(producer) {
                return status;
            }
        }

        // O(Π repeats) segment walk.
        if self.complex_overlap(producer) {
            OverlapStatus::Other
        } else {
            OverlapStatus::NoOverlap
        }
    }

    /// Per-axis interval comparison. Returns `None` when either side is not
    /// an axis-aligned hyper-rectangle (an inner index range spills past its
    /// outer stride) and the exact comparison must fall back to the segment
    /// walk.
    fn hyper_rect_overlap(&self, producer: &Tensor) -> Option<OverlapStatus> {
        let reader_idx = self.offset_to_indices();
        let producer_idx = producer.offset_to_indices();
        let mut any_disjoint = false;
        let mut all_contained = true;
        for i in 0..self.ndims() {
            let r = Segment::new(reader_idx[i], reader_idx[i] + self.repeats()[i]);
            let p = Segment::new(producer_idx[i], producer_idx[i] + producer.repeats()[i]);
            if i > 0 {
                if r.end * self.strides()[i] > self.strides()[i - 1] {
                    return None;
                }
                if p.end * producer.strides()[i] > producer.strides()[i - 1] {
                    return None;
                }
            }
            if !r.intersects(&p) {
                any_disjoint = true;
            } else if !r.contains(&p) {
                all_contained = false;
            }
        }
        Some(if any_disjoint {
            OverlapStatus::NoOverlap
        } else if all_contained {
            OverlapStatus::Covered
        } else {
            OverlapStatus::Other
        })
    }

    /// Walk both descriptors' contiguous byte runs in ascending order with a
    /// two-pointer advance; true iff any pair of runs intersects.
    fn complex_overlap(&self, producer: &Tensor) -> bool {
        path_tracker::record_complex_call();

        let reader_elem = self.element_size();
        let producer_elem = producer.element_size();

        let mut reader_runs = ContiguousSegments::new(self);
        let mut producer_runs = ContiguousSegments::new(producer);
        let mut reader_run = reader_runs.next();
        let mut producer_run = producer_runs.next();
        while let (Some(r), Some(p)) = (reader_run, producer_run) {
            let r_bytes = r.scaled(reader_elem);
            let p_bytes = p.scaled(producer_elem);
            if r_bytes.end <= p_bytes.begin {
                reader_run = reader_runs.next();
            } else if p_bytes.end <= r_bytes.begin {
                producer_run = producer_runs.next();
            } else {
                return true;
            }
        }
        false
    }
}
