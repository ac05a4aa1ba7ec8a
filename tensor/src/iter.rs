use crate::descriptor::{MAX_DIMS, Tensor};
use crate::segment::Segment;

/// Iterator over the innermost contiguous runs of a descriptor, in element
/// units and ascending order.
///
/// Each run is `repeats[last]` elements long (the innermost stride is 1 for
/// a normalized descriptor). Advancing bumps the innermost index by a full
/// run; when a dimension overflows, the byte cursor jumps by
/// `strides[i-1] - strides[i] * repeats[i]` into the next outer iteration.
pub struct ContiguousSegments<'a> {
    tensor: &'a Tensor,
    indices: [u64; MAX_DIMS],
    cursor: u64,
}

impl<'a> ContiguousSegments<'a> {
    pub fn new(tensor: &'a Tensor) -> Self {
        debug_assert_eq!(tensor.strides()[tensor.ndims() - 1], 1);
        Self { tensor, indices: [0; MAX_DIMS], cursor: tensor.start_offset }
    }

    fn run_len(&self) -> u64 {
        self.tensor.repeats()[self.tensor.ndims() - 1]
    }
}

impl Iterator for ContiguousSegments<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let repeats = self.tensor.repeats();
        let strides = self.tensor.strides();
        if self.indices[0] >= repeats[0] {
            return None;
        }

        let segment = Segment::new(self.cursor, self.cursor + self.run_len());

        let last = self.tensor.ndims() - 1;
        self.indices[last] += repeats[last];
        self.cursor += repeats[last];
        for i in (1..=last).rev() {
            debug_assert!(self.indices[i] <= repeats[i]);
            if self.indices[i] == repeats[i] {
                self.indices[i - 1] += 1;
                self.indices[i] = 0;
                self.cursor += strides[i - 1] - strides[i] * repeats[i];
            }
        }

        Some(segment)
    }
}

impl std::iter::FusedIterator for ContiguousSegments<'_> {}
