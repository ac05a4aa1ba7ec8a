use snafu::ensure;
use veter_dtype::DType;

use crate::error::*;
use crate::overlap::OverlapPolicy;
use crate::segment::Segment;

/// Maximum number of descriptor dimensions.
pub const MAX_DIMS: usize = 8;

/// Underlying device memory allocation: base address and total size, both in
/// bytes. A descriptor expresses an access pattern over one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferHandle {
    pub addr: u64,
    pub size: u64,
}

/// Strided access pattern over a [`BufferHandle`].
///
/// `start_offset`, `strides` and `repeats` are in element units; the element
/// offset of index `(i_0, …, i_{n-1})` is `start_offset + Σ i_k · strides[k]`,
/// and byte offsets are element offsets times `dtype.bytes()`.
///
/// Descriptors are normalized on construction and stay normalized: strides
/// are sorted jointly with their repeats in non-increasing `(stride, repeat)`
/// order, the innermost stride is 1, every outer stride is divisible by its
/// inner neighbour, and `strides[i-1] >= strides[i] * repeats[i]`. The sort
/// never changes the set of reachable element offsets (debug-verified by
/// exhaustive enumeration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    pub buffer: BufferHandle,
    pub start_offset: u64,
    strides: [u64; MAX_DIMS],
    repeats: [u64; MAX_DIMS],
    ndims: usize,
    pub dtype: DType,
    pub version: i32,
    pub overlap_policy: OverlapPolicy,
}

/// Inert placeholder used for pooled storage slots; never a valid access
/// pattern (zero-sized buffer).
impl Default for Tensor {
    fn default() -> Self {
        Self {
            buffer: BufferHandle::default(),
            start_offset: 0,
            strides: [1; MAX_DIMS],
            repeats: [1; MAX_DIMS],
            ndims: 1,
            dtype: DType::Float32,
            version: 0,
            overlap_policy: OverlapPolicy::Accurate,
        }
    }
}

#[bon::bon]
impl Tensor {
    /// General constructor; normalizes the layout and validates it.
    #[builder]
    pub fn new(
        #[builder(default)] addr: u64,
        buffer_size: u64,
        #[builder(default)] start_offset: u64,
        strides: &[u64],
        repeats: &[u64],
        #[builder(default = DType::Float32)] dtype: DType,
        #[builder(default)] version: i32,
        #[builder(default)] overlap_policy: OverlapPolicy,
    ) -> Result<Self> {
        ensure!(
            strides.len() == repeats.len(),
            RankMismatchSnafu { strides: strides.len(), repeats: repeats.len() }
        );
        let ndims = strides.len();
        ensure!((1..=MAX_DIMS).contains(&ndims), DimsOutOfRangeSnafu { ndims, max: MAX_DIMS });
        if let Some(dim) = repeats.iter().position(|&r| r == 0) {
            return ZeroRepeatSnafu { dim }.fail();
        }

        let mut tensor = Self {
            buffer: BufferHandle { addr, size: buffer_size },
            start_offset,
            strides: [1; MAX_DIMS],
            repeats: [1; MAX_DIMS],
            ndims,
            dtype,
            version,
            overlap_policy,
        };
        tensor.strides[..ndims].copy_from_slice(strides);
        tensor.repeats[..ndims].copy_from_slice(repeats);
        tensor.sort_layout();

        debug_assert!(
            {
                let mut original = enumerate_offsets(start_offset, strides, repeats);
                let mut sorted =
                    enumerate_offsets(start_offset, tensor.strides(), tensor.repeats());
                original.sort_unstable();
                sorted.sort_unstable();
                original == sorted
            },
            "layout sort changed the reachable offset set"
        );

        tensor.check_layout()?;
        Ok(tensor)
    }
}

impl Tensor {
    /// 1-D contiguous descriptor covering an entire pre-allocated buffer.
    pub fn external(addr: u64, size_bytes: u64, dtype: DType, version: i32) -> Result<Self> {
        let elem = dtype.bytes() as u64;
        ensure!(
            size_bytes % elem == 0,
            MisalignedBufferSnafu { size: size_bytes, elem: dtype.bytes() }
        );
        Self::builder()
            .addr(addr)
            .buffer_size(size_bytes)
            .strides(&[1])
            .repeats(&[size_bytes / elem])
            .dtype(dtype)
            .version(version)
            .build()
    }

    /// N-D contiguous descriptor over pre-allocated memory.
    pub fn external_shaped(addr: u64, shape: &[u64], dtype: DType, version: i32) -> Result<Self> {
        ensure!(
            (1..=MAX_DIMS).contains(&shape.len()),
            DimsOutOfRangeSnafu { ndims: shape.len(), max: MAX_DIMS }
        );
        let mut strides = [1u64; MAX_DIMS];
        for i in (0..shape.len() - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        let size_bytes = strides[0] * shape[0] * dtype.bytes() as u64;
        Self::builder()
            .addr(addr)
            .buffer_size(size_bytes)
            .strides(&strides[..shape.len()])
            .repeats(shape)
            .dtype(dtype)
            .version(version)
            .build()
    }

    /// Output placeholder: address 0, filled in by the runtime at submission.
    pub fn placeholder(size_bytes: u64, dtype: DType, version: i32) -> Result<Self> {
        Self::external(0, size_bytes, dtype, version)
    }

    /// N-D contiguous output placeholder.
    pub fn placeholder_shaped(shape: &[u64], dtype: DType, version: i32) -> Result<Self> {
        Self::external_shaped(0, shape, dtype, version)
    }

    pub fn strides(&self) -> &[u64] {
        &self.strides[..self.ndims]
    }

    pub fn repeats(&self) -> &[u64] {
        &self.repeats[..self.ndims]
    }

    pub fn ndims(&self) -> usize {
        self.ndims
    }

    pub fn element_size(&self) -> u64 {
        self.dtype.bytes() as u64
    }

    pub fn numel(&self) -> u64 {
        self.repeats().iter().product()
    }

    pub fn same_buffer(&self, other: &Tensor) -> bool {
        self.buffer.addr == other.buffer.addr
    }

    pub fn same_strides(&self, other: &Tensor) -> bool {
        self.strides() == other.strides()
    }

    /// Fill in the address of a placeholder descriptor once the runtime has
    /// allocated its backing memory. The only permitted mutation.
    pub fn fill_addr(&mut self, addr: u64) {
        debug_assert_eq!(self.buffer.addr, 0, "address already assigned");
        self.buffer.addr = addr;
    }

    /// Smallest element interval enclosing every reachable offset.
    pub fn fuzzy_segment(&self) -> Segment {
        let mut end = self.start_offset;
        for i in 0..self.ndims {
            end += self.strides[i] * (self.repeats[i] - 1);
        }
        Segment::new(self.start_offset, end + 1)
    }

    /// [`Self::fuzzy_segment`] in byte units.
    pub fn fuzzy_byte_segment(&self) -> Segment {
        self.fuzzy_segment().scaled(self.element_size())
    }

    pub fn is_contiguous(&self) -> bool {
        if self.strides[self.ndims - 1] != 1 {
            return false;
        }
        (0..self.ndims - 1).all(|i| self.strides[i] == self.strides[i + 1] * self.repeats[i + 1])
    }

    /// Decompose `start_offset` into per-dimension indices by dividing down
    /// the stride vector.
    pub fn offset_to_indices(&self) -> [u64; MAX_DIMS] {
        let mut indices = [0u64; MAX_DIMS];
        let mut offset = self.start_offset;
        for i in 0..self.ndims {
            indices[i] = offset / self.strides[i];
            offset %= self.strides[i];
        }
        indices
    }

    pub fn indices_to_offset(&self, indices: &[u64]) -> u64 {
        indices.iter().zip(self.strides()).map(|(i, s)| i * s).sum()
    }

    /// Sub-view selecting `shape[i]` repeats starting at `offsets[i]` in every
    /// dimension. Shares the buffer; never mutates `self`.
    pub fn view(&self, shape: &[u64], offsets: &[u64]) -> Result<Tensor> {
        ensure!(
            shape.len() == self.ndims && offsets.len() == self.ndims,
            RankMismatchSnafu { strides: shape.len(), repeats: offsets.len() }
        );
        for dim in 0..self.ndims {
            ensure!(
                shape[dim] + offsets[dim] <= self.repeats[dim],
                ViewOutOfRangeSnafu {
                    dim,
                    shape: shape[dim],
                    offset: offsets[dim],
                    extent: self.repeats[dim],
                }
            );
        }
        Self::builder()
            .addr(self.buffer.addr)
            .buffer_size(self.buffer.size)
            .start_offset(self.start_offset + self.indices_to_offset(offsets))
            .strides(self.strides())
            .repeats(shape)
            .dtype(self.dtype)
            .version(self.version)
            .overlap_policy(self.overlap_policy)
            .build()
    }

    /// Reinterpret a contiguous descriptor under a new shape with the same
    /// element count.
    pub fn reshape(&self, shape: &[u64]) -> Result<Tensor> {
        ensure!(self.is_contiguous(), NotContiguousSnafu);
        let to: u64 = shape.iter().product();
        ensure!(self.numel() == to, ReshapeMismatchSnafu { from: self.numel(), to });
        ensure!(
            (1..=MAX_DIMS).contains(&shape.len()),
            DimsOutOfRangeSnafu { ndims: shape.len(), max: MAX_DIMS }
        );
        let mut strides = [1u64; MAX_DIMS];
        for i in (0..shape.len() - 1).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        Self::builder()
            .addr(self.buffer.addr)
            .buffer_size(self.buffer.size)
            .start_offset(self.start_offset)
            .strides(&strides[..shape.len()])
            .repeats(shape)
            .dtype(self.dtype)
            .version(self.version)
            .overlap_policy(self.overlap_policy)
            .build()
    }

    /// Exchange two dimensions. The reachable offset set is unchanged, so the
    /// normalized result classifies overlap identically to `self`.
    pub fn transpose(&self, x: usize, y: usize) -> Result<Tensor> {
        ensure!(x < self.ndims, AxisOutOfRangeSnafu { axis: x, ndims: self.ndims });
        ensure!(y < self.ndims, AxisOutOfRangeSnafu { axis: y, ndims: self.ndims });
        let mut strides = self.strides;
        let mut repeats = self.repeats;
        strides.swap(x, y);
        repeats.swap(x, y);
        Self::builder()
            .addr(self.buffer.addr)
            .buffer_size(self.buffer.size)
            .start_offset(self.start_offset)
            .strides(&strides[..self.ndims])
            .repeats(&repeats[..self.ndims])
            .dtype(self.dtype)
            .version(self.version)
            .overlap_policy(self.overlap_policy)
            .build()
    }

    /// Joint selection sort of `(stride, repeat)` pairs, non-increasing.
    fn sort_layout(&mut self) {
        for i in 0..self.ndims {
            for j in i + 1..self.ndims {
                if self.strides[i] < self.strides[j]
                    || (self.strides[i] == self.strides[j] && self.repeats[i] < self.repeats[j])
                {
                    self.strides.swap(i, j);
                    self.repeats.swap(i, j);
                }
            }
        }
    }

    fn check_layout(&self) -> Result<()> {
        ensure!(
            self.strides[self.ndims - 1] == 1,
            InvalidLayoutSnafu { reason: "innermost stride must be 1" }
        );
        for i in 1..self.ndims {
            ensure!(
                self.strides[i - 1] % self.strides[i] == 0,
                InvalidLayoutSnafu { reason: "outer stride not divisible by inner stride" }
            );
            ensure!(
                self.strides[i - 1] >= self.strides[i] * self.repeats[i],
                InvalidLayoutSnafu { reason: "inner block exceeds outer stride" }
            );
        }
        let end = self.fuzzy_byte_segment().end;
        ensure!(end <= self.buffer.size, OutOfBufferSnafu { end, size: self.buffer.size });
        Ok(())
    }
}

/// Enumerate every reachable element offset of a raw layout, in traversal
/// order. Debug verification and tests only; cost is `Π repeats`.
pub(crate) fn enumerate_offsets(start_offset: u64, strides: &[u64], repeats: &[u64]) -> Vec<u64> {
    let ndims = strides.len();
    let mut offsets = Vec::with_capacity(repeats.iter().product::<u64>() as usize);
    let mut idx = vec![0u64; ndims];
    loop {
        offsets.push(start_offset + idx.iter().zip(strides).map(|(i, s)| i * s).sum::<u64>());
        let mut dim = ndims;
        loop {
            if dim == 0 {
                return offsets;
            }
            dim -= 1;
            idx[dim] += 1;
            if idx[dim] < repeats[dim] {
                break;
            }
            idx[dim] = 0;
        }
    }
}
