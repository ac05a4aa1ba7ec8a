use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("descriptor has {ndims} dims, supported range is 1..={max}"))]
    DimsOutOfRange { ndims: usize, max: usize },

    #[snafu(display("strides rank {strides} does not match repeats rank {repeats}"))]
    RankMismatch { strides: usize, repeats: usize },

    #[snafu(display("repeat count in dim {dim} must be positive"))]
    ZeroRepeat { dim: usize },

    #[snafu(display("buffer size {size} is not a multiple of the {elem}-byte element size"))]
    MisalignedBuffer { size: u64, elem: usize },

    /// Layout violates the normalized-strides contract (innermost stride 1,
    /// divisibility, inner block bounded by the outer stride).
    #[snafu(display("invalid layout: {reason}"))]
    InvalidLayout { reason: &'static str },

    #[snafu(display("descriptor reaches byte {end}, past the {size}-byte buffer"))]
    OutOfBuffer { end: u64, size: u64 },

    #[snafu(display("view shape {shape} + offset {offset} exceeds extent {extent} in dim {dim}"))]
    ViewOutOfRange { dim: usize, shape: u64, offset: u64, extent: u64 },

    #[snafu(display("reshape requires a contiguous descriptor"))]
    NotContiguous,

    #[snafu(display("reshape changes element count: {from} vs {to}"))]
    ReshapeMismatch { from: u64, to: u64 },

    #[snafu(display("transpose axis {axis} out of range for {ndims} dims"))]
    AxisOutOfRange { axis: usize, ndims: usize },
}
