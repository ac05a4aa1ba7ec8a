//! Error types for the orchestration runtime.

use snafu::Snafu;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{what} capacity {value} must be a power of two"))]
    NotPowerOfTwo { what: &'static str, value: usize },

    #[snafu(display("{what} capacity must be positive, got {value}"))]
    ZeroCapacity { what: &'static str, value: usize },

    #[snafu(display("shared region of {got} bytes is smaller than the required {need}"))]
    RegionTooSmall { got: usize, need: usize },

    #[snafu(display("shared region pointer must be {align}-byte aligned"))]
    RegionMisaligned { align: usize },

    #[snafu(display("heap exhausted: requested {requested} bytes, {remaining} remaining"))]
    HeapExhausted { requested: u64, remaining: u64 },

    #[snafu(display("scope_end without a matching scope_begin"))]
    ScopeUnderflow,

    #[snafu(display("task submitted with no parameters"))]
    EmptySubmit,

    #[snafu(display("task has {count} parameters, the dispatch limit is {max}"))]
    TooManyParams { count: usize, max: usize },

    #[snafu(display("parameter {index} requires a non-null buffer address"))]
    NullParam { index: usize },

    #[snafu(display("unknown function id {function_id}"))]
    UnknownFunction { function_id: i32 },
}
