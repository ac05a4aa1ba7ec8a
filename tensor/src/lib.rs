//! Strided tensor descriptors with byte-range overlap analysis.
//!
//! A [`Tensor`] describes a strided access pattern over a device buffer:
//! a `(base address, size)` pair plus a `start offset`, per-dimension
//! `strides` and `repeats` in element units, and an element type. The
//! descriptor does not own memory; it exists so the orchestration runtime
//! can decide, for two access patterns over the same buffer, whether one
//! reaches bytes the other produced.
//!
//! The central operation is [`Tensor::overlap`], which classifies a reader
//! against a prior producer as [`OverlapStatus::NoOverlap`],
//! [`OverlapStatus::Covered`], or [`OverlapStatus::Other`]. Cheap interval
//! and hyper-rectangle checks handle the common layouts; the general case
//! walks both descriptors' contiguous runs in ascending order.

pub mod descriptor;
pub mod error;
pub mod iter;
pub mod overlap;
pub mod segment;

#[cfg(test)]
pub mod test;

pub use descriptor::{BufferHandle, MAX_DIMS, Tensor};
pub use error::{Error, Result};
pub use iter::ContiguousSegments;
pub use overlap::{OverlapPolicy, OverlapStatus};
pub use segment::Segment;
