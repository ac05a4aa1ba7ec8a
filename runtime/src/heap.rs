//! Scope-anchored bump arena over a caller-provided device memory range.
//!
//! Allocation only moves the cursor forward; memory is reclaimed solely by
//! ending the scope that covers it. Scopes nest LIFO via an explicit stack
//! of saved cursors, so release happens on every exit path of the
//! submitting region without relying on unwinding.

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::error::*;

#[derive(Debug)]
pub struct Heap {
    base: u64,
    size: u64,
    cursor: u64,
    scopes: SmallVec<[u64; 16]>,
}

impl Heap {
    /// Wrap a device memory range `[base, base + size)`. The heap never
    /// dereferences the range; it only hands out addresses inside it.
    pub fn new(base: u64, size: u64) -> Self {
        Self { base, size, cursor: 0, scopes: SmallVec::new() }
    }

    /// Bump-allocate `bytes` at the given alignment and return the device
    /// address.
    pub fn alloc(&mut self, bytes: u64, align: u64) -> Result<u64> {
        debug_assert!(align.is_power_of_two());
        let aligned = (self.base + self.cursor).next_multiple_of(align) - self.base;
        ensure!(
            aligned + bytes <= self.size,
            HeapExhaustedSnafu { requested: bytes, remaining: self.size.saturating_sub(aligned) }
        );
        self.cursor = aligned + bytes;
        Ok(self.base + aligned)
    }

    /// Save the cursor; the matching [`Self::scope_end`] rewinds to it.
    pub fn scope_begin(&mut self) {
        self.scopes.push(self.cursor);
    }

    /// Pop the innermost scope, releasing everything allocated inside it.
    pub fn scope_end(&mut self) -> Result<()> {
        let saved = self.scopes.pop().context(ScopeUnderflowSnafu)?;
        self.cursor = saved;
        Ok(())
    }

    /// Drop back to a cursor captured earlier via [`Self::used`], releasing
    /// the allocations made since. May not rewind past the innermost open
    /// scope.
    pub(crate) fn rewind(&mut self, cursor: u64) {
        debug_assert!(cursor <= self.cursor);
        debug_assert!(self.scopes.last().is_none_or(|&scope| cursor >= scope));
        self.cursor = cursor;
    }

    pub fn used(&self) -> u64 {
        self.cursor
    }

    pub fn remaining(&self) -> u64 {
        self.size - self.cursor
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }
}
