//! Scratch: the transient build-scoped allocator.
//!
//! The original library ran two manually balanced heaps: a transient pool
//! valid only during plan construction and a persistent pool owned by the
//! resulting plan. In Rust the persistent side is simply field ownership on
//! [`Plan`](crate::plan::Plan); what remains worth modeling is the transient
//! side's balance diagnostics. `Scratch` hands out tracked buffers whose
//! borrows tie them to the build scope, counts allocations and releases, and
//! warns on imbalance when the build finishes.

use std::cell::Cell;
use std::ops::{Deref, DerefMut};

use crate::error::GsError;

/// Transient allocation context for one plan build.
#[derive(Debug)]
pub struct Scratch {
    strict: bool,
    live: Cell<usize>,
    total: Cell<usize>,
    bytes: Cell<usize>,
}

/// A buffer borrowed from a [`Scratch`]; released (and counted) on drop.
pub struct ScratchBuf<'a, T> {
    data: Vec<T>,
    owner: &'a Scratch,
}

impl Scratch {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            live: Cell::new(0),
            total: Cell::new(0),
            bytes: Cell::new(0),
        }
    }

    /// Allocate a zeroed buffer of `n` elements. Zero-size requests are an
    /// error in strict mode and a warning otherwise.
    pub fn buffer<T: Default + Clone>(&self, n: usize) -> Result<ScratchBuf<'_, T>, GsError> {
        if n == 0 {
            if self.strict {
                return Err(GsError::ZeroSizeAlloc);
            }
            log::warn!("scratch: zero-size buffer request");
        }
        self.live.set(self.live.get() + 1);
        self.total.set(self.total.get() + 1);
        self.bytes
            .set(self.bytes.get() + n * std::mem::size_of::<T>());
        Ok(ScratchBuf {
            data: vec![T::default(); n],
            owner: self,
        })
    }

    /// Buffers handed out so far.
    pub fn total_allocations(&self) -> usize {
        self.total.get()
    }

    /// End of the build scope. The borrow checker already prevents buffers
    /// from outliving the scratch; the live count can still be nonzero if a
    /// buffer was leaked deliberately, which is worth a warning.
    pub fn finish(self) {
        if self.live.get() != 0 {
            log::warn!(
                "scratch: {} of {} buffers still live at end of build",
                self.live.get(),
                self.total.get()
            );
        } else {
            log::trace!(
                "scratch: {} buffers, {} bytes peak-tracked, balanced",
                self.total.get(),
                self.bytes.get()
            );
        }
    }
}

impl<T> Drop for ScratchBuf<'_, T> {
    fn drop(&mut self) {
        self.owner.live.set(self.owner.live.get() - 1);
    }
}

impl<T> Deref for ScratchBuf<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for ScratchBuf<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> ScratchBuf<'_, T> {
    /// Reset contents for reuse across discovery rounds.
    pub fn clear_to(&mut self, v: T)
    where
        T: Clone,
    {
        self.data.fill(v);
    }
}
