//! Portable word-sized atomic primitives.
//!
//! Every piece of state the lock algorithms share lives in a [`SyncVar`]
//! and is touched only through these operations. All read-modify-write
//! ops are sequentially consistent; the one deliberate exception is
//! [`SyncVar::peek`], a relaxed load for spin-observation loops, which
//! must be paired with [`acquire_fence`] (or another SeqCst op) before
//! control flow depends on the observed value.

#[cfg(loom)]
use loom::sync::atomic::{fence, AtomicIsize, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{fence, AtomicIsize, Ordering};

/// Machine word the lock state is built from.
///
/// Signed so reader counts can be adjusted with negative deltas.
pub type Word = isize;

/// A shared word-sized variable.
pub(crate) struct SyncVar(AtomicIsize);

impl SyncVar {
    pub(crate) fn new(v: Word) -> SyncVar {
        SyncVar(AtomicIsize::new(v))
    }

    pub(crate) fn get(&self) -> Word {
        self.0.load(Ordering::SeqCst)
    }

    /// Spin-observation load. Relaxed; see module docs.
    pub(crate) fn peek(&self) -> Word {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn set(&self, v: Word) {
        self.0.store(v, Ordering::SeqCst);
    }

    pub(crate) fn add(&self, d: Word) {
        self.0.fetch_add(d, Ordering::SeqCst);
    }

    pub(crate) fn and(&self, m: Word) {
        self.0.fetch_and(m, Ordering::SeqCst);
    }

    pub(crate) fn or(&self, m: Word) {
        self.0.fetch_or(m, Ordering::SeqCst);
    }

    /// Returns the value before the addition.
    pub(crate) fn fetch_add(&self, d: Word) -> Word {
        self.0.fetch_add(d, Ordering::SeqCst)
    }

    /// Swap, returning the prior value.
    pub(crate) fn exchange(&self, v: Word) -> Word {
        self.0.swap(v, Ordering::SeqCst)
    }

    /// Boolean compare-and-swap: true iff `old` was observed and replaced.
    pub(crate) fn cas(&self, old: Word, new: Word) -> bool {
        self.0
            .compare_exchange(old, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Orders a successful `peek` observation before whatever the caller does
/// with it. The writer side of every observed transition is SeqCst, so an
/// acquire fence on the reader side completes the pairing.
pub(crate) fn acquire_fence() {
    fence(Ordering::Acquire);
}
