//! Locally spinning FIFO-queued reader/writer lock.
//!
//! Waiters form a single queue through `tail`; a run of consecutive
//! readers executes concurrently, a writer runs alone. Each waiter spins
//! only on its own node's `state` word, so a handoff touches one cache
//! line instead of hammering the shared header.
//!
//! A node's `state` word carries two things at once: bit 0 is the blocked
//! bit, cleared by the predecessor (or by the node itself when it is
//! first in line and free to run); the upper bits are hints the successor
//! plants so that the node knows, at release time, whether it must pass
//! reader-count responsibility forward or route a writer through
//! `next_writer`.
//!
//! Active readers may have been "cut" from the queue (`tail` reset to
//! none) and are then visible only through `reader_count`; the last one
//! out hands the lock to the writer parked in `next_writer`.

use std::time::Duration;

use crate::atomic::{acquire_fence, SyncVar, Word};
use crate::backoff::{pause, spin_wait};
use crate::pool::{NodePool, NodeRef};

/// Waiter classes. None is 0 to keep the atomic hint ops simple.
const CLASS_READ: Word = 0x2;
const CLASS_WRITE: Word = 0x4;

/// Bit 0 of a node's state word.
const BLOCKED: Word = 0x1;
/// Successor hints share the class encoding.
const SUCC_READER: Word = CLASS_READ;
const SUCC_WRITER: Word = CLASS_WRITE;

#[cfg(windows)]
const SLEEP_STEP: Duration = Duration::from_millis(1);
/// Just deschedule; queued waiters are woken explicitly and the wait is
/// usually one predecessor away.
#[cfg(not(windows))]
const SLEEP_STEP: Duration = Duration::from_nanos(1);

/// The queued database-wide reader/writer lock.
pub struct QueuedLock {
    tail: SyncVar,
    next_writer: SyncVar,
    reader_count: SyncVar,
    pool: NodePool,
}

impl QueuedLock {
    /// Build the lock with a pool of `max_nodes` queue cells. Not
    /// parallel-safe; runs once at database init.
    pub fn new(max_nodes: usize) -> QueuedLock {
        QueuedLock {
            tail: SyncVar::new(0),
            next_writer: SyncVar::new(0),
            reader_count: SyncVar::new(0),
            pool: NodePool::new(max_nodes),
        }
    }

    /// Acquire exclusive access. Returns the caller's queue node, to be
    /// round-tripped to [`QueuedLock::end_write`], or `None` when the
    /// node pool is exhausted.
    pub fn start_write(&self) -> Option<NodeRef> {
        let lock = self.pool.alloc()?;
        let node = self.pool.node(lock);
        node.class.set(CLASS_WRITE);
        node.next.set(0);
        node.state.set(BLOCKED);

        let prev = self.tail.exchange(lock.raw());
        if prev == 0 {
            // Empty queue. That does not mean no active readers; they
            // may have been cut from the queue and live on only in
            // reader_count. Park ourselves as the next writer, then make
            // sure a racing last reader has not already claimed us: only
            // if we win the exchange back may we unblock ourselves.
            self.next_writer.set(lock.raw());
            if self.reader_count.get() == 0 && self.next_writer.exchange(0) == lock.raw() {
                node.state.and(!BLOCKED);
            }
        } else {
            // Wait behind the predecessor. It unblocks us directly (lone
            // writer) or through the last reader's handoff.
            let prev_node = self.pool.node(NodeRef::from_raw(prev));
            prev_node.state.or(SUCC_WRITER);
            prev_node.next.set(lock.raw());
        }

        if node.state.get() & BLOCKED != 0 {
            spin_wait(SLEEP_STEP, || node.state.peek() & BLOCKED == 0);
        }

        Some(lock)
    }

    /// Release exclusive access.
    pub fn end_write(&self, lock: NodeRef) {
        let node = self.pool.node(lock);

        // If we are last in line and nobody is appending, the CAS cuts
        // the queue and there is no successor to wake. A failed CAS
        // means a successor is mid-link; wait for its `next` store.
        if node.next.get() != 0 || !self.tail.cas(lock.raw(), 0) {
            while node.next.peek() == 0 {
                pause();
            }
            acquire_fence();

            let next = self.pool.node(NodeRef::from_raw(node.next.get()));
            if next.class.get() & CLASS_READ != 0 {
                // Accept the successor into the reader cohort before it
                // runs.
                self.reader_count.add(1);
            }
            next.state.and(!BLOCKED);
        }

        self.pool.free(lock);
    }

    /// Acquire shared access. Returns the caller's queue node, to be
    /// round-tripped to [`QueuedLock::end_read`], or `None` when the
    /// node pool is exhausted.
    pub fn start_read(&self) -> Option<NodeRef> {
        let lock = self.pool.alloc()?;
        let node = self.pool.node(lock);
        node.class.set(CLASS_READ);
        node.next.set(0);
        node.state.set(BLOCKED);

        let prev = self.tail.exchange(lock.raw());
        if prev == 0 {
            // No queue; join the active readers directly.
            self.reader_count.add(1);
            node.state.and(!BLOCKED);
        } else {
            let prev_node = self.pool.node(NodeRef::from_raw(prev));
            // A writer predecessor always blocks us. A reader
            // predecessor blocks us only if it is itself still blocked,
            // in which case the CAS plants the reader hint and commits
            // it to waking us with the count already passed on.
            if prev_node.class.get() & CLASS_WRITE != 0
                || prev_node.state.cas(BLOCKED, BLOCKED | SUCC_READER)
            {
                prev_node.next.set(lock.raw());
                if node.state.get() & BLOCKED != 0 {
                    spin_wait(SLEEP_STEP, || node.state.peek() & BLOCKED == 0);
                }
            } else {
                // Predecessor is an active reader; run alongside it.
                self.reader_count.add(1);
                prev_node.next.set(lock.raw());
                node.state.and(!BLOCKED);
            }
        }

        // A reader successor that registered while we were blocked is
        // still waiting; count it in and wake it. One reader becoming
        // active chain-unblocks the whole contiguous run behind it.
        if node.state.get() & SUCC_READER != 0 {
            while node.next.peek() == 0 {
                pause();
            }
            acquire_fence();
            self.reader_count.add(1);
            let next = self.pool.node(NodeRef::from_raw(node.next.get()));
            next.state.and(!BLOCKED);
        }

        Some(lock)
    }

    /// Release shared access.
    pub fn end_read(&self, lock: NodeRef) {
        let node = self.pool.node(lock);

        // Same queue-cut test as end_write. With fair queueing a
        // successor can never be a waiting reader (it would have joined
        // our cohort), so the only hint that matters here is a writer.
        if node.next.get() != 0 || !self.tail.cas(lock.raw(), 0) {
            while node.next.peek() == 0 {
                pause();
            }
            acquire_fence();
            if node.state.get() & SUCC_WRITER != 0 {
                self.next_writer.set(node.next.get());
            }
        }

        if self.reader_count.fetch_add(-1) == 1 {
            // Last reader out hands the lock to a parked writer, if any.
            let w = self.next_writer.exchange(0);
            if w != 0 {
                self.pool.node(NodeRef::from_raw(w)).state.and(!BLOCKED);
            }
        }

        self.pool.free(lock);
    }

    /// Number of currently active readers, for diagnostics.
    pub fn reader_count(&self) -> Word {
        self.reader_count.get()
    }

    /// Free cells left in the node pool. Exact when no lock traffic is
    /// in flight.
    pub fn free_nodes(&self) -> usize {
        self.pool.free_nodes()
    }
}
