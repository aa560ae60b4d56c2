//! Lock-free pool of queue nodes for the queued lock.
//!
//! Nodes live in a fixed arena of cache-padded cells and are linked into
//! a freelist stack through `next_cell`. Liveness is encoded entirely in
//! `refcount`: bit 0 is the on-freelist claim bit, the even part counts
//! outstanding references. An allocator publishes a reference (+2) before
//! popping, so a cell can never be reclaimed out from under a concurrent
//! observer; the last dropper is the one whose [`NodePool::free`] brings
//! the count to zero and wins the claim CAS, and only that call pushes
//! the cell back. This is also what makes the freelist ABA-safe without
//! tagged pointers.

use crossbeam_utils::CachePadded;

use crate::atomic::{SyncVar, Word};

/// Offset-style reference to a pool cell. Slots are numbered from 1 so
/// that 0 can mean "none", the same convention every link field uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeRef(Word);

impl NodeRef {
    pub(crate) fn from_raw(raw: Word) -> NodeRef {
        NodeRef(raw)
    }

    /// The raw slot number. Nonzero for any reference handed out by the
    /// pool.
    pub fn raw(self) -> Word {
        self.0
    }

    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// One queue cell. `class`, `state` and `next` belong to the lock
/// algorithm; `next_cell` is freelist linkage, valid only while the cell
/// is free; `refcount` is the reclamation protocol described above.
pub(crate) struct LockNode {
    pub(crate) class: SyncVar,
    pub(crate) state: SyncVar,
    pub(crate) next: SyncVar,
    pub(crate) next_cell: SyncVar,
    pub(crate) refcount: SyncVar,
}

pub(crate) struct NodePool {
    freelist: SyncVar,
    arena: Box<[CachePadded<LockNode>]>,
}

impl NodePool {
    /// Build the arena and chain every cell into the freelist. Not
    /// parallel-safe; runs once at lock-space init.
    pub(crate) fn new(max_nodes: usize) -> NodePool {
        let arena = (0..max_nodes)
            .map(|i| {
                let next = if i + 1 < max_nodes { i as Word + 2 } else { 0 };
                CachePadded::new(LockNode {
                    class: SyncVar::new(0),
                    state: SyncVar::new(0),
                    next: SyncVar::new(0),
                    next_cell: SyncVar::new(next),
                    // the single on-freelist reference
                    refcount: SyncVar::new(1),
                })
            })
            .collect();
        NodePool {
            freelist: SyncVar::new(if max_nodes == 0 { 0 } else { 1 }),
            arena,
        }
    }

    pub(crate) fn node(&self, r: NodeRef) -> &LockNode {
        &self.arena[r.index()]
    }

    /// Pop a cell off the freelist, or `None` when the pool is exhausted.
    /// The caller owns the returned cell with one counted reference.
    pub(crate) fn alloc(&self) -> Option<NodeRef> {
        loop {
            let t = self.freelist.get();
            if t == 0 {
                return None;
            }
            let cell = self.node(NodeRef(t));

            // Publish our reference before the pop so the cell cannot be
            // fully reclaimed while we inspect it.
            cell.refcount.add(2);

            if self.freelist.cas(t, cell.next_cell.get()) {
                // clear the on-freelist claim bit
                cell.refcount.add(-1);
                return Some(NodeRef(t));
            }

            // Somebody else got it first; drop our reference and retry.
            self.free(NodeRef(t));
        }
    }

    /// Drop one reference to a cell. When the count reaches zero the
    /// caller wins the claim bit and pushes the cell back on the
    /// freelist; otherwise a remaining observer will.
    pub(crate) fn free(&self, r: NodeRef) {
        let cell = self.node(r);
        cell.refcount.add(-2);
        if cell.refcount.cas(0, 1) {
            loop {
                let head = self.freelist.get();
                cell.next_cell.set(head);
                if self.freelist.cas(head, r.raw()) {
                    break;
                }
            }
        }
    }

    /// Read a shared link field, returning a counted reference to the
    /// cell it points at (or `None` for a null link). The re-read after
    /// bumping the count guarantees the link still held the same cell
    /// while our reference was visible.
    pub(crate) fn deref_link(&self, link: &SyncVar) -> Option<NodeRef> {
        loop {
            let t = link.get();
            if t == 0 {
                return None;
            }
            self.node(NodeRef(t)).refcount.add(2);
            if link.get() == t {
                return Some(NodeRef(t));
            }
            self.free(NodeRef(t));
        }
    }

    /// Walk the freelist and count free cells. Exact when no lock
    /// traffic is in flight; approximate otherwise. The walk holds a
    /// counted reference to each visited cell and is capped at the arena
    /// size, so a walk racing lock traffic stays safe and terminates.
    pub(crate) fn free_nodes(&self) -> usize {
        let mut n = 0;
        let mut cur = self.deref_link(&self.freelist);
        while let Some(r) = cur {
            n += 1;
            if n == self.arena.len() {
                self.free(r);
                break;
            }
            cur = self.deref_link(&self.node(r).next_cell);
            self.free(r);
        }
        n
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn racing_allocs_on_one_cell() {
        loom::model(|| {
            let pool = Arc::new(NodePool::new(1));
            let p = pool.clone();
            let t = thread::spawn(move || {
                if let Some(r) = p.alloc() {
                    p.free(r);
                }
            });
            if let Some(r) = pool.alloc() {
                pool.free(r);
            }
            t.join().unwrap();
            // Whoever lost the race saw exhaustion, never a shared cell;
            // either way the cell ends up back on the freelist.
            assert_eq!(pool.free_nodes(), 1);
        });
    }

    #[test]
    fn conservation_across_two_threads() {
        loom::model(|| {
            let pool = Arc::new(NodePool::new(2));
            let p = pool.clone();
            let t = thread::spawn(move || {
                if let Some(r) = p.alloc() {
                    p.free(r);
                }
            });
            if let Some(r) = pool.alloc() {
                pool.free(r);
            }
            t.join().unwrap();
            assert_eq!(pool.free_nodes(), 2);
        });
    }
}
