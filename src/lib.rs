//! Database-wide reader/writer synchronization for an in-memory database:
//! one logical lock over the whole database image, admitting any number of
//! concurrent readers or a single exclusive writer. Built entirely from
//! word-sized sequentially consistent atomics; no acquire or release ever
//! takes an OS mutex, and the only suspension points are backoff sleeps.
//!
//! Two algorithms coexist, selected at build time by the `queued` cargo
//! feature:
//!
//! - [`simple::SimpleLock`] (default): reader-preference lock on a single
//!   sync word. Wait-free releases, CAS-acquire writers, writers may
//!   starve under sustained reader traffic.
//! - [`queued::QueuedLock`] (`--features queued`): FIFO queue of locally
//!   spinning waiters with reader batching, backed by a lock-free node
//!   pool. Strictly fair by arrival order, modulo contiguous readers
//!   running as one cohort.
//!
//! Both types are always compiled and exported; the feature only picks
//! which one backs [`LockSpace`], the per-database facade. `LockSpace`
//! hands out [`Token`]s from `start_read`/`start_write` that must be
//! round-tripped to the matching `end_read`/`end_write`, mirroring the
//! interface the surrounding database exposes. [`LockSpace::read`] and
//! [`LockSpace::write`] wrap the same engine in RAII guards.
//!
//! This lock provides mutual exclusion only. It does not version records,
//! detect deadlocks (there is only one lock), time out, or upgrade read
//! tokens to write tokens. Releasing a token you did not get from the
//! paired acquire, releasing twice, or crossing tokens between spaces is
//! not checked and leaves the lock state undefined.

use std::fmt;

mod atomic;
mod backoff;
mod pool;
pub mod queued;
pub mod simple;

pub use atomic::Word;
pub use pool::NodeRef;

/// Magic word stamped into a [`LockSpace`] at init and validated by every
/// operation, standing in for the host's segment check.
const SPACE_MARK: Word = 0x6c_6f_63_6b;

/// Token value for the simple algorithm, which needs no per-acquire
/// state.
#[cfg(not(feature = "queued"))]
const SIMPLE_TOKEN: Word = 1;

/// Errors surfaced by lock operations. There are no others; every other
/// misuse is documented undefined behavior of the lock state, not a
/// detected condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The lock space failed validation; no shared state was touched.
    InvalidHandle,
    /// The queue-node pool is empty. The acquire did not happen and no
    /// release must be paired with it.
    PoolExhausted,
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::InvalidHandle => f.write_str("invalid lock space handle"),
            LockError::PoolExhausted => f.write_str("lock queue node pool exhausted"),
        }
    }
}

impl std::error::Error for LockError {}

/// Opaque, nonzero pairing token returned by `start_*` and consumed by
/// the matching `end_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token(Word);

impl Token {
    /// The raw token word. Nonzero for any token this crate hands out.
    pub fn raw(self) -> Word {
        self.0
    }
}

/// The lock state of one database image.
///
/// Created once, single-threaded, by whoever owns the segment; shared by
/// reference with every thread that works on the database.
pub struct LockSpace {
    mark: Word,
    #[cfg(feature = "queued")]
    lock: queued::QueuedLock,
    #[cfg(not(feature = "queued"))]
    lock: simple::SimpleLock,
}

impl LockSpace {
    /// Initialize lock state. `max_nodes` sizes the queue-node pool and
    /// bounds the number of simultaneous lock requests; the simple
    /// algorithm has no per-request state and ignores it.
    #[cfg_attr(not(feature = "queued"), allow(unused_variables))]
    pub fn new(max_nodes: usize) -> LockSpace {
        LockSpace {
            mark: SPACE_MARK,
            #[cfg(feature = "queued")]
            lock: queued::QueuedLock::new(max_nodes),
            #[cfg(not(feature = "queued"))]
            lock: simple::SimpleLock::new(),
        }
    }

    fn check(&self) -> bool {
        self.mark == SPACE_MARK
    }

    /// Start a read transaction: acquire the database-level shared lock.
    /// Blocks until there is no active writer.
    pub fn start_read(&self) -> Result<Token, LockError> {
        if !self.check() {
            return Err(LockError::InvalidHandle);
        }
        #[cfg(feature = "queued")]
        {
            self.lock
                .start_read()
                .map(|n| Token(n.raw()))
                .ok_or(LockError::PoolExhausted)
        }
        #[cfg(not(feature = "queued"))]
        {
            self.lock.start_read();
            Ok(Token(SIMPLE_TOKEN))
        }
    }

    /// End a read transaction started with the returned token.
    pub fn end_read(&self, token: Token) -> Result<(), LockError> {
        if !self.check() {
            return Err(LockError::InvalidHandle);
        }
        #[cfg(feature = "queued")]
        self.lock.end_read(NodeRef::from_raw(token.raw()));
        #[cfg(not(feature = "queued"))]
        {
            let _ = token;
            self.lock.end_read();
        }
        Ok(())
    }

    /// Start a write transaction: acquire the database-level exclusive
    /// lock. Blocks until granted.
    pub fn start_write(&self) -> Result<Token, LockError> {
        if !self.check() {
            return Err(LockError::InvalidHandle);
        }
        #[cfg(feature = "queued")]
        {
            self.lock
                .start_write()
                .map(|n| Token(n.raw()))
                .ok_or(LockError::PoolExhausted)
        }
        #[cfg(not(feature = "queued"))]
        {
            self.lock.start_write();
            Ok(Token(SIMPLE_TOKEN))
        }
    }

    /// End a write transaction started with the returned token.
    pub fn end_write(&self, token: Token) -> Result<(), LockError> {
        if !self.check() {
            return Err(LockError::InvalidHandle);
        }
        #[cfg(feature = "queued")]
        self.lock.end_write(NodeRef::from_raw(token.raw()));
        #[cfg(not(feature = "queued"))]
        {
            let _ = token;
            self.lock.end_write();
        }
        Ok(())
    }

    /// Shared access scoped to a guard; releases on drop.
    pub fn read(&self) -> Result<ReadGuard<'_>, LockError> {
        Ok(ReadGuard {
            token: self.start_read()?,
            space: self,
        })
    }

    /// Exclusive access scoped to a guard; releases on drop.
    pub fn write(&self) -> Result<WriteGuard<'_>, LockError> {
        Ok(WriteGuard {
            token: self.start_write()?,
            space: self,
        })
    }
}

/// Holds the database-level shared lock until dropped.
pub struct ReadGuard<'a> {
    space: &'a LockSpace,
    token: Token,
}

impl ReadGuard<'_> {
    /// The token backing this guard.
    pub fn token(&self) -> Token {
        self.token
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        // The space validated at acquire; the release cannot fail
        // differently.
        let _ = self.space.end_read(self.token);
    }
}

/// Holds the database-level exclusive lock until dropped.
pub struct WriteGuard<'a> {
    space: &'a LockSpace,
    token: Token,
}

impl WriteGuard<'_> {
    /// The token backing this guard.
    pub fn token(&self) -> Token {
        self.token
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let _ = self.space.end_write(self.token);
    }
}
