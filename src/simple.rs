//! Reader-preference lock on a single sync word.
//!
//! Bit 0 of the word is the writer-active flag; the rest is the reader
//! count scaled by [`READER_INCR`]. Readers bump the count before they
//! know whether a writer holds the lock and keep it bumped while waiting,
//! so the moment the writer leaves, every waiting reader (and any newly
//! arriving one) proceeds. Writers can only enter through a CAS from an
//! all-zero word; under sustained reader traffic they starve. There is no
//! fairness between competing writers either.

use std::time::Duration;

use crate::atomic::{SyncVar, Word};
use crate::backoff::spin_wait;

/// Bit 0 of the sync word, set while a writer holds the lock.
const WRITER_ACTIVE: Word = 0x1;
/// Reader count step; keeps bit 0 free for the writer flag.
const READER_INCR: Word = 0x2;

#[cfg(windows)]
const SLEEP_STEP: Duration = Duration::from_millis(1);
#[cfg(not(windows))]
const SLEEP_STEP: Duration = Duration::from_micros(500);

/// The simple database-wide reader/writer lock.
pub struct SimpleLock {
    sync_word: SyncVar,
}

impl SimpleLock {
    pub fn new() -> SimpleLock {
        SimpleLock {
            sync_word: SyncVar::new(0),
        }
    }

    /// Acquire exclusive access. Blocks until no writer holds the lock
    /// and the reader count is zero.
    pub fn start_write(&self) {
        // One attempt before committing to the spin loop.
        if self.sync_word.cas(0, WRITER_ACTIVE) {
            return;
        }
        spin_wait(SLEEP_STEP, || {
            self.sync_word.peek() == 0 && self.sync_word.cas(0, WRITER_ACTIVE)
        });
    }

    /// Release exclusive access. The prior state is not validated.
    pub fn end_write(&self) {
        self.sync_word.and(!WRITER_ACTIVE);
    }

    /// Acquire shared access. Blocks only while a writer is active.
    pub fn start_read(&self) {
        // The count stays bumped while we wait; arriving writers keep
        // seeing readers present. This is the reader-preference property.
        let seen = self.sync_word.fetch_add(READER_INCR);
        if seen & WRITER_ACTIVE == 0 {
            return;
        }
        spin_wait(SLEEP_STEP, || self.sync_word.peek() & WRITER_ACTIVE == 0);
    }

    /// Release shared access.
    pub fn end_read(&self) {
        self.sync_word.add(-READER_INCR);
    }

    /// Raw sync word, for diagnostics.
    pub fn sync_word(&self) -> Word {
        self.sync_word.get()
    }
}

impl Default for SimpleLock {
    fn default() -> SimpleLock {
        SimpleLock::new()
    }
}
