use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dblatch::simple::SimpleLock;
use rand::Rng;

#[test]
fn single_reader_counts_in_sync_word() {
    let lock = SimpleLock::new();
    lock.start_read();
    assert_eq!(lock.sync_word(), 0x02);
    lock.end_read();
    assert_eq!(lock.sync_word(), 0x00);
}

#[test]
fn single_writer_sets_flag() {
    let lock = SimpleLock::new();
    lock.start_write();
    assert_eq!(lock.sync_word(), 0x01);
    lock.end_write();
    assert_eq!(lock.sync_word(), 0x00);
}

#[test]
fn writer_waits_for_active_readers() {
    let lock = Arc::new(SimpleLock::new());
    lock.start_read();
    lock.start_read();
    assert_eq!(lock.sync_word(), 0x04);

    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let writer = {
        let lock = lock.clone();
        let entered = entered.clone();
        let release = release.clone();
        thread::spawn(move || {
            lock.start_write();
            entered.store(true, Ordering::SeqCst);
            while !release.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            lock.end_write();
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!entered.load(Ordering::SeqCst));

    lock.end_read();
    thread::sleep(Duration::from_millis(100));
    assert!(
        !entered.load(Ordering::SeqCst),
        "writer entered with a reader still active"
    );

    lock.end_read();
    while !entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }
    assert_eq!(lock.sync_word(), 0x01);
    release.store(true, Ordering::SeqCst);
    writer.join().unwrap();
    assert_eq!(lock.sync_word(), 0x00);
}

#[test]
fn readers_pass_a_waiting_writer() {
    let lock = Arc::new(SimpleLock::new());
    lock.start_read();

    let writer = {
        let lock = lock.clone();
        thread::spawn(move || {
            lock.start_write();
            lock.end_write();
        })
    };
    // Give the writer time to start spinning behind the reader.
    thread::sleep(Duration::from_millis(50));

    // A new reader gets in immediately; the waiting writer never sets
    // its flag while the count is nonzero.
    lock.start_read();
    assert_eq!(lock.sync_word() & 0x01, 0);
    assert!(lock.sync_word() >= 0x04);

    lock.end_read();
    lock.end_read();
    writer.join().unwrap();
    assert_eq!(lock.sync_word(), 0x00);
}

struct Race {
    lock: SimpleLock,
    value: UnsafeCell<u64>,
    writes: AtomicU64,
}

unsafe impl Sync for Race {}

#[test]
fn stress_mutual_exclusion() {
    let threads = 16;
    let race = Arc::new(Race {
        lock: SimpleLock::new(),
        value: UnsafeCell::new(0),
        writes: AtomicU64::new(0),
    });
    let stop = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let race = race.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                while !stop.load(Ordering::Relaxed) {
                    if rng.gen_ratio(1, 4) {
                        race.lock.start_write();
                        unsafe { *race.value.get() += 1 };
                        race.writes.fetch_add(1, Ordering::Relaxed);
                        race.lock.end_write();
                    } else {
                        race.lock.start_read();
                        let a = unsafe { *race.value.get() };
                        thread::yield_now();
                        let b = unsafe { *race.value.get() };
                        race.lock.end_read();
                        assert_eq!(a, b, "a write section overlapped a read section");
                    }
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(500));
    stop.store(true, Ordering::Relaxed);
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(
        unsafe { *race.value.get() },
        race.writes.load(Ordering::Relaxed)
    );
    assert_eq!(race.lock.sync_word(), 0x00);
}
