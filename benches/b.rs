use criterion::{black_box, criterion_group, criterion_main, Criterion};

use std::sync::Arc;
use std::thread;

use dblatch::queued::QueuedLock;
use dblatch::simple::SimpleLock;

fn simple_contend(readers: usize, ops: usize) {
    let lock = Arc::new(SimpleLock::new());

    let mut t = Vec::with_capacity(readers);
    for _ in 0..readers {
        let lock = lock.clone();
        t.push(thread::spawn(move || {
            for _ in 0..ops {
                lock.start_read();
                lock.end_read();
            }
        }));
    }

    for _ in 0..ops / 10 {
        lock.start_write();
        lock.end_write();
    }

    for t in t {
        t.join().unwrap();
    }
}

fn queued_contend(readers: usize, ops: usize) {
    let lock = Arc::new(QueuedLock::new(readers * 2 + 2));

    let mut t = Vec::with_capacity(readers);
    for _ in 0..readers {
        let lock = lock.clone();
        t.push(thread::spawn(move || {
            for _ in 0..ops {
                let tok = loop {
                    match lock.start_read() {
                        Some(tok) => break tok,
                        None => thread::yield_now(),
                    }
                };
                lock.end_read(tok);
            }
        }));
    }

    for _ in 0..ops / 10 {
        let tok = loop {
            match lock.start_write() {
                Some(tok) => break tok,
                None => thread::yield_now(),
            }
        };
        lock.end_write(tok);
    }

    for t in t {
        t.join().unwrap();
    }
}

fn simple_r4(c: &mut Criterion) {
    c.bench_function("simple_r4", |b| {
        b.iter(|| simple_contend(4, black_box(1000)))
    });
}

fn queued_r4(c: &mut Criterion) {
    c.bench_function("queued_r4", |b| {
        b.iter(|| queued_contend(4, black_box(1000)))
    });
}

criterion_group!(benches, simple_r4, queued_r4);
criterion_main!(benches);
