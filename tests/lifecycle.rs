mod common;
use common::Dn;

use ditlock::{LockManager, CACHED_HOLDERS_PER_THREAD, DEFAULT_LOCK_TIMEOUT, MINIMUM_BUCKET_COUNT};
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

fn uncached(timeout_ms: u64) -> LockManager<Dn> {
    LockManager::with_timeout(Duration::from_millis(timeout_ms)).thread_cache_capacity(0)
}

#[test]
fn bucket_counts_round_up() {
    let timeout = Duration::from_secs(1);
    assert_eq!(LockManager::<Dn>::new(timeout, 0).bucket_count(), 64);
    assert_eq!(LockManager::<Dn>::new(timeout, 64).bucket_count(), 64);
    assert_eq!(LockManager::<Dn>::new(timeout, 100).bucket_count(), 128);
    assert_eq!(LockManager::<Dn>::new(timeout, 1000).bucket_count(), 1024);
}

#[test]
fn default_configuration() {
    let manager = LockManager::<Dn>::default();
    assert_eq!(manager.lock_timeout(), DEFAULT_LOCK_TIMEOUT);
    assert!(manager.bucket_count() >= MINIMUM_BUCKET_COUNT);
    assert!(manager.bucket_count().is_power_of_two());
    assert_eq!(manager.resident_holders(), 0);
}

#[test]
fn table_empties_after_release() {
    let manager = uncached(100);
    let path = Dn::of("/root/branch/twig/leaf");

    let lock = manager.try_write_lock(&path).expect("write lock");
    assert_eq!(manager.resident_holders(), path.depth());
    lock.unlock();
    assert_eq!(manager.resident_holders(), 0);

    // a second cycle re-creates and re-collects the whole chain
    let lock = manager.try_read_lock(&path).expect("read lock");
    assert_eq!(manager.resident_holders(), path.depth());
    lock.unlock();
    assert_eq!(manager.resident_holders(), 0);
}

#[test]
fn shared_ancestors_survive_partial_release() {
    let manager = uncached(100);

    let left = manager.try_write_lock(&Dn::of("/a/b/c")).expect("left");
    let right = manager.try_write_lock(&Dn::of("/a/b/d")).expect("right");
    // a, a/b, a/b/c, a/b/d
    assert_eq!(manager.resident_holders(), 4);

    left.unlock();
    // the shared ancestors stay while the right leaf needs them
    assert_eq!(manager.resident_holders(), 3);

    right.unlock();
    assert_eq!(manager.resident_holders(), 0);
}

#[test]
fn failed_attempt_collapses_fresh_chain() {
    let manager = Arc::new(uncached(50));
    let blocker = manager
        .try_write_lock_subtree(&Dn::of("/a"))
        .expect("subtree lock");

    let m = manager.clone();
    let failed = thread::spawn(move || m.try_write_lock(&Dn::of("/a/b/c/d/e")).is_none());
    assert!(failed.join().unwrap());

    // the deep chain built for the failed attempt collapsed; only the
    // blocker's own holder remains
    assert_eq!(manager.resident_holders(), 1);

    blocker.unlock();
    assert_eq!(manager.resident_holders(), 0);
}

#[test]
fn thread_cache_flushes_on_thread_exit() {
    let manager = Arc::new(LockManager::<Dn>::with_timeout(Duration::from_millis(100)));
    let (released_tx, released_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let m = manager.clone();
    let worker = thread::spawn(move || {
        let lock = m.try_write_lock(&Dn::of("/corp/people/alice")).expect("write lock");
        lock.unlock();
        released_tx.send(()).unwrap();
        // hold the thread open until the main thread has looked at the table
        done_rx.recv().unwrap();
    });

    released_rx.recv().unwrap();
    // the lock is long gone, but the worker's cache still pins the chain
    assert_eq!(manager.resident_holders(), 3);

    done_tx.send(()).unwrap();
    worker.join().unwrap();
    // the cache drained when the worker exited
    assert_eq!(manager.resident_holders(), 0);
}

#[test]
fn cache_eviction_dereferences_cold_holders() {
    let manager = Arc::new(LockManager::<Dn>::with_timeout(Duration::from_millis(100)));

    let m = manager.clone();
    let worker = thread::spawn(move || {
        // touch far more roots than the cache can hold
        for i in 0..64 {
            let path = Dn::of(&format!("/tenant{}", i));
            m.try_write_lock(&path).expect("write lock").unlock();
        }
        m.resident_holders()
    });

    let resident_before_exit = worker.join().unwrap();
    assert_eq!(resident_before_exit, CACHED_HOLDERS_PER_THREAD);
    assert_eq!(manager.resident_holders(), 0);
}
