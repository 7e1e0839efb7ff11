// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// PipeMutex: ownership rules, probes, scoped helpers and cross-process
// exclusion.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pipe_ipc::{Error, PipeMutex, Process, TokenPipe};

#[test]
fn new_mutex_is_unlocked() {
    let mtx = PipeMutex::new().expect("new");
    assert!(!mtx.is_locked().expect("is_locked"));
    assert!(!mtx.is_owned());
}

#[test]
fn lock_unlock() {
    let mtx = PipeMutex::new().expect("new");

    mtx.lock().expect("lock");
    assert!(mtx.is_locked().expect("is_locked"));
    assert!(mtx.is_owned());

    mtx.unlock().expect("unlock");
    assert!(!mtx.is_locked().expect("is_locked"));
    assert!(!mtx.is_owned());
}

#[test]
fn multiple_cycles() {
    let mtx = PipeMutex::new().expect("new");
    for _ in 0..100 {
        mtx.lock().expect("lock");
        mtx.unlock().expect("unlock");
    }
    assert!(!mtx.is_locked().expect("is_locked"));
}

#[test]
fn try_lock() {
    let mtx = Arc::new(PipeMutex::new().expect("new"));

    assert!(mtx.try_lock().expect("try_lock"));
    assert!(mtx.is_owned());

    let m2 = Arc::clone(&mtx);
    let other = thread::spawn(move || m2.try_lock().expect("try_lock"))
        .join()
        .unwrap();
    assert!(!other, "second try_lock must fail while held");

    mtx.unlock().expect("unlock");
}

#[test]
fn relock_in_same_thread_fails() {
    let mtx = PipeMutex::new().expect("new");
    mtx.lock().expect("lock");

    assert!(matches!(mtx.lock(), Err(Error::AlreadyLocked)));
    // Still held, still ours.
    assert!(mtx.is_owned());
    assert!(mtx.is_locked().expect("is_locked"));

    mtx.unlock().expect("unlock");
}

#[test]
fn unlock_without_lock_fails() {
    let mtx = PipeMutex::new().expect("new");
    assert!(matches!(mtx.unlock(), Err(Error::NotLocked)));
    // The failed unlock did not add a second token.
    mtx.lock().expect("lock");
    assert!(!mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn unlock_from_other_thread_fails() {
    let mtx = Arc::new(PipeMutex::new().expect("new"));
    mtx.lock().expect("lock");

    let m2 = Arc::clone(&mtx);
    let res = thread::spawn(move || m2.unlock()).join().unwrap();
    assert!(matches!(res, Err(Error::NotOwner)));

    // The token never moved.
    assert!(mtx.is_locked().expect("is_locked"));
    assert!(mtx.is_owned());
    mtx.unlock().expect("unlock");
}

#[test]
fn is_locked_has_no_side_effect() {
    let mtx = PipeMutex::new().expect("new");
    for _ in 0..100 {
        assert!(!mtx.is_locked().expect("is_locked"));
    }
    assert!(mtx.try_lock().expect("try_lock"));
    for _ in 0..100 {
        assert!(mtx.is_locked().expect("is_locked"));
    }
    mtx.unlock().expect("unlock");
    assert!(mtx.try_lock().expect("try_lock"));
    mtx.unlock().expect("unlock");
}

#[test]
fn critical_section() {
    let mtx = Arc::new(PipeMutex::new().expect("new"));
    let counter = Arc::new(AtomicI32::new(0));
    let iterations = 100;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mtx = Arc::clone(&mtx);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..iterations {
                    mtx.lock().expect("lock");
                    // Non-atomic read-modify-write, protected only by the mutex.
                    let v = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(v + 1, Ordering::Relaxed);
                    mtx.unlock().expect("unlock");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Relaxed), iterations * 4);
}

#[test]
fn lock_contention() {
    let mtx = Arc::new(PipeMutex::new().expect("new"));
    let in_cs = Arc::new(AtomicBool::new(false));
    let violation = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let mtx = Arc::clone(&mtx);
            let in_cs = Arc::clone(&in_cs);
            let violation = Arc::clone(&violation);
            thread::spawn(move || {
                for _ in 0..30 {
                    mtx.lock().expect("lock");
                    if in_cs.swap(true, Ordering::SeqCst) {
                        violation.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_micros(50));
                    in_cs.store(false, Ordering::SeqCst);
                    mtx.unlock().expect("unlock");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert!(!violation.load(Ordering::SeqCst), "mutual exclusion violated");
}

#[test]
fn synchronize_returns_body_value() {
    let mtx = PipeMutex::new().expect("new");
    let v = mtx
        .synchronize(|| {
            assert!(mtx.is_owned());
            42
        })
        .expect("synchronize");
    assert_eq!(v, 42);
    assert!(!mtx.is_locked().expect("is_locked"));
}

#[test]
fn synchronize_propagates_body_error_and_unlocks() {
    let mtx = PipeMutex::new().expect("new");
    let r: Result<(), &str> = mtx.synchronize(|| Err("boom")).expect("synchronize");
    assert_eq!(r, Err("boom"));
    assert!(!mtx.is_locked().expect("is_locked"));
}

#[test]
fn synchronize_unlocks_on_panic() {
    let mtx = PipeMutex::new().expect("new");
    let r = panic::catch_unwind(AssertUnwindSafe(|| {
        mtx.synchronize(|| panic!("inside critical section")).ok();
    }));
    assert!(r.is_err());
    assert!(!mtx.is_locked().expect("is_locked"));
}

#[test]
fn synchronize_tolerates_manual_unlock() {
    let mtx = PipeMutex::new().expect("new");
    mtx.synchronize(|| mtx.unlock().expect("unlock"))
        .expect("synchronize");
    assert!(!mtx.is_locked().expect("is_locked"));
}

#[test]
fn sleep_scoped_releases_while_sleeping() {
    let mtx = Arc::new(PipeMutex::new().expect("new"));
    let m2 = Arc::clone(&mtx);

    let sleeper = thread::spawn(move || {
        m2.lock().expect("lock");
        m2.sleep_scoped(Some(Duration::from_millis(300)))
            .expect("sleep_scoped");
        let owned = m2.is_owned();
        m2.unlock().expect("unlock");
        owned
    });

    // The sleeper holds the mutex only briefly before sleeping.
    let mut got = false;
    for _ in 0..100 {
        if mtx.try_lock().expect("try_lock") {
            got = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(got, "mutex should be free during sleep_scoped");
    mtx.unlock().expect("unlock");

    assert!(sleeper.join().unwrap(), "sleep_scoped must re-lock");
}

#[test]
fn sleep_scoped_without_timeout_wakes_on_unpark() {
    let mtx = Arc::new(PipeMutex::new().expect("new"));
    let m2 = Arc::clone(&mtx);

    let sleeper = thread::spawn(move || {
        m2.lock().expect("lock");
        m2.sleep_scoped(None).expect("sleep_scoped");
        let owned = m2.is_owned();
        m2.unlock().expect("unlock");
        owned
    });

    // Wait until the sleeper has released the mutex.
    loop {
        if mtx.try_lock().expect("try_lock") {
            mtx.unlock().expect("unlock");
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    sleeper.thread().unpark();
    assert!(sleeper.join().unwrap());
}

#[test]
fn child_blocks_until_parent_unlocks() {
    let mtx = PipeMutex::new().expect("new");
    mtx.lock().expect("lock");

    let child = Process::spawn(|| {
        if mtx.lock().is_err() {
            return 1;
        }
        if mtx.unlock().is_err() {
            return 2;
        }
        0
    })
    .expect("spawn");

    let early = child.join(Some(Duration::from_millis(200))).expect("join");
    assert!(early.is_none(), "child must block while the parent holds the lock");

    mtx.unlock().expect("unlock");
    let r = child.join(Some(Duration::from_secs(10))).expect("join");
    assert!(r.expect("child exited").success());
}

#[test]
fn child_cannot_unlock_inherited_lock() {
    let mtx = PipeMutex::new().expect("new");
    mtx.lock().expect("lock");

    let child = Process::spawn(|| match mtx.unlock() {
        Err(Error::NotOwner) => 0,
        _ => 1,
    })
    .expect("spawn");

    assert!(child.value().expect("value").success());
    assert!(mtx.is_locked().expect("is_locked"));
    mtx.unlock().expect("unlock");
}

#[test]
fn processes_exclude_each_other() {
    let mtx = PipeMutex::new().expect("new");
    let log = TokenPipe::new().expect("log");
    let rounds = 20;

    let children: Vec<_> = (0..3)
        .map(|_| {
            Process::spawn(|| {
                for _ in 0..rounds {
                    let ok = mtx
                        .synchronize(|| {
                            log.write_all(b"[").is_ok() && {
                                thread::sleep(Duration::from_micros(200));
                                log.write_all(b"]").is_ok()
                            }
                        })
                        .unwrap_or(false);
                    if !ok {
                        return 1;
                    }
                }
                0
            })
            .expect("spawn")
        })
        .collect();

    for c in &children {
        assert!(c.value().expect("value").success());
    }

    let mut seen = vec![0u8; 3 * rounds * 2];
    log.read_exact(&mut seen).expect("read log");
    for pair in seen.chunks(2) {
        assert_eq!(pair, b"[]", "critical sections interleaved");
    }
}
