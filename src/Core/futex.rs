//! Wait/notify primitive for queues built with the wait capability.
//!
//! Futexes operate on 32-bit words, so instead of waiting on the 64-bit
//! cursor itself the signal keeps a dedicated event counter: waiters
//! snapshot it, re-check their predicate, and sleep until the producer bumps
//! it after a publish. On non-Linux targets the same shape is provided by a
//! parking_lot mutex/condvar pair.

use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(target_os = "linux")]
pub fn futex_wait(atomic: &AtomicU32, expected: u32) {
    // The word moving past `expected` already means a publish happened;
    // skip the syscall. The kernel re-validates the word under its own
    // lock, so a wake racing this check is never lost.
    if atomic.load(Ordering::Relaxed) != expected {
        return;
    }
    let word = atomic as *const AtomicU32 as *const u32;
    let no_timeout = std::ptr::null::<libc::timespec>();
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word,
            libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
            expected,
            no_timeout,
            std::ptr::null::<u32>(),
            0,
        );
    }
}

#[cfg(target_os = "linux")]
pub fn futex_wake(atomic: &AtomicU32, waiters: i32) {
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            atomic as *const AtomicU32 as *const u32,
            libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
            waiters,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Event counter a consumer can sleep on until the producer publishes.
///
/// Built disabled unless the queue was configured with the wait capability;
/// a disabled signal turns `wait_until` into a yield loop and `notify_*`
/// into no-ops, keeping the publish path free of wake syscalls.
pub struct WaitSignal {
    enabled: bool,
    seq: AtomicU32,
    #[cfg(not(target_os = "linux"))]
    lock: parking_lot::Mutex<()>,
    #[cfg(not(target_os = "linux"))]
    cond: parking_lot::Condvar,
}

impl WaitSignal {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            seq: AtomicU32::new(0),
            #[cfg(not(target_os = "linux"))]
            lock: parking_lot::Mutex::new(()),
            #[cfg(not(target_os = "linux"))]
            cond: parking_lot::Condvar::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Block until `ready()` holds. Spurious wakeups re-check the predicate.
    pub fn wait_until(&self, mut ready: impl FnMut() -> bool) {
        if !self.enabled {
            while !ready() {
                std::thread::yield_now();
            }
            return;
        }
        loop {
            let observed = self.seq.load(Ordering::Acquire);
            if ready() {
                return;
            }
            self.sleep(observed);
        }
    }

    pub fn notify_one(&self) {
        if !self.enabled {
            return;
        }
        self.seq.fetch_add(1, Ordering::Release);
        self.wake(1);
    }

    pub fn notify_all(&self) {
        if !self.enabled {
            return;
        }
        self.seq.fetch_add(1, Ordering::Release);
        self.wake(i32::MAX);
    }

    #[cfg(target_os = "linux")]
    fn sleep(&self, observed: u32) {
        futex_wait(&self.seq, observed);
    }

    #[cfg(target_os = "linux")]
    fn wake(&self, waiters: i32) {
        futex_wake(&self.seq, waiters);
    }

    #[cfg(not(target_os = "linux"))]
    fn sleep(&self, observed: u32) {
        let mut guard = self.lock.lock();
        // Re-check under the lock: a notify between our load and here would
        // otherwise be lost.
        if self.seq.load(Ordering::Acquire) != observed {
            return;
        }
        self.cond.wait(&mut guard);
    }

    #[cfg(not(target_os = "linux"))]
    fn wake(&self, waiters: i32) {
        let _guard = self.lock.lock();
        if waiters == 1 {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }
}
