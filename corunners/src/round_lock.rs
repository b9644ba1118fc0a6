use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

/// Spinning mutual exclusion for one barrier round.
///
/// Never parks the thread.
#[derive(Debug, Default)]
pub struct RoundLock {
    locked: AtomicBool,
}

impl RoundLock {
    pub const fn new() -> RoundLock {
        RoundLock {
            locked: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Spin on a plain load so waiting cores keep the line shared.
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
    }

    #[inline]
    pub fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;
    use std::sync::Arc;
    use std::thread;

    struct Guarded {
        lock: RoundLock,
        value: UnsafeCell<u64>,
    }

    unsafe impl Sync for Guarded {}

    #[test]
    fn acquire_release() {
        let lock = RoundLock::new();
        assert!(!lock.is_locked());
        lock.acquire();
        assert!(lock.is_locked());
        lock.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn mutual_exclusion() {
        let guarded = Arc::new(Guarded {
            lock: RoundLock::new(),
            value: UnsafeCell::new(0),
        });

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let guarded = Arc::clone(&guarded);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        guarded.lock.acquire();
                        unsafe { *guarded.value.get() += 1 };
                        guarded.lock.release();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(unsafe { *guarded.value.get() }, 4_000);
    }
}
