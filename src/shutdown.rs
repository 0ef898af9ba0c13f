use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Shared stop signal. Clones observe the same state; triggering it wakes
/// every thread parked in `sleep`.
///
/// `is_triggered` is a single atomic load. The mutex only pairs with the
/// condvar for sleepers.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn trigger(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        // Sleepers test the flag under this lock.
        let _guard = self.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Sleeps for `dur` unless the signal fires first. Returns `true` if the
    /// full duration elapsed.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now().checked_add(dur);
        let mut guard = self.lock();
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            let wait = match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => deadline - now,
                None => dur,
            };
            guard = match self.inner.wake.wait_timeout(guard, wait) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
    }
}
