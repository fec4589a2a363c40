//! Wake and hand-off primitives shared by the pipeline
//!
//! A [`Signal`] is a single slot that is either unset or set by one thread. Waiting with `yield` skips
//! wake-ups caused by the waiting thread itself, so a consumer can release a container and then sleep
//! until some *other* thread has touched it. [`Guarded`] builds a lock on top: acquiring waits for the
//! signal and resets it, releasing sets it again.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

#[derive(Debug)]
struct SignalState {
    set: bool,
    setter: Option<ThreadId>,
}

/// Single-slot wake/reset event
#[derive(Debug)]
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Signal {
    /// Create a signal, optionally already set by nobody in particular.
    pub fn new(set: bool) -> Self {
        Self {
            state: Mutex::new(SignalState { set, setter: None }),
            cond: Condvar::new(),
        }
    }

    /// Mark the signal as set by the calling thread and wake one waiter.
    pub fn set(&self) {
        let mut state = self.state.lock();
        state.set = true;
        state.setter = Some(thread::current().id());
        self.cond.notify_one();
    }

    /// Block until the signal is set.
    ///
    /// With `yield_to_others`, a signal set by the calling thread does not count. With `reset`, the signal
    /// is cleared as part of the same wake-up.
    pub fn wait(&self, yield_to_others: bool, reset: bool) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            if state.set {
                if !(yield_to_others && state.setter == Some(me)) {
                    break;
                }
                // pass our own wake-up on to someone who can use it
                self.cond.notify_one();
            }
            self.cond.wait(&mut state);
        }

        if reset {
            state.set = false;
            state.setter = None;
        }
    }

    /// Whether the signal is currently set
    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }
}

/// A container that can only be reached through its [`Signal`]
///
/// Locking waits on the signal with reset, so at most one thread holds the contents at a time. Dropping the
/// guard sets the signal, which both releases the lock and tells waiters the contents may have changed.
/// The contents sit behind a [`Mutex`] that is only taken once the signal has been claimed, so it never
/// contends.
pub struct Guarded<T> {
    signal: Signal,
    value: Mutex<T>,
}

impl<T: Default> Default for Guarded<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Guarded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded")
            .field("unlocked", &self.signal.is_set())
            .finish_non_exhaustive()
    }
}

impl<T> Guarded<T> {
    /// Wrap `value`, starting unlocked.
    pub fn new(value: T) -> Self {
        Self {
            signal: Signal::new(true),
            value: Mutex::new(value),
        }
    }

    /// Acquire the contents.
    ///
    /// With `yield_to_others`, a release by the calling thread is not enough: the call returns only after
    /// another thread has held and released the contents.
    pub fn lock(&self, yield_to_others: bool) -> GuardedRef<'_, T> {
        self.signal.wait(yield_to_others, true);
        GuardedRef {
            signal: &self.signal,
            value: Some(self.value.lock()),
        }
    }

    /// Unwrap the contents.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

/// Exclusive access to the contents of a [`Guarded`]
pub struct GuardedRef<'a, T> {
    signal: &'a Signal,
    // taken on drop so the mutex is free before the signal wakes anyone
    value: Option<MutexGuard<'a, T>>,
}

impl<T> Deref for GuardedRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("guard used after release"),
        }
    }
}

impl<T> DerefMut for GuardedRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("guard used after release"),
        }
    }
}

impl<T> Drop for GuardedRef<'_, T> {
    fn drop(&mut self) {
        self.value.take();
        self.signal.set();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use crate::sync::{Guarded, Signal};

    #[test]
    fn guarded_excludes_concurrent_access() {
        let counter = Guarded::new(0usize);
        let inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let mut value = counter.lock(false);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        *value += 1;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(counter.into_inner(), 4000);
    }

    #[test]
    fn yield_waits_for_another_thread() {
        let shared = Guarded::new(Vec::<&str>::new());

        thread::scope(|s| {
            // release once ourselves, then wait for the producer
            drop(shared.lock(false));
            let consumer = s.spawn(|| {
                let mut seen = shared.lock(false).clone();
                while seen.is_empty() {
                    seen = shared.lock(true).clone();
                }
                seen
            });

            thread::sleep(Duration::from_millis(20));
            shared.lock(false).push("produced");

            assert_eq!(consumer.join().expect("consumer"), vec!["produced"]);
        });
    }

    fn assert_shareable<T: Send + Sync>() {}

    #[test]
    fn guarded_is_shareable_for_send_contents() {
        assert_shareable::<Guarded<Vec<Vec<u8>>>>();
        assert_shareable::<Guarded<Option<crate::error::Error>>>();

        let slot = Guarded::new(Some(1u8));
        thread::scope(|s| {
            s.spawn(|| *slot.lock(false) = None);
        });
        assert_eq!(slot.into_inner(), None);
    }

    #[test]
    fn signal_wakes_waiter() {
        let signal = Signal::default();

        thread::scope(|s| {
            let waiter = s.spawn(|| signal.wait(false, true));
            thread::sleep(Duration::from_millis(10));
            signal.set();
            waiter.join().expect("waiter");
        });

        assert!(!signal.is_set());
    }
}
