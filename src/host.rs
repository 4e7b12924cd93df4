//! Lazily started, process-lifetime runtime host.
//!
//! [`RuntimeHost`] holds the one host handle a context ever starts. The first acquisition runs
//! the start-up closure while every concurrent caller blocks on the same cell; afterwards the
//! handle is read without locking. A failed start is remembered as the absent value, so later
//! callers observe the same failure instead of retrying. Only [`RuntimeHost::take`], which
//! needs exclusive access, returns the cell to its uninitialized state.

use std::sync::OnceLock;

/// The lazily initialized host handle of a runtime context.
pub struct RuntimeHost<H> {
    handle: OnceLock<Option<H>>,
}

impl<H> Default for RuntimeHost<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> RuntimeHost<H> {
    /// Creates an uninitialized host cell
    pub fn new() -> Self {
        RuntimeHost {
            handle: OnceLock::new(),
        }
    }

    /// Returns the host handle, running `start` if no acquisition happened yet.
    ///
    /// `start` runs at most once per initialization, no matter how many threads race here.
    /// Returning `None` from it marks the host as failed until [`RuntimeHost::take`] resets it.
    ///
    /// # Arguments
    ///
    /// * `start` - Performs the start-up sequence and yields the handle on success
    pub fn get_or_init<F>(&self, start: F) -> Option<&H>
    where
        F: FnOnce() -> Option<H>,
    {
        self.handle.get_or_init(start).as_ref()
    }

    /// Returns the host handle if a successful initialization already happened
    pub fn get(&self) -> Option<&H> {
        self.handle.get().and_then(Option::as_ref)
    }

    /// Returns true once an initialization ran, whether or not it succeeded
    pub fn is_initialized(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Takes the handle out and returns the cell to its uninitialized state
    pub fn take(&mut self) -> Option<H> {
        self.handle.take().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_concurrent_init_runs_once() {
        let host = RuntimeHost::new();
        let starts = AtomicUsize::new(0);
        let barrier = Barrier::new(16);

        let seen: Vec<usize> = thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let handle = host.get_or_init(|| {
                            thread::sleep(std::time::Duration::from_millis(5));
                            Some(starts.fetch_add(1, Ordering::SeqCst) + 100)
                        });
                        *handle.unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(seen.iter().all(|&value| value == 100));
    }

    #[test]
    fn test_failed_start_is_remembered() {
        let host: RuntimeHost<u32> = RuntimeHost::new();
        let mut starts = 0;

        assert!(host
            .get_or_init(|| {
                starts += 1;
                None
            })
            .is_none());
        assert!(host.is_initialized());
        assert!(host.get_or_init(|| Some(7)).is_none());
        assert!(host.get().is_none());
        assert_eq!(starts, 1);
    }

    #[test]
    fn test_take_resets() {
        let mut host = RuntimeHost::new();
        assert!(!host.is_initialized());
        assert_eq!(host.get_or_init(|| Some(1)), Some(&1));
        assert_eq!(host.get(), Some(&1));

        assert_eq!(host.take(), Some(1));
        assert!(!host.is_initialized());
        assert!(host.get().is_none());
        assert_eq!(host.take(), None);

        assert_eq!(host.get_or_init(|| Some(2)), Some(&2));
    }
}
