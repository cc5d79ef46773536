//! Checked reference counter.
//!
//! Overflow and underflow are reported instead of wrapping. Callers treat
//! the transition to zero as the only trigger for cleanup.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefCountError {
    #[error("reference count would overflow")]
    Overflow,

    #[error("reference count underflow; use-after-free")]
    Underflow,
}

#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicU64,
}

impl RefCount {
    pub const fn new(initial: u64) -> Self {
        Self {
            count: AtomicU64::new(initial),
        }
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Take a reference. Returns the new count.
    pub fn acquire(&self) -> Result<u64, RefCountError> {
        self.update(|count| count.checked_add(1).ok_or(RefCountError::Overflow))
    }

    /// Drop a reference. Returns the new count; zero means the caller
    /// released the last one.
    pub fn release(&self) -> Result<u64, RefCountError> {
        self.update(|count| count.checked_sub(1).ok_or(RefCountError::Underflow))
    }

    fn update(
        &self,
        step: impl Fn(u64) -> Result<u64, RefCountError>,
    ) -> Result<u64, RefCountError> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            let next = step(current)?;
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(next),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_release() {
        let count = RefCount::new(0);

        assert_eq!(count.acquire(), Ok(1));
        assert_eq!(count.acquire(), Ok(2));
        assert_eq!(count.release(), Ok(1));
        assert_eq!(count.release(), Ok(0));
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_underflow_is_reported() {
        let count = RefCount::new(0);

        assert_eq!(count.release(), Err(RefCountError::Underflow));
        // The failed release leaves the counter where it was
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_overflow_is_reported() {
        let count = RefCount::new(u64::MAX);

        assert_eq!(count.acquire(), Err(RefCountError::Overflow));
        assert_eq!(count.get(), u64::MAX);
    }

    #[test]
    fn test_concurrent_updates() {
        let count = Arc::new(RefCount::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let count = Arc::clone(&count);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        count.acquire().unwrap();
                        count.release().unwrap();
                    }
                    count.acquire().unwrap();
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(count.get(), 8);
    }
}
