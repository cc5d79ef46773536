//! Resize-complete signal.
//!
//! A resettable one-shot notification. Each blocked waiter parks on its
//! own channel; raising the signal sends to every waiter, closing it
//! drops their senders so they observe a disconnect. A waiter that times
//! out or is cancelled removes its own entry.

use crate::error::{DeviceError, Result};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct SignalState {
    raised: bool,
    closed: bool,
    next_waiter: u64,
    waiters: Vec<(u64, Sender<()>)>,
}

pub struct ResizeSignal {
    inner: Mutex<SignalState>,
}

impl ResizeSignal {
    /// Create a signal in the raised state: nothing is in flight yet.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SignalState {
                raised: true,
                closed: false,
                next_waiter: 0,
                waiters: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SignalState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_raised(&self) -> bool {
        self.state().raised
    }

    /// Mark a resize as in flight.
    pub fn reset(&self) {
        self.state().raised = false;
    }

    /// Mark the resize as done and release every waiter.
    pub fn raise(&self) {
        let mut state = self.state();
        state.raised = true;
        for (_, waiter) in state.waiters.drain(..) {
            // A waiter that gave up has dropped its receiver
            let _ = waiter.send(());
        }
    }

    /// The device is gone. Current and future waiters get `NoDevice`.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.waiters.clear();
    }

    /// Number of parked waiters.
    pub fn waiter_count(&self) -> usize {
        self.state().waiters.len()
    }

    fn forget(&self, waiter: u64) {
        self.state().waiters.retain(|(id, _)| *id != waiter);
    }

    /// Block until the signal is raised, `cancel` fires, or `timeout`
    /// elapses.
    pub fn wait(&self, cancel: &CancelToken, timeout: Option<Duration>) -> Result<()> {
        let (waiter, done) = {
            let mut state = self.state();
            if state.closed {
                return Err(DeviceError::NoDevice);
            }
            if state.raised {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(DeviceError::Interrupted);
            }
            let (tx, rx) = bounded(1);
            let waiter = state.next_waiter;
            state.next_waiter += 1;
            state.waiters.push((waiter, tx));
            (waiter, rx)
        };

        let outcome = match timeout {
            Some(timeout) => select! {
                recv(done) -> msg => msg.map_err(|_| DeviceError::NoDevice),
                recv(cancel.rx) -> _ => Err(DeviceError::Interrupted),
                default(timeout) => Err(DeviceError::TimedOut),
            },
            None => select! {
                recv(done) -> msg => msg.map_err(|_| DeviceError::NoDevice),
                recv(cancel.rx) -> _ => Err(DeviceError::Interrupted),
            },
        };
        if outcome.is_err() {
            self.forget(waiter);
        }
        outcome
    }
}

impl Default for ResizeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupts blocked waits.
///
/// Cancellation is sticky: once cancelled, every wait using this token or
/// one of its clones returns `Interrupted` immediately.
#[derive(Clone)]
pub struct CancelToken {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Wake every wait using this token.
    pub fn cancel(&self) {
        // Dropping the only sender disconnects every receiver clone
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;

    #[test]
    fn test_raised_signal_returns_immediately() {
        let signal = ResizeSignal::new();
        assert!(signal.wait(&CancelToken::new(), None).is_ok());
    }

    #[test]
    fn test_raise_releases_waiter() {
        let signal = Arc::new(ResizeSignal::new());
        signal.reset();

        let (tx, rx) = unbounded();
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                tx.send(signal.wait(&CancelToken::new(), None)).unwrap();
            })
        };

        // Still blocked
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        signal.raise();
        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(result.is_ok());
        waiter.join().unwrap();
    }

    #[test]
    fn test_cancel_interrupts_waiter() {
        let signal = Arc::new(ResizeSignal::new());
        signal.reset();
        let cancel = CancelToken::new();

        let (tx, rx) = unbounded();
        let waiter = {
            let signal = Arc::clone(&signal);
            let cancel = cancel.clone();
            thread::spawn(move || {
                tx.send(signal.wait(&cancel, None)).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        cancel.cancel();

        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Err(DeviceError::Interrupted));
        waiter.join().unwrap();

        // Cancelling the wait does not complete the resize
        assert!(!signal.is_raised());
    }

    #[test]
    fn test_cancel_is_sticky() {
        let signal = ResizeSignal::new();
        signal.reset();
        let cancel = CancelToken::new();
        cancel.cancel();

        assert!(cancel.is_cancelled());
        assert_eq!(signal.wait(&cancel, None), Err(DeviceError::Interrupted));
        assert_eq!(signal.wait(&cancel.clone(), None), Err(DeviceError::Interrupted));
    }

    #[test]
    fn test_close_reports_no_device() {
        let signal = Arc::new(ResizeSignal::new());
        signal.reset();

        let (tx, rx) = unbounded();
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                tx.send(signal.wait(&CancelToken::new(), None)).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        signal.close();

        let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(result, Err(DeviceError::NoDevice));
        waiter.join().unwrap();

        assert_eq!(
            signal.wait(&CancelToken::new(), None),
            Err(DeviceError::NoDevice)
        );
    }

    #[test]
    fn test_wait_timeout() {
        let signal = ResizeSignal::new();
        signal.reset();

        let result = signal.wait(&CancelToken::new(), Some(Duration::from_millis(20)));
        assert_eq!(result, Err(DeviceError::TimedOut));
    }

    #[test]
    fn test_abandoned_waits_are_forgotten() {
        let signal = ResizeSignal::new();
        signal.reset();

        for _ in 0..1000 {
            let result = signal.wait(&CancelToken::new(), Some(Duration::from_micros(1)));
            assert_eq!(result, Err(DeviceError::TimedOut));
        }
        assert_eq!(signal.waiter_count(), 0);

        let signal = Arc::new(signal);
        let cancel = CancelToken::new();
        let handle = {
            let signal = Arc::clone(&signal);
            let cancel = cancel.clone();
            thread::spawn(move || signal.wait(&cancel, None))
        };
        while signal.waiter_count() == 0 {
            thread::yield_now();
        }

        cancel.cancel();
        assert_eq!(handle.join().unwrap(), Err(DeviceError::Interrupted));
        assert_eq!(signal.waiter_count(), 0);
    }

    #[test]
    fn test_reset_after_raise() {
        let signal = ResizeSignal::new();
        assert!(signal.is_raised());

        signal.reset();
        assert!(!signal.is_raised());

        signal.raise();
        assert!(signal.is_raised());
        assert_eq!(signal.waiter_count(), 0);
    }
}
