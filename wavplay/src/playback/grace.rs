//! Cancellable post-playback wait
//!
//! After the last chunk is written, queued audio still has to render. The
//! worker waits out a grace period on a condvar so the controller can cut it
//! short from another thread.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How a grace wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceOutcome {
    /// Full period elapsed
    Elapsed,
    /// `cancel()` was called
    Cancelled,
    /// The tick callback asked to stop waiting
    Interrupted,
}

/// One-shot cancellation flag with a timed wait
#[derive(Debug, Default)]
pub struct GraceSignal {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl GraceSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake any waiter; later waits return immediately.
    pub fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `action` unless already cancelled, then mark the signal cancelled.
    ///
    /// Holds the lock while `action` runs, so a concurrent `cancel()` either
    /// wins outright or waits for `action` to finish. Returns whether
    /// `action` ran.
    pub fn claim<F: FnOnce()>(&self, action: F) -> bool {
        let mut cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        if *cancelled {
            return false;
        }
        *cancelled = true;
        action();
        drop(cancelled);
        self.condvar.notify_all();
        true
    }

    /// Block for up to `period`.
    ///
    /// `on_tick` runs roughly every `tick`; returning `false` ends the wait
    /// with `Interrupted`.
    pub fn wait<F>(&self, period: Duration, tick: Duration, mut on_tick: F) -> GraceOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + period;
        let tick = tick.max(Duration::from_millis(1));
        let mut cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if *cancelled {
                return GraceOutcome::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return GraceOutcome::Elapsed;
            }

            let timeout = (deadline - now).min(tick);
            cancelled = self
                .condvar
                .wait_timeout(cancelled, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;

            if *cancelled {
                return GraceOutcome::Cancelled;
            }
            drop(cancelled);
            let keep_waiting = on_tick();
            cancelled = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
            if !keep_waiting {
                return GraceOutcome::Interrupted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wait_elapses() {
        let signal = GraceSignal::new();
        let start = Instant::now();
        let outcome = signal.wait(Duration::from_millis(50), Duration::from_millis(10), || true);
        assert_eq!(outcome, GraceOutcome::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_cancel_short_circuits_wait() {
        let signal = Arc::new(GraceSignal::new());
        let canceller = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                signal.cancel();
            })
        };

        let start = Instant::now();
        let outcome = signal.wait(Duration::from_secs(10), Duration::from_millis(100), || true);
        canceller.join().unwrap();

        assert_eq!(outcome, GraceOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_before_wait() {
        let signal = GraceSignal::new();
        signal.cancel();
        assert!(signal.is_cancelled());
        assert_eq!(
            signal.wait(Duration::from_secs(10), Duration::from_millis(10), || true),
            GraceOutcome::Cancelled
        );
    }

    #[test]
    fn test_claim_runs_once() {
        let signal = GraceSignal::new();
        let mut runs = 0;
        assert!(signal.claim(|| runs += 1));
        assert!(!signal.claim(|| runs += 1));
        assert_eq!(runs, 1);
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_claim_after_cancel_does_nothing() {
        let signal = GraceSignal::new();
        signal.cancel();
        let mut ran = false;
        assert!(!signal.claim(|| ran = true));
        assert!(!ran);
    }

    #[test]
    fn test_cancel_waits_for_running_claim() {
        let signal = Arc::new(GraceSignal::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let claimer = {
            let signal = Arc::clone(&signal);
            let order = Arc::clone(&order);
            std::thread::spawn(move || {
                signal.claim(|| {
                    started_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    order.lock().unwrap().push("claim");
                })
            })
        };
        started_rx.recv().unwrap();
        signal.cancel();
        order.lock().unwrap().push("cancel");

        assert!(claimer.join().unwrap());
        assert_eq!(*order.lock().unwrap(), vec!["claim", "cancel"]);
    }

    #[test]
    fn test_tick_can_interrupt() {
        let signal = GraceSignal::new();
        let mut ticks = 0;
        let outcome = signal.wait(Duration::from_secs(10), Duration::from_millis(5), || {
            ticks += 1;
            ticks < 3
        });
        assert_eq!(outcome, GraceOutcome::Interrupted);
        assert_eq!(ticks, 3);
    }
}
