//! Stall detection for a single `open()` invocation.
//!
//! # Design
//! The watchdog is its own thread. Every `interval` it bumps a shared
//! activity counter; the I/O path resets that counter after each successful
//! chunk. When the counter reaches `timeout / interval` the connection has
//! made no forward progress for a whole timeout window and the stall callback
//! runs once. The callback is expected to tear the connection down, which
//! unblocks whatever read or write the I/O thread is parked in.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll ticks elapsed since the last I/O progress.
#[derive(Debug, Default)]
pub struct ActivityCounter(AtomicU32);

impl ActivityCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record forward progress.
    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }

    pub fn elapsed(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    fn tick(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Handle to a running watchdog thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Watchdog {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Number of idle polls that count as a stall. Never zero, so a timeout
    /// shorter than one interval still waits one interval.
    pub fn budget(timeout: Duration, interval: Duration) -> u32 {
        let ticks = timeout.as_millis() / interval.as_millis().max(1);
        ticks.clamp(1, u32::MAX as u128) as u32
    }

    pub fn start<F>(
        timeout: Duration,
        interval: Duration,
        activity: Arc<ActivityCounter>,
        on_stall: F,
    ) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let budget = Self::budget(timeout, interval);
        activity.reset();
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("urlnet-watchdog".into())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                let elapsed = activity.tick();
                tracing::trace!(elapsed, budget, "watchdog tick");
                if elapsed >= budget {
                    tracing::debug!(?timeout, "no i/o progress; declaring stall");
                    on_stall();
                    return;
                }
            })?;
        Ok(Self {
            stop: Some(stop),
            thread: Some(thread),
        })
    }

    /// Stop polling and wait for the thread. If the stall callback is
    /// already running this waits for it to return.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(20);

    #[test]
    fn budget_is_never_zero() {
        assert_eq!(Watchdog::budget(Duration::from_millis(15_000), Duration::from_millis(200)), 75);
        assert_eq!(Watchdog::budget(Duration::from_millis(50), Duration::from_millis(200)), 1);
    }

    #[test]
    fn fires_after_idle_timeout() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let started = Instant::now();
        let dog = Watchdog::start(TICK * 3, TICK, Arc::new(ActivityCounter::new()), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        while !fired.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(fired.load(Ordering::SeqCst));
        assert!(started.elapsed() >= TICK * 3);
        dog.stop();
    }

    #[test]
    fn activity_postpones_the_stall() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let activity = Arc::new(ActivityCounter::new());
        let dog = Watchdog::start(TICK * 10, TICK, activity.clone(), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        for _ in 0..40 {
            thread::sleep(TICK / 2);
            activity.reset();
        }
        assert!(!fired.load(Ordering::SeqCst));
        dog.stop();
    }

    #[test]
    fn stop_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let dog = Watchdog::start(TICK * 2, TICK, Arc::new(ActivityCounter::new()), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        dog.stop();
        thread::sleep(TICK * 4);
        assert!(!fired.load(Ordering::SeqCst));
    }
}
