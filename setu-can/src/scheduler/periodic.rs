//! Drift-corrected periodic worker threads
//!
//! Each task waits one interval, runs its body, then waits
//! `max(0, interval - body_time)` before the next firing, so body latency
//! does not accumulate. The active flag is checked before the body runs and
//! again before the next firing is scheduled; a stop request also interrupts
//! the wait immediately.

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// What a task body wants after a firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    /// Deactivate the task; no further firings
    Stop,
}

/// Delay until the next firing given how long the body took
#[inline]
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Handle to a running periodic thread; stopping is idempotent
pub struct PeriodicTask {
    name: String,
    active: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn a named thread firing `body` every `interval`
    pub fn spawn<F>(name: &str, interval: Duration, mut body: F) -> Result<Self>
    where
        F: FnMut() -> TaskControl + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_active = Arc::clone(&active);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                run_loop(&thread_name, interval, &thread_active, &stop_rx, &mut body);
            })
            .map_err(|e| Error::Other(format!("Failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            active,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once stopped or the body asked to stop
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Deactivate and join; safe to call from the task's own thread
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        // Dropping the sender wakes the thread out of its wait
        self.stop_tx.take();

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("{}: thread panicked", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<F>(
    name: &str,
    interval: Duration,
    active: &AtomicBool,
    stop_rx: &Receiver<()>,
    body: &mut F,
) where
    F: FnMut() -> TaskControl,
{
    log::debug!("{}: started ({:?} period)", name, interval);
    let mut delay = interval;

    loop {
        match stop_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            // Stop requested (sender dropped) or explicit signal
            _ => break,
        }
        if !active.load(Ordering::Acquire) {
            break;
        }

        let started = Instant::now();
        let control = body();
        if control == TaskControl::Stop {
            active.store(false, Ordering::Release);
        }
        if !active.load(Ordering::Acquire) {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed > interval {
            log::warn!("{}: cycle overrun: {:?} (target: {:?})", name, elapsed, interval);
        }
        delay = next_delay(interval, elapsed);
    }

    log::debug!("{}: stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_next_delay_subtracts_elapsed() {
        let interval = Duration::from_millis(20);
        assert_eq!(
            next_delay(interval, Duration::from_millis(5)),
            Duration::from_millis(15)
        );
        assert_eq!(next_delay(interval, Duration::from_millis(25)), Duration::ZERO);
    }

    #[test]
    fn test_fires_repeatedly_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut task = PeriodicTask::spawn("test-tick", Duration::from_millis(5), move || {
            c.fetch_add(1, Ordering::Relaxed);
            TaskControl::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        task.stop();
        let after_stop = count.load(Ordering::Relaxed);
        assert!(after_stop >= 3, "only {} firings", after_stop);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::Relaxed), after_stop);
        assert!(!task.is_active());
    }

    #[test]
    fn test_stop_interrupts_long_wait() {
        let mut task = PeriodicTask::spawn("test-slow", Duration::from_secs(30), || {
            TaskControl::Continue
        })
        .unwrap();
        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_body_can_stop_itself() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = PeriodicTask::spawn("test-once", Duration::from_millis(2), move || {
            c.fetch_add(1, Ordering::Relaxed);
            TaskControl::Stop
        })
        .unwrap();

        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(!task.is_active());
    }

    #[test]
    fn test_drift_correction() {
        // Body takes 30ms of a 60ms period; uncorrected spacing would be 90ms
        let starts = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&starts);
        let mut task = PeriodicTask::spawn("test-drift", Duration::from_millis(60), move || {
            s.lock().push(Instant::now());
            thread::sleep(Duration::from_millis(30));
            TaskControl::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(400));
        task.stop();

        let starts = starts.lock();
        assert!(starts.len() >= 4, "only {} firings", starts.len());
        let total = *starts.last().unwrap() - starts[0];
        let mean_gap = total / (starts.len() as u32 - 1);
        assert!(
            mean_gap < Duration::from_millis(75),
            "mean gap {:?} shows accumulated drift",
            mean_gap
        );
    }
}
