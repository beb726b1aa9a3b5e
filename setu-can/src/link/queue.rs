//! Bounded outbound line queue
//!
//! Lock-free ring of pending lines. When full, the oldest line is evicted so
//! the freshest periodic frames always get out. A single-slot wake channel
//! lets the drain thread sleep until something is queued.

use crossbeam_channel::{Receiver, Sender, bounded};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Queue capacity in lines
pub const MAX_SERIAL_QUEUE: usize = 512;

/// FIFO of CR-terminated lines awaiting the drain thread
pub struct WriteQueue {
    lines: ArrayQueue<String>,
    dropped: AtomicU64,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            lines: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
            wake_tx,
            wake_rx,
        }
    }

    /// Append a line (a CR is added); returns true if an older line was evicted
    pub fn push(&self, line: &str) -> bool {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\r');

        let evicted = self.lines.force_push(framed).is_some();
        if evicted {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 100 == 0 {
                log::warn!("SLCAN: write queue full, {} lines dropped so far", total);
            }
        }
        // A pending wake token is enough; ignore Full
        let _ = self.wake_tx.try_send(());
        evicted
    }

    /// Next line, oldest first
    pub fn pop(&self) -> Option<String> {
        self.lines.pop()
    }

    /// Block until something may be queued or the timeout elapses
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }

    /// Nudge a waiting drain thread (used on shutdown)
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lines.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.lines.capacity()
    }

    /// Lines evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything queued
    pub fn clear(&self) {
        while self.lines.pop().is_some() {}
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new(MAX_SERIAL_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_with_terminator() {
        let queue = WriteQueue::new(4);
        queue.push("O");
        queue.push("t1230");
        assert_eq!(queue.pop().as_deref(), Some("O\r"));
        assert_eq!(queue.pop().as_deref(), Some("t1230\r"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let queue = WriteQueue::new(MAX_SERIAL_QUEUE);
        for i in 0..600 {
            queue.push(&format!("L{}", i));
        }
        assert_eq!(queue.len(), MAX_SERIAL_QUEUE);
        assert_eq!(queue.dropped(), 88);

        let survivors: Vec<String> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(survivors.first().map(String::as_str), Some("L88\r"));
        assert_eq!(survivors.last().map(String::as_str), Some("L599\r"));
    }

    #[test]
    fn test_wake_after_push() {
        let queue = WriteQueue::new(2);
        assert!(!queue.wait(Duration::from_millis(1)));
        queue.push("A");
        assert!(queue.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_clear() {
        let queue = WriteQueue::new(8);
        queue.push("A");
        queue.push("B");
        queue.clear();
        assert!(queue.is_empty());
    }
}
