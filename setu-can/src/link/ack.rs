//! Command acknowledgement correlation
//!
//! Outstanding commands wait in strict FIFO order; only the head waiter may
//! match the next inbound token. Every waiter is completed exactly once, by
//! whichever of match, expiry or clear removes it from the queue first.
//!
//! Matching rules for the head waiter (line already trimmed):
//! - `OK` resolves
//! - `ERROR` / `ERR` rejects, or resolves with no value if errors are allowed
//! - `V` takes any line that is not a frame (`t/T/r/R`) or a control token
//!   (`Z`, `A`) as the version string
//! - an echo of the command text (case-insensitive) resolves
//! - while `O` is at the head, any non-error line resolves it without
//!   consuming the line

use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How a waiter was completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Matched; carries the matching line when it is meaningful
    Resolved(Option<String>),
    /// Adapter answered with an error token
    Rejected(String),
    /// No match within the waiter's timeout
    TimedOut,
    /// Dropped by `clear_all`
    Cleared(String),
}

/// Result of offering a line to the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDisposition {
    /// Line was an acknowledgement; stop processing it
    Consumed,
    /// A waiter was settled but the line still carries data
    SettledPassThrough,
    /// Not an acknowledgement
    NotMatched,
}

struct AckWaiter {
    id: u64,
    command: String,
    allow_ack_error: bool,
    deadline: Instant,
    completion: Sender<AckOutcome>,
}

impl AckWaiter {
    fn complete(self, outcome: AckOutcome) {
        // Receiver may already be gone if the caller stopped waiting
        let _ = self.completion.send(outcome);
    }

    fn settle(self, success: bool, value: Option<String>, response: &str) {
        if success {
            self.complete(AckOutcome::Resolved(value));
        } else if self.allow_ack_error {
            self.complete(AckOutcome::Resolved(None));
        } else {
            self.complete(AckOutcome::Rejected(response.to_string()));
        }
    }
}

/// FIFO table of outstanding acknowledgements
#[derive(Default)]
pub struct AckCorrelator {
    waiters: Mutex<VecDeque<AckWaiter>>,
    next_id: AtomicU64,
}

impl AckCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `command`; its timer starts now
    pub fn register(
        self: &Arc<Self>,
        command: &str,
        allow_ack_error: bool,
        timeout: Duration,
    ) -> PendingAck {
        let (tx, rx) = bounded(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        self.waiters.lock().push_back(AckWaiter {
            id,
            command: command.to_string(),
            allow_ack_error,
            deadline,
            completion: tx,
        });
        PendingAck {
            id,
            command: command.to_string(),
            timeout,
            deadline,
            completion: rx,
            correlator: Arc::clone(self),
        }
    }

    /// Number of outstanding waiters
    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Offer a non-empty trimmed line to the head waiter
    pub fn match_line(&self, line: &str) -> LineDisposition {
        let upper = line.to_ascii_uppercase();
        let is_error = upper == "ERROR" || upper == "ERR";

        let mut waiters = self.waiters.lock();
        let Some(head) = waiters.front() else {
            if upper == "OK" || is_error {
                log::debug!("SLCAN: ignoring unsolicited '{}'", line);
                return LineDisposition::Consumed;
            }
            return LineDisposition::NotMatched;
        };

        let disposition = if upper == "OK" {
            (true, None, LineDisposition::Consumed)
        } else if is_error {
            (false, None, LineDisposition::Consumed)
        } else if head.command == "V" {
            if is_version_candidate(line) {
                (true, Some(line.to_string()), LineDisposition::Consumed)
            } else {
                return LineDisposition::NotMatched;
            }
        } else if upper == head.command.to_ascii_uppercase() {
            (true, Some(line.to_string()), LineDisposition::Consumed)
        } else if head.command == "O" {
            (true, None, LineDisposition::SettledPassThrough)
        } else {
            return LineDisposition::NotMatched;
        };

        let (success, value, result) = disposition;
        if let Some(waiter) = waiters.pop_front() {
            waiter.settle(success, value, line);
        }
        result
    }

    /// Bare-terminator (positive) or BEL (negative) acknowledgement
    pub fn settle_next(&self, success: bool) {
        let waiter = self.waiters.lock().pop_front();
        match waiter {
            Some(waiter) => {
                let token = if success { "<CR>" } else { "<BEL>" };
                waiter.settle(success, None, token);
            }
            None if !success => {
                log::debug!("SLCAN: ignoring unsolicited error acknowledgement");
            }
            None => {}
        }
    }

    /// Fail every waiter whose deadline has passed
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let expired: Vec<AckWaiter> = {
            let mut waiters = self.waiters.lock();
            let (overdue, live): (VecDeque<_>, VecDeque<_>) =
                waiters.drain(..).partition(|w| w.deadline <= now);
            *waiters = live;
            overdue.into_iter().collect()
        };
        let count = expired.len();
        for waiter in expired {
            log::debug!("SLCAN: ack for '{}' timed out", waiter.command);
            waiter.complete(AckOutcome::TimedOut);
        }
        count
    }

    /// Fail every outstanding waiter with `reason`
    pub fn clear_all(&self, reason: &str) {
        let drained: Vec<AckWaiter> = self.waiters.lock().drain(..).collect();
        for waiter in drained {
            waiter.complete(AckOutcome::Cleared(reason.to_string()));
        }
    }

    /// Remove a specific waiter; false if it was already completed
    fn remove(&self, id: u64) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Lines that can never be a version reply
fn is_version_candidate(line: &str) -> bool {
    let first = line.chars().next().unwrap_or(' ');
    let upper = line.to_ascii_uppercase();
    !matches!(first, 't' | 'T' | 'r' | 'R') && upper != "Z" && upper != "A"
}

/// Handle to one outstanding acknowledgement
pub struct PendingAck {
    id: u64,
    command: String,
    timeout: Duration,
    deadline: Instant,
    completion: Receiver<AckOutcome>,
    correlator: Arc<AckCorrelator>,
}

impl PendingAck {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Block until matched, rejected, cleared or timed out
    ///
    /// Returns the matched line for commands that answer with data (`V`).
    pub fn wait(self) -> Result<Option<String>> {
        let outcome = match self.completion.recv_deadline(self.deadline) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => {
                if self.correlator.remove(self.id) {
                    AckOutcome::TimedOut
                } else {
                    // Completed concurrently; the outcome is already in flight
                    self.completion
                        .recv()
                        .unwrap_or_else(|_| AckOutcome::Cleared("ack channel closed".into()))
                }
            }
            Err(RecvTimeoutError::Disconnected) => AckOutcome::Cleared("ack channel closed".into()),
        };
        self.into_result(outcome)
    }

    fn into_result(self, outcome: AckOutcome) -> Result<Option<String>> {
        match outcome {
            AckOutcome::Resolved(value) => Ok(value),
            AckOutcome::Rejected(response) => Err(Error::AckRejected {
                command: self.command,
                response,
            }),
            AckOutcome::TimedOut => Err(Error::AckTimeout {
                command: self.command,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            AckOutcome::Cleared(reason) => Err(Error::AckCleared {
                command: self.command,
                reason,
            }),
        }
    }
}
