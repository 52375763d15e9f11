use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::pipeline::CancelToken;

const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Lease must outlast one synthesis invocation plus its single retry.
pub const DEFAULT_MAX_HOLD: Duration = Duration::from_secs(1260);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("gave up waiting for the synthesis slot: run was cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct HolderState {
    ticket: u64,
    acquired_at: Instant,
    revoked: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct GateInner {
    holder: Option<HolderState>,
    queue: VecDeque<u64>,
    next_ticket: u64,
}

/// Admits at most one synthesis invocation at a time, process-wide. Waiters
/// are served strictly in arrival order. A holder that overstays `max_hold`
/// loses the slot to the next waiter; the overstayer finds out through
/// `SynthesisLease::is_revoked`.
#[derive(Debug)]
pub struct SynthesisGate {
    inner: Mutex<GateInner>,
    available: Condvar,
    max_hold: Duration,
}

impl SynthesisGate {
    pub fn new(max_hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(GateInner::default()),
            available: Condvar::new(),
            max_hold,
        })
    }

    pub fn acquire(
        self: &Arc<Self>,
        cancel: &CancelToken,
    ) -> Result<SynthesisLease, GateError> {
        let mut inner = self.inner.lock().expect("gate mutex poisoned");
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.queue.push_back(ticket);

        loop {
            if cancel.is_cancelled() {
                inner.queue.retain(|queued| *queued != ticket);
                drop(inner);
                self.available.notify_all();
                return Err(GateError::Cancelled);
            }

            if inner.queue.front() == Some(&ticket) {
                let slot_free = match inner.holder.as_ref() {
                    None => true,
                    Some(holder) => holder.acquired_at.elapsed() >= self.max_hold,
                };
                if slot_free {
                    if let Some(evicted) = inner.holder.take() {
                        evicted.revoked.store(true, Ordering::SeqCst);
                    }
                    inner.queue.pop_front();
                    let revoked = Arc::new(AtomicBool::new(false));
                    inner.holder = Some(HolderState {
                        ticket,
                        acquired_at: Instant::now(),
                        revoked: Arc::clone(&revoked),
                    });
                    return Ok(SynthesisLease {
                        gate: Arc::clone(self),
                        ticket,
                        revoked,
                        released: false,
                    });
                }
            }

            let (guard, _timed_out) = self
                .available
                .wait_timeout(inner, WAIT_SLICE)
                .expect("gate mutex poisoned");
            inner = guard;
        }
    }

    fn release_ticket(&self, ticket: u64) {
        let mut inner = self.inner.lock().expect("gate mutex poisoned");
        if inner
            .holder
            .as_ref()
            .is_some_and(|holder| holder.ticket == ticket)
        {
            inner.holder = None;
        }
        drop(inner);
        self.available.notify_all();
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.inner.lock().expect("gate mutex poisoned").queue.len()
    }
}

#[derive(Debug)]
pub struct SynthesisLease {
    gate: Arc<SynthesisGate>,
    ticket: u64,
    revoked: Arc<AtomicBool>,
    released: bool,
}

impl SynthesisLease {
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Frees the slot and reports whether the lease was revoked while held.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        if !self.released {
            self.released = true;
            self.gate.release_ticket(self.ticket);
        }
        self.revoked.load(Ordering::SeqCst)
    }
}

impl Drop for SynthesisLease {
    fn drop(&mut self) {
        let _ = self.release_inner();
    }
}
