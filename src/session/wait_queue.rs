//! Config acquisition wait queue
//!
//! Strict FIFO of parked timed acquisitions. Each waiter owns its own
//! monitor; a release wakes only the head entry, so the longest waiter is
//! always serviced first. Exactly one dequeue happens per enqueue.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::errors::{SessionError, SessionResult};
use crate::lock::{LockError, UncState};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Parked,
    /// Popped by a release; the waiter retries once
    Woken,
    /// Popped by a queue clear; the waiter never retries
    Cancelled,
}

#[derive(Debug)]
struct Waiter {
    session_id: u32,
    signal: Mutex<Signal>,
    cv: Condvar,
}

impl Waiter {
    fn new(session_id: u32) -> Self {
        Self {
            session_id,
            signal: Mutex::new(Signal::Parked),
            cv: Condvar::new(),
        }
    }

    fn set(&self, signal: Signal) {
        // A poisoned signal still has to wake the waiter
        let mut guard = self.signal.lock().unwrap_or_else(|e| e.into_inner());
        *guard = signal;
        self.cv.notify_one();
    }
}

/// How long a parked waiter may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    fn from_timeout_ms(timeout_ms: i32) -> Self {
        if timeout_ms < 0 {
            Deadline::Never
        } else {
            Deadline::At(Instant::now() + Duration::from_millis(timeout_ms as u64))
        }
    }
}

#[derive(Debug)]
pub struct AcquisitionQueue {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
    metrics: Arc<MetricsRegistry>,
}

impl AcquisitionQueue {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
            metrics,
        }
    }

    fn queue(&self) -> SessionResult<MutexGuard<'_, VecDeque<Arc<Waiter>>>> {
        self.waiters
            .lock()
            .map_err(|_| SessionError::poisoned("acquisition queue"))
    }

    pub fn len(&self) -> SessionResult<usize> {
        Ok(self.queue()?.len())
    }

    pub fn is_empty(&self) -> SessionResult<bool> {
        Ok(self.queue()?.is_empty())
    }

    /// Timed acquisition.
    ///
    /// `attempt` takes the exclusion without blocking; `state` reads the
    /// current cluster role after a wake. A zero timeout never parks, a
    /// negative timeout parks without a deadline.
    pub fn acquire<T>(
        &self,
        session_id: u32,
        timeout_ms: i32,
        mut attempt: impl FnMut() -> SessionResult<T>,
        state: impl Fn() -> SessionResult<UncState>,
    ) -> SessionResult<T> {
        let waiter = {
            let mut queue = self.queue()?;

            if timeout_ms == 0 {
                if !queue.is_empty() {
                    return Err(SessionError::SystemBusy(format!(
                        "{} acquisitions already waiting",
                        queue.len()
                    )));
                }
                drop(queue);
                return attempt();
            }

            if queue.is_empty() {
                match attempt() {
                    Ok(granted) => return Ok(granted),
                    Err(SessionError::Lock(LockError::Busy(_))) => {}
                    Err(e) => return Err(e),
                }
            }

            let waiter = Arc::new(Waiter::new(session_id));
            queue.push_back(waiter.clone());
            let position = queue.len().to_string();
            let session = session_id.to_string();
            log_event_with_fields(
                Event::AcquisitionQueued,
                &[("position", &position), ("session_id", &session)],
            );
            waiter
        };

        let signal = self.park(&waiter, Deadline::from_timeout_ms(timeout_ms))?;

        match signal {
            Signal::Parked => {
                // Timed out; a release may have popped us in the meantime
                self.dequeue_after_timeout(&waiter)?;
                self.metrics.increment_queue_timeouts();
                let session = session_id.to_string();
                let timeout = timeout_ms.to_string();
                log_event_with_fields(
                    Event::AcquisitionTimedOut,
                    &[("session_id", &session), ("timeout_ms", &timeout)],
                );
                Err(SessionError::SystemBusy(format!(
                    "timed out after {} ms",
                    timeout_ms
                )))
            }
            Signal::Cancelled => {
                if state()? != UncState::Act {
                    Err(SessionError::StateChanged)
                } else {
                    Err(SessionError::SystemBusy("acquisition queue cleared".into()))
                }
            }
            Signal::Woken => {
                if state()? != UncState::Act {
                    // Hand the wake on so the next waiter also observes the change
                    self.handle_config_release()?;
                    return Err(SessionError::StateChanged);
                }
                attempt()
            }
        }
    }

    fn park(&self, waiter: &Waiter, deadline: Deadline) -> SessionResult<Signal> {
        let mut signal = waiter
            .signal
            .lock()
            .map_err(|_| SessionError::poisoned("waiter"))?;

        while *signal == Signal::Parked {
            match deadline {
                Deadline::Never => {
                    signal = waiter
                        .cv
                        .wait(signal)
                        .map_err(|_| SessionError::poisoned("waiter"))?;
                }
                Deadline::At(at) => {
                    let now = Instant::now();
                    if now >= at {
                        break;
                    }
                    signal = waiter
                        .cv
                        .wait_timeout(signal, at - now)
                        .map_err(|_| SessionError::poisoned("waiter"))?
                        .0;
                }
            }
        }

        Ok(*signal)
    }

    fn dequeue_after_timeout(&self, waiter: &Arc<Waiter>) -> SessionResult<()> {
        let mut queue = self.queue()?;
        if let Some(index) = queue.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            queue.remove(index);
            return Ok(());
        }
        drop(queue);

        // Already popped: do not swallow a wake meant for the queue
        let signal = *waiter
            .signal
            .lock()
            .map_err(|_| SessionError::poisoned("waiter"))?;
        if signal == Signal::Woken {
            self.handle_config_release()?;
        }
        Ok(())
    }

    /// Wake the head of the queue, if any. Called after a config session is
    /// fully released.
    pub fn handle_config_release(&self) -> SessionResult<()> {
        let head = self.queue()?.pop_front();
        if let Some(waiter) = head {
            waiter.set(Signal::Woken);
        }
        Ok(())
    }

    /// Cancel every parked waiter. Each one re-checks the cluster role and
    /// fails instead of retrying.
    pub fn clear(&self) -> SessionResult<usize> {
        let drained: Vec<Arc<Waiter>> = self.queue()?.drain(..).collect();
        let count = drained.len();
        for waiter in drained {
            waiter.set(Signal::Cancelled);
        }
        if count > 0 {
            let count_str = count.to_string();
            log_event_with_fields(Event::AcquisitionQueueCleared, &[("waiters", &count_str)]);
        }
        Ok(count)
    }

    /// Session ids in queue order
    pub fn waiting_sessions(&self) -> SessionResult<Vec<u32>> {
        Ok(self.queue()?.iter().map(|w| w.session_id).collect())
    }
}
