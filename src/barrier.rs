use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Error returned by [`Barrier::wait`] once the barrier has been cancelled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("barrier was cancelled")]
pub struct BarrierCancelled;

/// Successful outcome of [`Barrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWaitResult {
    /// This call was the last arrival of the round; it released every other
    /// participant without ever blocking. Exactly one thread per round sees
    /// this value.
    Leader,
    /// The round completed while this thread was blocked.
    Follower,
}

impl BarrierWaitResult {
    pub fn is_leader(&self) -> bool {
        matches!(self, BarrierWaitResult::Leader)
    }
}

#[derive(Debug)]
struct BarrierState {
    /// Threads still to arrive in the current round; reset to `thread_count`
    /// by the last arrival.
    count: usize,
    /// Incremented once per completed round (and once by `cancel`).
    generation: u64,
}

/// A reusable rendezvous point for a fixed group of threads, with
/// cooperative cancellation.
///
/// All `thread_count` participants call [`wait`](Self::wait) at the end of a
/// phase; the last arrival releases the group and the barrier is immediately
/// ready for the next round. [`cancel`](Self::cancel) releases every blocked
/// and future waiter with [`BarrierCancelled`], which is the only way to
/// unblock threads mid-round during shutdown.
///
/// Each round must see exactly `thread_count` distinct callers, and no thread
/// may call `wait` twice within one round; the barrier does not detect either
/// misuse.
#[derive(Debug)]
pub struct Barrier {
    state: Mutex<BarrierState>,
    condvar: Condvar,
    // Read outside the lock by the fast path; only stored while holding it.
    cancelled: AtomicBool,
    thread_count: usize,
    poll_interval: Duration,
}

impl Barrier {
    /// Creates a barrier for `thread_count` participants with the default
    /// 500µs wakeup poll interval.
    pub fn new(thread_count: usize) -> Arc<Self> {
        Self::with_poll_interval(thread_count, DEFAULT_POLL_INTERVAL)
    }

    /// Creates a barrier with a custom poll interval. Blocked waiters wake at
    /// least this often to re-check for round completion or cancellation,
    /// which bounds how long a lost wakeup could go unnoticed.
    pub fn with_poll_interval(thread_count: usize, poll_interval: Duration) -> Arc<Self> {
        assert!(thread_count > 0, "barrier needs at least one thread");
        Arc::new(Barrier {
            state: Mutex::new(BarrierState {
                count: thread_count,
                generation: 0,
            }),
            condvar: Condvar::new(),
            cancelled: AtomicBool::new(false),
            thread_count,
            poll_interval,
        })
    }

    /// Blocks until all participants of the current round have arrived, or
    /// until the barrier is cancelled.
    pub fn wait(&self) -> Result<BarrierWaitResult, BarrierCancelled> {
        // Already-cancelled steady state never takes the lock.
        if self.cancelled.load(Ordering::Acquire) {
            return Err(BarrierCancelled);
        }

        let mut state = self.state.lock().unwrap();

        // Cancellation may have landed between the fast path and the lock;
        // it must not let this thread complete a round.
        if self.cancelled.load(Ordering::Acquire) {
            return Err(BarrierCancelled);
        }

        let generation = state.generation;

        state.count -= 1;
        if state.count == 0 {
            // Last arrival: open the next round and release everyone.
            state.generation += 1;
            state.count = self.thread_count;
            trace!(generation, "barrier round complete");
            self.condvar.notify_all();
            return Ok(BarrierWaitResult::Leader);
        }

        // The bounded wait is a safety net against a missed notification;
        // every timeout re-checks the exit conditions.
        while state.generation == generation && !self.cancelled.load(Ordering::Acquire) {
            let (guard, _timed_out) = self
                .condvar
                .wait_timeout(state, self.poll_interval)
                .unwrap();
            state = guard;
        }

        if self.cancelled.load(Ordering::Acquire) {
            Err(BarrierCancelled)
        } else {
            Ok(BarrierWaitResult::Follower)
        }
    }

    /// Releases all blocked waiters and makes every future [`wait`](Self::wait)
    /// return [`BarrierCancelled`]. One-way: a cancelled barrier cannot be
    /// reused, construct a fresh one instead. Safe to call from any thread,
    /// concurrently with in-flight waits, and more than once.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        // Bump the generation so every blocked waiter sees its round
        // condition fail even though the round never completed.
        state.generation += 1;
        self.cancelled.store(true, Ordering::Release);
        debug!("barrier cancelled");
        self.condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
