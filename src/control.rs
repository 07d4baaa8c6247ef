//! Thread-safe execution control.
//!
//! `ExecControl` is the only part of the kernel shared between the thread
//! running the dispatch loop and controlling threads (interactive front-ends,
//! co-simulation drivers, remote proxies). It carries the stop request, the
//! engine-wide retain counter and the dispatch run state.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use crate::error::{KernelError, SimResult};

/// Run state of the dispatch loop driven by a launcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Not started yet.
    Idle,
    /// Free-running (possibly parked while retained).
    Running,
    /// Halted by a stop request.
    Stopped,
    /// No pending events left, time limit reached or closed.
    Finished,
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    /// True while the dispatch thread holds the engine.
    busy: bool,
}

/// Stop/retain gate shared by the engine and its controlling threads.
#[derive(Debug)]
pub struct ExecControl {
    stop: AtomicBool,
    quit: AtomicBool,
    retain: AtomicU32,
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for ExecControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecControl {
    /// Creates an idle control block.
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            retain: AtomicU32::new(0),
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                busy: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Requests the dispatch loop to halt after the current block execution.
    pub fn stop_exec(&self) {
        self.stop.store(true, Ordering::Release);
        let _guard = self.inner.lock();
        self.cond.notify_all();
    }

    /// Returns true if a stop is pending.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Consumes a pending stop request.
    #[inline]
    pub(crate) fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::AcqRel)
    }

    /// Claims exclusive control of time advancement.
    ///
    /// While the counter is non-zero a free-running dispatch loop parks and
    /// only explicit `step`/`update` calls advance time. Returns the new count.
    pub fn retain(&self) -> u32 {
        let count = self.retain.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(count, "engine retained");
        count
    }

    /// Drops one level of retain. Releasing a zero counter is an error.
    pub fn release(&self) -> SimResult<u32> {
        let previous = self
            .retain
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .map_err(|_| {
                tracing::error!("release without matching retain");
                KernelError::RetainUnderflow {
                    what: "engine".to_string(),
                }
            })?;
        let _guard = self.inner.lock();
        self.cond.notify_all();
        tracing::debug!(count = previous - 1, "engine released");
        Ok(previous - 1)
    }

    /// Current engine-wide retain count.
    pub fn retain_count(&self) -> u32 {
        self.retain.load(Ordering::Acquire)
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    /// Blocks until the dispatch loop is not executing anything.
    ///
    /// Returns immediately when the loop is stopped, finished, idle or parked
    /// on a retain.
    pub fn wait_stopped(&self) {
        let mut inner = self.inner.lock();
        while inner.busy || (inner.state == RunState::Running && self.runnable()) {
            self.cond.wait(&mut inner);
        }
    }

    /// Like [`wait_stopped`](Self::wait_stopped) with a timeout; returns false
    /// if the loop was still executing when the timeout expired.
    pub fn wait_stopped_for(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        while inner.busy || (inner.state == RunState::Running && self.runnable()) {
            if self.cond.wait_for(&mut inner, timeout).timed_out() {
                return false;
            }
        }
        true
    }

    /// Blocks until the dispatch loop left the running state.
    pub(crate) fn wait_halted(&self) {
        let mut inner = self.inner.lock();
        while inner.state == RunState::Running {
            self.cond.wait(&mut inner);
        }
    }

    fn runnable(&self) -> bool {
        !self.stop_requested() && self.retain_count() == 0
    }

    pub(crate) fn set_state(&self, state: RunState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        self.cond.notify_all();
    }

    /// Marks the end of a dispatch slice, optionally moving to `next`.
    pub(crate) fn end_slice(&self, next: Option<RunState>) {
        let mut inner = self.inner.lock();
        if let Some(state) = next {
            inner.state = state;
        }
        inner.busy = false;
        self.cond.notify_all();
    }

    /// Puts the loop back into the running state, dropping stale stops.
    pub(crate) fn resume(&self) {
        self.stop.store(false, Ordering::Release);
        self.set_state(RunState::Running);
    }

    pub(crate) fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
        self.stop_exec();
    }

    pub(crate) fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Parks the dispatch thread until it may run a slice.
    ///
    /// Returns false when the loop must exit. A stop request pending while
    /// running is consumed here and turns the state into `Stopped`.
    pub(crate) fn wait_runnable(&self) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if self.quit_requested() {
                return false;
            }
            if inner.state == RunState::Running && self.take_stop() {
                inner.state = RunState::Stopped;
                self.cond.notify_all();
                continue;
            }
            if inner.state == RunState::Running && self.retain_count() == 0 {
                inner.busy = true;
                return true;
            }
            self.cond.wait(&mut inner);
        }
    }
}
