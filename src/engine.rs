//! Global time engine.
//!
//! `Engine` is the explicit simulation context every model callback receives.
//! It owns the arenas (blocks, events, clock domains, components, ports) and
//! the set of blocks with pending events, keyed by their next event time.
//! Dispatch repeatedly takes the earliest block, advances the global time to
//! its next event and executes it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::block::Block;
use crate::clock::ClockDomain;
use crate::component::ComponentTree;
use crate::control::ExecControl;
use crate::error::{KernelError, SimResult};
use crate::event::{EventArgs, EventCallback, TimeEvent};
use crate::port::PortRegistry;
use crate::stats::EngineStats;
use crate::types::{BlockId, EventId, SimTime, NO_PENDING};

/// Why a dispatch call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Halt {
    /// The next pending event lies beyond the requested limit.
    Limit,
    /// Nothing is pending.
    Idle,
    /// A stop request was honoured.
    Stopped,
    /// The block execution budget of the call was used up.
    Budget,
}

/// The simulation context: time engine plus every arena of the kernel.
pub struct Engine {
    time: SimTime,
    pub(crate) blocks: Vec<Block>,
    pub(crate) events: Vec<TimeEvent>,
    /// Blocks with pending events; ties on time resolve by block creation order.
    pending: BTreeSet<(SimTime, BlockId)>,
    pub(crate) clocks: Vec<ClockDomain>,
    pub(crate) components: ComponentTree,
    pub(crate) ports: PortRegistry,
    control: Arc<ExecControl>,
    pub(crate) stats: EngineStats,
    stopped: bool,
}

impl Engine {
    /// Creates an empty engine at time zero with its own control block.
    pub fn new() -> Self {
        Self::with_control(Arc::new(ExecControl::new()))
    }

    /// Creates an engine sharing `control` with other threads.
    pub fn with_control(control: Arc<ExecControl>) -> Self {
        Self {
            time: 0,
            blocks: Vec::new(),
            events: Vec::new(),
            pending: BTreeSet::new(),
            clocks: Vec::new(),
            components: ComponentTree::new(),
            ports: PortRegistry::default(),
            control,
            stats: EngineStats::default(),
            stopped: false,
        }
    }

    /// The stop/retain gate shared with controlling threads.
    pub fn control(&self) -> &Arc<ExecControl> {
        &self.control
    }

    /// Current global time in picoseconds.
    #[inline]
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Time of the earliest pending event, or [`NO_PENDING`].
    #[inline]
    pub fn next_event_time(&self) -> SimTime {
        self.pending.first().map_or(NO_PENDING, |&(time, _)| time)
    }

    /// Returns true if no block has a pending event.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of blocks currently registered with pending events.
    pub fn pending_blocks(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if the last dispatch call ended on a stop request.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Requests the current dispatch to halt after the running block.
    ///
    /// Usable from model callbacks (end of test, breakpoints) as well as via
    /// the shared [`ExecControl`] from other threads.
    pub fn stop_exec(&self) {
        self.control.stop_exec();
    }

    /// Counters collected since creation.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Returns a block by id.
    pub fn block(&self, block: BlockId) -> SimResult<&Block> {
        self.blocks.get(block.index()).ok_or(KernelError::UnknownId {
            kind: "block",
            index: block.index(),
        })
    }

    /// Returns an event by id.
    pub fn event(&self, event: EventId) -> SimResult<&TimeEvent> {
        self.events.get(event.index()).ok_or(KernelError::UnknownId {
            kind: "event",
            index: event.index(),
        })
    }

    pub(crate) fn event_mut(&mut self, event: EventId) -> SimResult<&mut TimeEvent> {
        self.events.get_mut(event.index()).ok_or(KernelError::UnknownId {
            kind: "event",
            index: event.index(),
        })
    }

    /// Declares a time event owned by `block`.
    pub fn new_event<F>(&mut self, block: BlockId, callback: F) -> SimResult<EventId>
    where
        F: FnMut(&mut Engine, EventId) -> SimResult<()> + Send + 'static,
    {
        self.push_event(block, Box::new(callback), false)
    }

    pub(crate) fn push_event(
        &mut self,
        block: BlockId,
        callback: EventCallback,
        clocked: bool,
    ) -> SimResult<EventId> {
        self.block(block)?;
        let id = EventId::from_index(self.events.len());
        self.events.push(TimeEvent::new(block, callback, clocked));
        Ok(id)
    }

    /// Returns true while `event` is waiting to fire.
    pub fn is_enqueued(&self, event: EventId) -> bool {
        self.events
            .get(event.index())
            .map_or(false, |e| e.enqueued)
    }

    /// Absolute fire time of an enqueued event.
    pub fn event_time(&self, event: EventId) -> Option<SimTime> {
        self.events
            .get(event.index())
            .filter(|e| e.enqueued)
            .map(|e| e.time)
    }

    /// Argument slots of `event`.
    pub fn event_args(&self, event: EventId) -> SimResult<EventArgs> {
        Ok(self.event(event)?.args)
    }

    /// Value of argument slot `index` of `event`.
    pub fn event_arg(&self, event: EventId, index: usize) -> SimResult<u64> {
        self.event(event)?
            .args
            .get(index)
            .ok_or(KernelError::UnknownId {
                kind: "event argument",
                index,
            })
    }

    /// Sets argument slot `index` of `event`.
    pub fn set_event_arg(&mut self, event: EventId, index: usize, value: u64) -> SimResult<()> {
        if self.event_mut(event)?.args.set(index, value) {
            Ok(())
        } else {
            Err(KernelError::UnknownId {
                kind: "event argument",
                index,
            })
        }
    }

    /// Schedules `event` to fire `delay` picoseconds from now.
    ///
    /// Enqueueing an event that is already pending is an error; cancel it
    /// first to move it.
    pub fn enqueue(&mut self, event: EventId, delay: SimTime) -> SimResult<()> {
        if delay < 0 {
            return Err(KernelError::NegativeDelay { event, delay });
        }
        let time = self.time.saturating_add(delay);
        if let Some(slot) = self.event_mut(event)?.clock.as_mut() {
            slot.target = None;
        }
        self.insert_event(event, time)
    }

    /// Schedules `event` at an absolute time, which must not be in the past.
    pub fn enqueue_at(&mut self, event: EventId, time: SimTime) -> SimResult<()> {
        self.enqueue(event, time - self.time)
    }

    pub(crate) fn insert_event(&mut self, event: EventId, time: SimTime) -> SimResult<()> {
        let ev = self.event_mut(event)?;
        if ev.enqueued {
            tracing::error!(%event, "event enqueued twice");
            return Err(KernelError::AlreadyEnqueued { event });
        }
        ev.time = time;
        let block = ev.block;

        self.stats.events_enqueued += 1;
        let became_head = self.blocks[block.index()]
            .time
            .insert(&mut self.events, event);
        // A block already registered at an earlier time keeps its registration.
        if became_head {
            self.notify(block);
        }
        Ok(())
    }

    /// Removes a pending event. Cancelling an idle event does nothing.
    pub fn cancel(&mut self, event: EventId) -> SimResult<()> {
        let ev = self.event(event)?;
        if !ev.enqueued {
            return Ok(());
        }
        let block = ev.block;
        let was_head = self.blocks[block.index()]
            .time
            .unlink(&mut self.events, event);
        self.stats.events_cancelled += 1;
        if was_head == Some(true) {
            self.notify(block);
        }
        Ok(())
    }

    #[inline]
    fn block_frozen(&self, block: BlockId) -> bool {
        self.blocks[block.index()]
            .clock
            .map_or(false, |clock| self.clocks[clock.index()].is_frozen())
    }

    /// Synchronizes the pending-set registration of `block` with its head.
    pub(crate) fn notify(&mut self, block: BlockId) {
        let b = &self.blocks[block.index()];
        if b.time.running {
            return;
        }
        let wanted = if self.block_frozen(block) {
            None
        } else {
            b.time.head_time(&self.events)
        };
        let registered = b.time.registered;
        if wanted == registered {
            return;
        }
        if let Some(time) = registered {
            self.pending.remove(&(time, block));
        }
        if let Some(time) = wanted {
            self.pending.insert((time, block));
        }
        self.blocks[block.index()].time.registered = wanted;
    }

    /// Advances time by `duration`, dispatching everything due on the way.
    ///
    /// Returns the next pending time or [`NO_PENDING`].
    pub fn step(&mut self, duration: SimTime) -> SimResult<SimTime> {
        self.step_until(self.time.saturating_add(duration.max(0)))
    }

    /// Dispatches every event due at or before `end`, then moves the global
    /// time to `end` unless a stop request interrupted the dispatch.
    ///
    /// Returns the next pending time or [`NO_PENDING`].
    pub fn step_until(&mut self, end: SimTime) -> SimResult<SimTime> {
        let halt = self.dispatch(end, u64::MAX)?;
        if halt != Halt::Stopped && end > self.time {
            self.time = end;
        }
        Ok(self.next_event_time())
    }

    /// Dispatches until nothing is pending or a stop is requested.
    ///
    /// The time is left at the last dispatched event.
    pub fn run(&mut self) -> SimResult<Halt> {
        self.dispatch(SimTime::MAX, u64::MAX)
    }

    /// Dispatches at most `budget` block executions with times up to `limit`.
    pub fn run_slice(&mut self, limit: SimTime, budget: u64) -> SimResult<Halt> {
        self.dispatch(limit, budget)
    }

    fn dispatch(&mut self, limit: SimTime, budget: u64) -> SimResult<Halt> {
        self.stats.dispatch_calls += 1;
        self.stopped = false;
        let mut executed = 0u64;
        loop {
            if self.control.take_stop() {
                self.stopped = true;
                tracing::debug!(time = self.time, "dispatch stopped");
                return Ok(Halt::Stopped);
            }
            if executed >= budget {
                return Ok(Halt::Budget);
            }
            let Some(&(time, block)) = self.pending.first() else {
                return Ok(Halt::Idle);
            };
            if time > limit {
                return Ok(Halt::Limit);
            }
            self.pending.pop_first();
            self.blocks[block.index()].time.registered = None;

            debug_assert!(time >= self.time, "time went backwards");
            self.time = time;
            self.exec_block(block)?;
            executed += 1;
        }
    }

    /// Fires every event of `block` due at the current time, in list order.
    ///
    /// Events enqueued with a zero delay by the callbacks themselves fire
    /// within the same execution.
    fn exec_block(&mut self, block: BlockId) -> SimResult<()> {
        tracing::trace!(time = self.time, %block, "exec block");
        self.stats.block_executions += 1;
        self.blocks[block.index()].time.running = true;

        let mut result = Ok(());
        while let Some(event) = self.blocks[block.index()]
            .time
            .pop_due(&mut self.events, self.time)
        {
            if let Err(err) = self.fire(event) {
                result = Err(err);
                break;
            }
            // A callback may have frozen the block's own clock domain.
            if self.block_frozen(block) {
                break;
            }
        }

        self.blocks[block.index()].time.running = false;
        self.notify(block);
        result
    }

    fn fire(&mut self, event: EventId) -> SimResult<()> {
        self.stats.events_fired += 1;
        let Some(mut callback) = self.events[event.index()].callback.take() else {
            return Ok(());
        };
        let result = callback(self, event);
        self.events[event.index()].callback = Some(callback);
        result?;

        let ev = &self.events[event.index()];
        if ev.is_sticky() && !ev.enqueued {
            self.rearm_sticky(event)?;
        }
        Ok(())
    }

    /// Drops every pending event and registration. Time is preserved.
    pub(crate) fn cancel_all(&mut self) {
        for block in &mut self.blocks {
            let dropped = block.time.clear(&mut self.events);
            self.stats.events_cancelled += dropped.len() as u64;
            block.time.registered = None;
        }
        for event in &mut self.events {
            if let Some(slot) = event.clock.as_mut() {
                slot.sticky = false;
            }
        }
        self.pending.clear();
    }

    /// Releases every model callback and binding held by the engine.
    pub fn teardown(&mut self) {
        self.cancel_all();
        self.events.clear();
        self.blocks.clear();
        self.clocks.clear();
        self.ports = PortRegistry::default();
        self.components = ComponentTree::new();
        tracing::debug!(time = self.time, "engine torn down");
    }

    /// Exports engine statistics and clock domain state as JSON.
    pub fn export_stats(&self) -> serde_json::Value {
        let clocks: Vec<_> = self
            .clocks
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name(),
                    "frequency": d.frequency(),
                    "cycles": d.cycles_at(self.time),
                    "retained": d.retain_count(),
                    "gated": d.is_gated(),
                })
            })
            .collect();
        let crossings: Vec<_> = self
            .ports
            .crossings
            .iter()
            .map(|c| serde_json::to_value(c.snapshot()).unwrap_or_default())
            .collect();

        serde_json::json!({
            "engine": {
                "current_time": self.time,
                "next_event_time": self.next_event_time(),
                "pending_blocks": self.pending.len(),
                "blocks": self.blocks.len(),
                "events": self.events.len(),
                "components": self.components.len(),
                "events_enqueued": self.stats.events_enqueued,
                "events_cancelled": self.stats.events_cancelled,
                "events_fired": self.stats.events_fired,
                "block_executions": self.stats.block_executions,
                "dispatch_calls": self.stats.dispatch_calls,
            },
            "clocks": clocks,
            "crossings": crossings,
        })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("time", &self.time)
            .field("blocks", &self.blocks.len())
            .field("events", &self.events.len())
            .field("pending", &self.pending.len())
            .field("clocks", &self.clocks.len())
            .field("components", &self.components.len())
            .finish_non_exhaustive()
    }
}
