//! Time events.
//!
//! A `TimeEvent` is a callback bound to a target time and owned by exactly
//! one block. Events are created once per use-site and re-armed as often as
//! needed; the engine stores them in an arena and links the pending ones
//! into their block's time-ordered list.

use std::fmt;

use crate::engine::Engine;
use crate::error::SimResult;
use crate::types::{BlockId, Cycles, EventId, SimTime, EVENT_ARGS};

/// Callback run when an event fires.
///
/// The callback receives the engine, so it can read the time, re-arm events
/// and drive ports, plus the id of the event that fired.
pub type EventCallback = Box<dyn FnMut(&mut Engine, EventId) -> SimResult<()> + Send>;

/// Small fixed argument slots carried by an event across activations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventArgs(pub [u64; EVENT_ARGS]);

impl EventArgs {
    /// Returns the value of slot `index`, or `None` past the last slot.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u64> {
        self.0.get(index).copied()
    }

    /// Sets the value of slot `index`. Returns false, leaving every slot
    /// unchanged, when `index` is past the last slot.
    #[inline]
    pub fn set(&mut self, index: usize, value: u64) -> bool {
        match self.0.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// Cycle bookkeeping of a clock event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ClockSlot {
    /// Cycle (in the block's domain) at which the event fires; `None` when
    /// the event was armed with an absolute time.
    pub(crate) target: Option<Cycles>,
    /// Re-armed every cycle after firing until disabled.
    pub(crate) sticky: bool,
}

/// A schedulable callback owned by one block.
pub struct TimeEvent {
    pub(crate) block: BlockId,
    pub(crate) time: SimTime,
    pub(crate) callback: Option<EventCallback>,
    pub(crate) args: EventArgs,
    pub(crate) enqueued: bool,
    /// Next event in the owning block's pending list.
    pub(crate) next: Option<EventId>,
    /// Present for clock events only.
    pub(crate) clock: Option<ClockSlot>,
}

impl TimeEvent {
    pub(crate) fn new(block: BlockId, callback: EventCallback, clocked: bool) -> Self {
        Self {
            block,
            time: 0,
            callback: Some(callback),
            args: EventArgs::default(),
            enqueued: false,
            next: None,
            clock: clocked.then(ClockSlot::default),
        }
    }

    /// The block owning this event.
    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Absolute fire time; only meaningful while enqueued.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Returns true while the event waits in its block's list.
    pub fn is_enqueued(&self) -> bool {
        self.enqueued
    }

    /// Returns true for events expressed in cycles.
    pub fn is_clock_event(&self) -> bool {
        self.clock.is_some()
    }

    /// Returns true if the event is enabled to fire every cycle.
    pub fn is_sticky(&self) -> bool {
        self.clock.map_or(false, |slot| slot.sticky)
    }

    /// The argument slots.
    pub fn args(&self) -> &EventArgs {
        &self.args
    }
}

impl fmt::Debug for TimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeEvent")
            .field("block", &self.block)
            .field("time", &self.time)
            .field("enqueued", &self.enqueued)
            .field("next", &self.next)
            .field("clock", &self.clock)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
