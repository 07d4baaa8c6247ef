//! Blocks and their per-block event lists.
//!
//! A block is the unit the time engine schedules. It keeps its pending events
//! in a singly-linked list sorted by time, with links stored in the engine's
//! event arena. The engine only ever sees the head of the list.

use crate::event::TimeEvent;
use crate::types::{ClockId, ComponentId, EventId, SimTime};

/// Time-ordered list of pending events of one block.
///
/// Invariant: the list is sorted ascending by time, equal times keep
/// insertion order. `registered` mirrors the key under which the block sits
/// in the engine's pending set and is only maintained while not `running`.
#[derive(Debug, Default)]
pub struct BlockTime {
    pub(crate) head: Option<EventId>,
    pub(crate) len: usize,
    pub(crate) registered: Option<SimTime>,
    pub(crate) running: bool,
}

impl BlockTime {
    /// Time of the earliest pending event.
    #[inline]
    pub(crate) fn head_time(&self, events: &[TimeEvent]) -> Option<SimTime> {
        self.head.map(|id| events[id.index()].time)
    }

    /// Inserts `id` after every event with a time lower or equal to its own.
    ///
    /// Returns true when the event became the new head.
    pub(crate) fn insert(&mut self, events: &mut [TimeEvent], id: EventId) -> bool {
        let time = events[id.index()].time;
        self.len += 1;
        events[id.index()].enqueued = true;

        let mut prev: Option<EventId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if events[current.index()].time > time {
                break;
            }
            prev = Some(current);
            cursor = events[current.index()].next;
        }

        events[id.index()].next = cursor;
        match prev {
            Some(p) => {
                events[p.index()].next = Some(id);
                false
            }
            None => {
                self.head = Some(id);
                true
            }
        }
    }

    /// Removes `id` from the list.
    ///
    /// Returns `Some(was_head)` if the event was found.
    pub(crate) fn unlink(&mut self, events: &mut [TimeEvent], id: EventId) -> Option<bool> {
        let mut prev: Option<EventId> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current == id {
                let next = events[current.index()].next.take();
                events[current.index()].enqueued = false;
                self.len -= 1;
                return Some(match prev {
                    Some(p) => {
                        events[p.index()].next = next;
                        false
                    }
                    None => {
                        self.head = next;
                        true
                    }
                });
            }
            prev = Some(current);
            cursor = events[current.index()].next;
        }
        None
    }

    /// Pops the head if it is due at or before `now`.
    #[inline]
    pub(crate) fn pop_due(&mut self, events: &mut [TimeEvent], now: SimTime) -> Option<EventId> {
        let head = self.head?;
        let event = &mut events[head.index()];
        if event.time > now {
            return None;
        }
        self.head = event.next.take();
        event.enqueued = false;
        self.len -= 1;
        Some(head)
    }

    /// Pending event ids in list order.
    pub(crate) fn ids(&self, events: &[TimeEvent]) -> Vec<EventId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(current) = cursor {
            ids.push(current);
            cursor = events[current.index()].next;
        }
        ids
    }

    /// Re-sorts the list after event times were rewritten in place.
    ///
    /// The sort is stable, so events that now share a time keep their
    /// previous relative order.
    pub(crate) fn resort(&mut self, events: &mut [TimeEvent]) {
        let mut ids = self.ids(events);
        ids.sort_by_key(|id| events[id.index()].time);
        self.head = None;
        for id in ids.into_iter().rev() {
            events[id.index()].next = self.head;
            self.head = Some(id);
        }
    }

    /// Drops every pending event, returning their ids.
    pub(crate) fn clear(&mut self, events: &mut [TimeEvent]) -> Vec<EventId> {
        let ids = self.ids(events);
        for id in &ids {
            let event = &mut events[id.index()];
            event.next = None;
            event.enqueued = false;
        }
        self.head = None;
        self.len = 0;
        ids
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Schedulable node of the component tree.
#[derive(Debug)]
pub struct Block {
    pub(crate) name: String,
    pub(crate) component: ComponentId,
    pub(crate) clock: Option<ClockId>,
    pub(crate) time: BlockTime,
}

impl Block {
    pub(crate) fn new(name: impl Into<String>, component: ComponentId, clock: Option<ClockId>) -> Self {
        Self {
            name: name.into(),
            component,
            clock,
            time: BlockTime::default(),
        }
    }

    /// Block name, unique only within its component.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning component.
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Clock domain the block's clock events are expressed in.
    pub fn clock(&self) -> Option<ClockId> {
        self.clock
    }

    /// The block's pending event list.
    pub fn time(&self) -> &BlockTime {
        &self.time
    }
}
