//! Clock domains and clock events.
//!
//! A clock domain maps cycle counts onto the global picosecond timeline
//! through an anchor `(anchor_time, anchor_cycles)` and an integral period.
//! Clock events are ordinary time events whose target is remembered in
//! cycles, so the domain can move them when its frequency changes or when it
//! resumes after being frozen.
//!
//! A domain is frozen while it is retained, gated, or at 0 Hz. A frozen
//! domain keeps its cycle counter constant and its blocks are withdrawn from
//! the engine's pending set; their events stay linked and are rebased when
//! the domain thaws.

use crate::engine::Engine;
use crate::error::{unknown_clock, KernelError, SimResult};
use crate::event::EventCallback;
use crate::types::{period_from_frequency, BlockId, ClockId, Cycles, EventId, SimTime};

/// A named frequency domain.
#[derive(Debug)]
pub struct ClockDomain {
    name: String,
    frequency: u64,
    /// Zero while the frequency is zero.
    period: SimTime,
    anchor_time: SimTime,
    anchor_cycles: Cycles,
    retain: u32,
    gated: bool,
    frozen_cycles: Cycles,
    pub(crate) blocks: Vec<BlockId>,
}

impl ClockDomain {
    fn new(name: String, frequency: u64, now: SimTime) -> Self {
        Self {
            name,
            frequency,
            period: period_from_frequency(frequency).unwrap_or(0),
            anchor_time: now,
            anchor_cycles: 0,
            retain: 0,
            gated: false,
            frozen_cycles: 0,
            blocks: Vec::new(),
        }
    }

    /// Domain name as given at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frequency in Hz.
    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Cycle period in picoseconds, zero for a stopped domain.
    pub fn period(&self) -> SimTime {
        self.period
    }

    /// Nesting depth of `retain_clock` calls.
    pub fn retain_count(&self) -> u32 {
        self.retain
    }

    /// Returns true while the domain is gated.
    pub fn is_gated(&self) -> bool {
        self.gated
    }

    /// Returns true when the cycle counter does not advance.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.retain > 0 || self.gated || self.period == 0
    }

    /// Blocks bound to this domain.
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// Number of completed cycles at global time `now`.
    #[inline]
    pub fn cycles_at(&self, now: SimTime) -> Cycles {
        if self.is_frozen() {
            self.frozen_cycles
        } else {
            self.anchor_cycles + (now - self.anchor_time).max(0) / self.period
        }
    }

    /// Time of the last edge at or before `now`; `now` itself while frozen.
    pub fn edge_time(&self, now: SimTime) -> SimTime {
        if self.is_frozen() {
            now
        } else {
            self.cycle_time(self.cycles_at(now))
        }
    }

    /// Absolute time of the edge starting `cycle`, for a running domain.
    #[inline]
    pub(crate) fn cycle_time(&self, cycle: Cycles) -> SimTime {
        self.anchor_time
            .saturating_add((cycle - self.anchor_cycles).saturating_mul(self.period))
    }

    /// Fire time of a cycle target seen from `now`.
    #[inline]
    fn target_time(&self, cycle: Cycles, now: SimTime) -> SimTime {
        if self.is_frozen() {
            now
        } else {
            self.cycle_time(cycle).max(now)
        }
    }
}

impl Engine {
    /// Creates a clock domain running at `hz`.
    ///
    /// A domain may be created at 0 Hz and given a frequency later (for
    /// instance through a clock port); it stays frozen until then.
    pub fn new_clock(&mut self, name: impl Into<String>, hz: u64) -> ClockId {
        let id = ClockId::from_index(self.clocks.len());
        let domain = ClockDomain::new(name.into(), hz, self.time());
        tracing::debug!(clock = %id, name = %domain.name, hz, "new clock domain");
        self.clocks.push(domain);
        id
    }

    /// Returns a clock domain by id.
    pub fn clock(&self, clock: ClockId) -> SimResult<&ClockDomain> {
        self.clocks.get(clock.index()).ok_or_else(|| unknown_clock(clock))
    }

    /// Looks a domain up by name.
    pub fn clock_by_name(&self, name: &str) -> Option<ClockId> {
        self.clocks
            .iter()
            .position(|d| d.name == name)
            .map(ClockId::from_index)
    }

    /// Number of clock domains.
    pub fn clock_count(&self) -> usize {
        self.clocks.len()
    }

    /// Frequency of `clock` in Hz.
    pub fn frequency(&self, clock: ClockId) -> SimResult<u64> {
        Ok(self.clock(clock)?.frequency)
    }

    /// Period of `clock` in picoseconds.
    pub fn period(&self, clock: ClockId) -> SimResult<SimTime> {
        Ok(self.clock(clock)?.period)
    }

    /// Cycles elapsed in `clock` at the current time.
    pub fn cycles(&self, clock: ClockId) -> SimResult<Cycles> {
        Ok(self.clock(clock)?.cycles_at(self.time()))
    }

    /// Cycles elapsed in the domain `block` is bound to.
    pub fn block_cycles(&self, block: BlockId) -> SimResult<Cycles> {
        let clock = self
            .block(block)?
            .clock
            .ok_or(KernelError::NoClockDomain { block })?;
        self.cycles(clock)
    }

    /// Changes the frequency of `clock`.
    ///
    /// Cycles already elapsed are kept and pending clock events are moved so
    /// their cycle targets stay valid; nothing moves before the current time.
    /// The part of the current cycle already elapsed is kept as a fraction
    /// of the new period, so the next edge comes after the same share of a
    /// cycle. Setting the current frequency again changes nothing.
    pub fn set_frequency(&mut self, clock: ClockId, hz: u64) -> SimResult<()> {
        let Some(period) = period_from_frequency(hz) else {
            let name = self.clock(clock)?.name.clone();
            return Err(KernelError::ZeroFrequency { clock: name });
        };
        tracing::debug!(%clock, hz, time = self.time(), "set frequency");
        self.transition(clock, |d| {
            d.frequency = hz;
            d.period = period;
        })
    }

    /// Pauses `clock`. Calls nest; returns the new count.
    pub fn retain_clock(&mut self, clock: ClockId) -> SimResult<u32> {
        self.transition(clock, |d| d.retain += 1)?;
        Ok(self.clocks[clock.index()].retain)
    }

    /// Undoes one `retain_clock`. The last release resumes the domain with
    /// the cycle count it was frozen at.
    pub fn release_clock(&mut self, clock: ClockId) -> SimResult<u32> {
        let domain = self.clock(clock)?;
        if domain.retain == 0 {
            tracing::error!(%clock, name = %domain.name, "clock released without matching retain");
            return Err(KernelError::RetainUnderflow {
                what: format!("clock '{}'", domain.name),
            });
        }
        self.transition(clock, |d| d.retain -= 1)?;
        Ok(self.clocks[clock.index()].retain)
    }

    /// Gates or ungates `clock`.
    pub fn set_clock_gated(&mut self, clock: ClockId, gated: bool) -> SimResult<()> {
        self.transition(clock, |d| d.gated = gated)
    }

    /// Applies `change` to a domain, keeping cycles continuous across it.
    /// A change leaving the frozen state and the period as they were does
    /// not touch the anchor or any pending event.
    fn transition<F>(&mut self, clock: ClockId, change: F) -> SimResult<()>
    where
        F: FnOnce(&mut ClockDomain),
    {
        let now = self.time();
        let domain = self
            .clocks
            .get_mut(clock.index())
            .ok_or_else(|| unknown_clock(clock))?;
        let was_frozen = domain.is_frozen();
        let old_period = domain.period;
        let cycles = domain.cycles_at(now);
        let edge = domain.edge_time(now);
        change(domain);

        match (was_frozen, domain.is_frozen()) {
            (true, true) => return Ok(()),
            (false, false) if domain.period == old_period => return Ok(()),
            (false, true) => domain.frozen_cycles = cycles,
            (true, false) => {
                domain.anchor_time = now;
                domain.anchor_cycles = domain.frozen_cycles;
            }
            (false, false) => {
                // elapsed share of the current cycle, rescaled; below one new period
                let into =
                    i128::from(now - edge) * i128::from(domain.period) / i128::from(old_period);
                domain.anchor_time = now - into as SimTime;
                domain.anchor_cycles = cycles;
            }
        }
        self.rebase(clock);
        Ok(())
    }

    /// Recomputes the fire time of every pending event of the domain.
    fn rebase(&mut self, clock: ClockId) {
        let blocks = self.clocks[clock.index()].blocks.clone();
        for block in blocks {
            self.retime_block(block);
        }
    }

    /// Recomputes the event times of `block` from their cycle targets and
    /// refreshes its registration.
    pub(crate) fn retime_block(&mut self, block: BlockId) {
        let now = self.time();
        if let Some(clock) = self.blocks[block.index()].clock {
            let domain = &self.clocks[clock.index()];
            if !domain.is_frozen() {
                let mut cursor = self.blocks[block.index()].time.head;
                while let Some(id) = cursor {
                    let ev = &mut self.events[id.index()];
                    if let Some(target) = ev.clock.and_then(|slot| slot.target) {
                        ev.time = domain.cycle_time(target);
                    }
                    ev.time = ev.time.max(now);
                    cursor = ev.next;
                }
                self.blocks[block.index()].time.resort(&mut self.events);
            }
        }
        self.notify(block);
    }

    /// Rebinds `block` to another domain, carrying over the number of cycles
    /// its pending clock events still had to wait.
    pub(crate) fn move_block_clock(&mut self, block: BlockId, clock: Option<ClockId>) {
        let old = self.blocks[block.index()].clock;
        if old == clock {
            return;
        }
        let now = self.time();
        let old_cycles = old.map(|c| self.clocks[c.index()].cycles_at(now));
        let new_cycles = clock.map(|c| self.clocks[c.index()].cycles_at(now));

        let mut cursor = self.blocks[block.index()].time.head;
        while let Some(id) = cursor {
            let ev = &mut self.events[id.index()];
            if let Some(slot) = ev.clock.as_mut() {
                if let Some(target) = slot.target {
                    let remaining = (target - old_cycles.unwrap_or(target)).max(0);
                    slot.target = new_cycles.map(|c| c + remaining);
                }
            }
            cursor = ev.next;
        }

        if let Some(c) = old {
            self.clocks[c.index()].blocks.retain(|&b| b != block);
        }
        if let Some(c) = clock {
            self.clocks[c.index()].blocks.push(block);
        }
        self.blocks[block.index()].clock = clock;
        tracing::trace!(%block, ?old, new = ?clock, "block clock moved");
        self.retime_block(block);
    }

    /// Declares a clock event owned by `block`.
    ///
    /// The block may receive its domain later (configuration, clock port);
    /// scheduling the event fails while it has none.
    pub fn new_clock_event<F>(&mut self, block: BlockId, callback: F) -> SimResult<EventId>
    where
        F: FnMut(&mut Engine, EventId) -> SimResult<()> + Send + 'static,
    {
        let callback: EventCallback = Box::new(callback);
        self.push_event(block, callback, true)
    }

    /// Schedules a clock event `cycles` edges after the current cycle.
    ///
    /// The fire time is the start of cycle `current + cycles`, never earlier
    /// than the current time.
    pub fn enqueue_cycles(&mut self, event: EventId, cycles: Cycles) -> SimResult<()> {
        if cycles < 0 {
            return Err(KernelError::NegativeDelay {
                event,
                delay: cycles,
            });
        }
        let ev = self.event(event)?;
        if ev.clock.is_none() {
            return Err(KernelError::NotAClockEvent { event });
        }
        if ev.enqueued {
            tracing::error!(%event, "clock event enqueued twice");
            return Err(KernelError::AlreadyEnqueued { event });
        }
        let block = ev.block;
        let clock = self.blocks[block.index()]
            .clock
            .ok_or(KernelError::NoClockDomain { block })?;

        let now = self.time();
        let domain = &self.clocks[clock.index()];
        let target = domain.cycles_at(now) + cycles;
        let time = domain.target_time(target, now);
        if let Some(slot) = self.events[event.index()].clock.as_mut() {
            slot.target = Some(target);
        }
        self.insert_event(event, time)
    }

    /// Makes a clock event fire on every cycle, starting at the next edge.
    pub fn enable(&mut self, event: EventId) -> SimResult<()> {
        let block = self.event(event)?.block;
        if self.blocks[block.index()].clock.is_none() {
            return Err(KernelError::NoClockDomain { block });
        }
        let ev = self.event_mut(event)?;
        let enqueued = ev.enqueued;
        let slot = ev
            .clock
            .as_mut()
            .ok_or(KernelError::NotAClockEvent { event })?;
        slot.sticky = true;
        if !enqueued {
            self.enqueue_cycles(event, 1)?;
        }
        Ok(())
    }

    /// Stops a clock event from firing; `enable` restarts it in phase.
    pub fn disable(&mut self, event: EventId) -> SimResult<()> {
        let slot = self
            .event_mut(event)?
            .clock
            .as_mut()
            .ok_or(KernelError::NotAClockEvent { event })?;
        slot.sticky = false;
        self.cancel(event)
    }

    /// Re-arms an enabled clock event one cycle after the one it fired on.
    pub(crate) fn rearm_sticky(&mut self, event: EventId) -> SimResult<()> {
        let ev = &self.events[event.index()];
        let block = ev.block;
        let fired = ev.clock.and_then(|slot| slot.target);
        let Some(clock) = self.blocks[block.index()].clock else {
            return Err(KernelError::NoClockDomain { block });
        };

        let now = self.time();
        let domain = &self.clocks[clock.index()];
        let current = domain.cycles_at(now);
        let target = fired.map_or(current, |c| c.max(current)) + 1;
        let time = domain.target_time(target, now);
        if let Some(slot) = self.events[event.index()].clock.as_mut() {
            slot.target = Some(target);
        }
        self.insert_event(event, time)
    }

    /// Checks that every domain driving blocks can advance.
    pub(crate) fn validate_clocks(&self) -> SimResult<()> {
        for domain in &self.clocks {
            if domain.frequency == 0 && !domain.gated && !domain.blocks.is_empty() {
                tracing::error!(name = %domain.name, "clock domain with blocks has no frequency");
                return Err(KernelError::ZeroFrequency {
                    clock: domain.name.clone(),
                });
            }
        }
        Ok(())
    }
}
