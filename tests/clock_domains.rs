//! Integration tests for cycle scheduling on clock domains.
//!
//! These tests verify:
//! - Cycle to picosecond conversion
//! - Rebase on frequency change
//! - Nested retain and gating
//! - Per-cycle enabled events
//! - Rebinding a subtree to another domain through a clock port

use parking_lot::Mutex;
use soctime::{
    BlockId, ClockId, ClockMaster, ClockSlave, ComponentId, Engine, EventId, KernelError, SimTime,
};
use std::sync::Arc;

const MHZ: u64 = 1_000_000;

fn clocked_block(engine: &mut Engine, hz: u64) -> (ClockId, BlockId) {
    let clock = engine.new_clock("sys", hz);
    let cpu = engine.new_component(ComponentId::ROOT, "cpu").unwrap();
    engine.set_component_clock(cpu, Some(clock)).unwrap();
    (clock, engine.new_block(cpu, "core").unwrap())
}

fn recording_clock_event(
    engine: &mut Engine,
    block: BlockId,
    fired: &Arc<Mutex<Vec<SimTime>>>,
) -> EventId {
    let fired = Arc::clone(fired);
    engine
        .new_clock_event(block, move |engine: &mut Engine, _| {
            fired.lock().push(engine.time());
            Ok(())
        })
        .unwrap()
}

// ============================================================================
// Conversion
// ============================================================================

#[test]
fn test_three_cycles_at_100mhz() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 100 * MHZ);
    assert_eq!(engine.period(clock).unwrap(), 10_000);

    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);
    engine.enqueue_cycles(ev, 3).unwrap();
    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![30_000]);
    assert_eq!(engine.cycles(clock).unwrap(), 3);
}

#[test]
fn test_delay_from_mid_cycle_lands_on_edge() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 100 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);

    engine.step(25_000).unwrap();
    assert_eq!(engine.cycles(clock).unwrap(), 2);
    engine.enqueue_cycles(ev, 1).unwrap();
    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![30_000]);
}

#[test]
fn test_zero_cycles_fires_now() {
    let mut engine = Engine::new();
    let (_, block) = clocked_block(&mut engine, 100 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);
    engine.step(12_345).unwrap();
    engine.enqueue_cycles(ev, 0).unwrap();
    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![12_345]);
}

// ============================================================================
// Frequency changes
// ============================================================================

#[test]
fn test_frequency_change_keeps_cycle_targets() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 100 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);

    engine.enqueue_cycles(ev, 10).unwrap();
    assert_eq!(engine.event_time(ev), Some(100_000));

    engine.step_until(25_000).unwrap();
    engine.set_frequency(clock, 200 * MHZ).unwrap();
    // Two and a half cycles elapsed: the half cycle left takes 2.5 ns,
    // then seven more at 5 ns.
    assert_eq!(engine.cycles(clock).unwrap(), 2);
    assert_eq!(engine.event_time(ev), Some(62_500));

    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![62_500]);
    assert_eq!(engine.cycles(clock).unwrap(), 10);
}

#[test]
fn test_frequency_change_never_moves_events_backwards() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 100 * MHZ);
    let ev = engine.new_clock_event(block, |_, _| Ok(())).unwrap();
    engine.enqueue_cycles(ev, 1).unwrap();

    engine.step_until(5_000).unwrap();
    engine.set_frequency(clock, 1_000 * MHZ).unwrap();
    let time = engine.event_time(ev).unwrap();
    assert!(time >= engine.time());
    assert_eq!(time, 5_500);
}

#[test]
fn test_redundant_clock_updates_leave_events_alone() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 1_000 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);

    engine.step_until(3_500).unwrap();
    engine.enqueue_cycles(ev, 1).unwrap();
    for _ in 0..3 {
        engine.set_clock_gated(clock, false).unwrap();
        engine.set_frequency(clock, 1_000 * MHZ).unwrap();
    }
    assert_eq!(engine.event_time(ev), Some(4_000));

    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![4_000]);
    assert_eq!(engine.cycles(clock).unwrap(), 4);
}

#[test]
fn test_zero_frequency_is_rejected() {
    let mut engine = Engine::new();
    let (clock, _) = clocked_block(&mut engine, 100 * MHZ);
    assert!(matches!(
        engine.set_frequency(clock, 0),
        Err(KernelError::ZeroFrequency { .. })
    ));
    assert_eq!(engine.frequency(clock).unwrap(), 100 * MHZ);
}

// ============================================================================
// Retain and gating
// ============================================================================

#[test]
fn test_nested_retain_resumes_on_last_release() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 100 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);
    engine.enqueue_cycles(ev, 5).unwrap();

    let k = 3;
    for _ in 0..k {
        engine.retain_clock(clock).unwrap();
    }
    assert!(engine.is_idle());

    engine.step(100_000).unwrap();
    for remaining in (1..k).rev() {
        assert_eq!(engine.release_clock(clock).unwrap(), remaining);
        engine.step(10).unwrap();
        assert!(fired.lock().is_empty());
        assert_eq!(engine.cycles(clock).unwrap(), 0);
    }

    assert_eq!(engine.release_clock(clock).unwrap(), 0);
    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![100_020 + 50_000]);
    assert!(matches!(
        engine.release_clock(clock),
        Err(KernelError::RetainUnderflow { .. })
    ));
}

#[test]
fn test_gated_domain_holds_cycles() {
    let mut engine = Engine::new();
    let (clock, block) = clocked_block(&mut engine, 100 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);
    engine.enqueue_cycles(ev, 4).unwrap();

    engine.step_until(20_000).unwrap();
    engine.set_clock_gated(clock, true).unwrap();
    engine.step_until(90_000).unwrap();
    assert_eq!(engine.cycles(clock).unwrap(), 2);
    assert!(fired.lock().is_empty());

    engine.set_clock_gated(clock, false).unwrap();
    engine.run().unwrap();
    assert_eq!(*fired.lock(), vec![110_000]);
}

// ============================================================================
// Enabled events
// ============================================================================

#[test]
fn test_enable_disable_preserves_phase() {
    let mut engine = Engine::new();
    let (_, block) = clocked_block(&mut engine, 100 * MHZ);
    let fired = Arc::default();
    let tick = recording_clock_event(&mut engine, block, &fired);

    engine.enable(tick).unwrap();
    engine.step_until(50_000).unwrap();
    assert_eq!(fired.lock().len(), 5);

    engine.disable(tick).unwrap();
    engine.step_until(75_000).unwrap();
    assert_eq!(fired.lock().len(), 5);

    engine.enable(tick).unwrap();
    engine.step_until(100_000).unwrap();
    assert_eq!(
        *fired.lock(),
        vec![10_000, 20_000, 30_000, 40_000, 50_000, 80_000, 90_000, 100_000]
    );
}

#[test]
fn test_tick_disabling_itself() {
    let mut engine = Engine::new();
    let (_, block) = clocked_block(&mut engine, 100 * MHZ);
    let count = Arc::new(Mutex::new(0));
    let tick = {
        let count = Arc::clone(&count);
        engine
            .new_clock_event(block, move |engine: &mut Engine, ev| {
                *count.lock() += 1;
                if *count.lock() == 3 {
                    engine.disable(ev)?;
                }
                Ok(())
            })
            .unwrap()
    };
    engine.enable(tick).unwrap();
    engine.run().unwrap();
    assert_eq!(*count.lock(), 3);
    assert_eq!(engine.time(), 30_000);
}

#[test]
fn test_scheduling_cycles_requires_a_domain() {
    let mut engine = Engine::new();
    let bare = engine.new_block(ComponentId::ROOT, "bare").unwrap();
    assert!(engine.new_event(bare, |_, _| Ok(())).is_ok());
    let tick = engine.new_clock_event(bare, |_, _| Ok(())).unwrap();
    assert!(matches!(
        engine.enqueue_cycles(tick, 1),
        Err(KernelError::NoClockDomain { .. })
    ));
    let timed = engine.new_event(bare, |_, _| Ok(())).unwrap();
    assert!(matches!(
        engine.enqueue_cycles(timed, 1),
        Err(KernelError::NotAClockEvent { .. })
    ));
}

// ============================================================================
// Clock ports
// ============================================================================

#[test]
fn test_clock_port_moves_pending_cycles_to_new_domain() {
    let mut engine = Engine::new();
    let (_, block) = clocked_block(&mut engine, 100 * MHZ);
    let fast = engine.new_clock("fast", 1_000 * MHZ);
    let fired = Arc::default();
    let ev = recording_clock_event(&mut engine, block, &fired);

    let clkgen = engine.new_component(ComponentId::ROOT, "clkgen").unwrap();
    let gen_block = engine.new_block(clkgen, "ctrl").unwrap();
    let out = ClockMaster::new();
    engine.new_master_port(clkgen, "out", &out).unwrap();
    let cpu = engine.get_component("/cpu").unwrap();
    engine.new_slave_port(cpu, "clock", &ClockSlave::new(cpu)).unwrap();
    engine.bind_paths("/clkgen->out", "/cpu->clock").unwrap();
    engine.finalize().unwrap();

    let switch = engine
        .new_event(gen_block, move |engine: &mut Engine, _| out.sync(engine, fast))
        .unwrap();
    engine.enqueue_cycles(ev, 10).unwrap();
    engine.enqueue(switch, 50_000).unwrap();
    engine.run().unwrap();

    // Five cycles were left; at 1 GHz they take 5 ns.
    assert_eq!(*fired.lock(), vec![55_000]);
    assert_eq!(engine.block(block).unwrap().clock(), Some(fast));
}
