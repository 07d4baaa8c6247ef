//! Integration tests for picosecond scheduling on the global timeline.
//!
//! These tests verify:
//! - Earliest-first dispatch across blocks
//! - Ordering of events within one block
//! - Cancellation and re-enqueue
//! - Stop requests and bounded stepping

use parking_lot::Mutex;
use soctime::{BlockId, ComponentId, Engine, EventId, Halt, KernelError, SimTime, NO_PENDING};
use std::sync::Arc;

type Log = Arc<Mutex<Vec<(SimTime, &'static str)>>>;

// ============================================================================
// Helpers
// ============================================================================

fn block(engine: &mut Engine, name: &str) -> BlockId {
    let component = engine.new_component(ComponentId::ROOT, name).unwrap();
    engine.new_block(component, name).unwrap()
}

fn logging_event(engine: &mut Engine, block: BlockId, log: &Log, tag: &'static str) -> EventId {
    let log = Arc::clone(log);
    engine
        .new_event(block, move |engine: &mut Engine, _| {
            log.lock().push((engine.time(), tag));
            Ok(())
        })
        .unwrap()
}

// ============================================================================
// Dispatch order
// ============================================================================

#[test]
fn test_step_until_fires_in_time_order_then_idles() {
    let mut engine = Engine::new();
    let log = Log::default();
    let b = block(&mut engine, "dev");
    let e1 = logging_event(&mut engine, b, &log, "e1");
    let e2 = logging_event(&mut engine, b, &log, "e2");

    engine.enqueue(e1, 10).unwrap();
    engine.enqueue(e2, 5).unwrap();
    assert_eq!(engine.next_event_time(), 5);

    assert_eq!(engine.step_until(20).unwrap(), NO_PENDING);
    assert_eq!(*log.lock(), vec![(5, "e2"), (10, "e1")]);
    assert_eq!(engine.time(), 20);
    assert!(engine.is_idle());
}

#[test]
fn test_blocks_interleave_earliest_first() {
    let mut engine = Engine::new();
    let log = Log::default();
    let a = block(&mut engine, "a");
    let b = block(&mut engine, "b");

    for (blk, tag, times) in [(a, "a", [10, 30, 50]), (b, "b", [20, 40, 60])] {
        for t in times {
            let ev = logging_event(&mut engine, blk, &log, tag);
            engine.enqueue(ev, t).unwrap();
        }
    }
    assert_eq!(engine.pending_blocks(), 2);
    assert_eq!(engine.run().unwrap(), Halt::Idle);

    let fired = log.lock().clone();
    let times: Vec<SimTime> = fired.iter().map(|&(t, _)| t).collect();
    assert_eq!(times, vec![10, 20, 30, 40, 50, 60]);
    assert!(fired.iter().zip(["a", "b", "a", "b", "a", "b"]).all(|(f, t)| f.1 == t));
}

#[test]
fn test_simultaneous_blocks_run_in_creation_order() {
    let mut engine = Engine::new();
    let log = Log::default();
    let first = block(&mut engine, "first");
    let second = block(&mut engine, "second");

    // Enqueued in reverse creation order on purpose.
    let e2 = logging_event(&mut engine, second, &log, "second");
    let e1 = logging_event(&mut engine, first, &log, "first");
    engine.enqueue(e2, 100).unwrap();
    engine.enqueue(e1, 100).unwrap();

    engine.run().unwrap();
    assert_eq!(*log.lock(), vec![(100, "first"), (100, "second")]);
}

#[test]
fn test_same_time_events_keep_insertion_order() {
    let mut engine = Engine::new();
    let log = Log::default();
    let b = block(&mut engine, "dev");
    let tags = ["x", "y", "z"];
    for tag in tags {
        let ev = logging_event(&mut engine, b, &log, tag);
        engine.enqueue(ev, 7).unwrap();
    }
    engine.run().unwrap();
    let fired: Vec<_> = log.lock().iter().map(|&(_, t)| t).collect();
    assert_eq!(fired, tags);
}

#[test]
fn test_chained_events_across_blocks() {
    // A producer pings a consumer 2 ps later, which answers 3 ps later.
    let mut engine = Engine::new();
    let producer = block(&mut engine, "producer");
    let consumer = block(&mut engine, "consumer");
    let rounds = Arc::new(Mutex::new(Vec::new()));
    let ping_id: Arc<Mutex<Option<EventId>>> = Arc::default();

    let pong = {
        let rounds = Arc::clone(&rounds);
        let ping_id = Arc::clone(&ping_id);
        engine
            .new_event(consumer, move |engine: &mut Engine, _| {
                rounds.lock().push(engine.time());
                let ping = ping_id.lock().expect("ping declared");
                if rounds.lock().len() < 4 {
                    engine.enqueue(ping, 3)?;
                }
                Ok(())
            })
            .unwrap()
    };
    let ping = engine
        .new_event(producer, move |engine: &mut Engine, _| engine.enqueue(pong, 2))
        .unwrap();
    *ping_id.lock() = Some(ping);

    engine.enqueue(ping, 0).unwrap();
    engine.run().unwrap();
    assert_eq!(*rounds.lock(), vec![2, 7, 12, 17]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancel_then_reenqueue_reproduces_time() {
    let mut engine = Engine::new();
    let log = Log::default();
    let b = block(&mut engine, "dev");
    let ev = logging_event(&mut engine, b, &log, "ev");

    engine.enqueue(ev, 42).unwrap();
    let planned = engine.event_time(ev).unwrap();
    engine.cancel(ev).unwrap();
    assert!(!engine.is_enqueued(ev));
    assert!(engine.is_idle());

    engine.enqueue(ev, 42).unwrap();
    assert_eq!(engine.event_time(ev), Some(planned));
    engine.run().unwrap();
    assert_eq!(*log.lock(), vec![(42, "ev")]);
}

#[test]
fn test_timeout_cancelled_by_response() {
    let mut engine = Engine::new();
    let b = block(&mut engine, "dma");
    let expired = Arc::new(Mutex::new(false));

    let timeout = {
        let expired = Arc::clone(&expired);
        engine
            .new_event(b, move |_, _| {
                *expired.lock() = true;
                Ok(())
            })
            .unwrap()
    };
    let response = engine
        .new_event(b, move |engine: &mut Engine, _| engine.cancel(timeout))
        .unwrap();

    engine.enqueue(timeout, 1_000).unwrap();
    engine.enqueue(response, 400).unwrap();
    engine.run().unwrap();

    assert!(!*expired.lock());
    assert_eq!(engine.time(), 400);
    assert_eq!(engine.stats().events_cancelled, 1);
}

#[test]
fn test_enqueue_in_the_past_is_rejected() {
    let mut engine = Engine::new();
    let b = block(&mut engine, "dev");
    let ev = engine.new_event(b, |_, _| Ok(())).unwrap();
    engine.step(100).unwrap();
    assert!(matches!(
        engine.enqueue_at(ev, 50),
        Err(KernelError::NegativeDelay { delay: -50, .. })
    ));
    engine.enqueue_at(ev, 100).unwrap();
    assert_eq!(engine.event_time(ev), Some(100));
}

// ============================================================================
// Stop and stepping
// ============================================================================

#[test]
fn test_stop_from_model_keeps_remaining_events() {
    let mut engine = Engine::new();
    let log = Log::default();
    let b = block(&mut engine, "dev");
    let halt = engine
        .new_event(b, |engine: &mut Engine, _| {
            engine.stop_exec();
            Ok(())
        })
        .unwrap();
    let later = logging_event(&mut engine, b, &log, "later");
    engine.enqueue(halt, 10).unwrap();
    engine.enqueue(later, 20).unwrap();

    assert_eq!(engine.run().unwrap(), Halt::Stopped);
    assert!(engine.stopped());
    assert_eq!(engine.time(), 10);
    assert_eq!(engine.next_event_time(), 20);

    assert_eq!(engine.run().unwrap(), Halt::Idle);
    assert_eq!(*log.lock(), vec![(20, "later")]);
}

#[test]
fn test_step_advances_without_events() {
    let mut engine = Engine::new();
    assert_eq!(engine.step(500).unwrap(), NO_PENDING);
    assert_eq!(engine.time(), 500);
    // Negative durations do not move time backwards.
    engine.step(-10).unwrap();
    assert_eq!(engine.time(), 500);
}

#[test]
fn test_run_slice_budget() {
    let mut engine = Engine::new();
    let b = block(&mut engine, "dev");
    let count = Arc::new(Mutex::new(0u32));
    let tick = {
        let count = Arc::clone(&count);
        engine
            .new_event(b, move |engine: &mut Engine, ev| {
                *count.lock() += 1;
                engine.enqueue(ev, 10)
            })
            .unwrap()
    };
    engine.enqueue(tick, 10).unwrap();

    assert_eq!(engine.run_slice(SimTime::MAX, 5).unwrap(), Halt::Budget);
    assert_eq!(*count.lock(), 5);
    assert_eq!(engine.run_slice(75, 100).unwrap(), Halt::Limit);
    assert_eq!(*count.lock(), 7);
    assert_eq!(engine.time(), 70);
}

#[test]
fn test_event_args_survive_activations() {
    let mut engine = Engine::new();
    let b = block(&mut engine, "dev");
    let ev = engine
        .new_event(b, |engine: &mut Engine, ev| {
            let count = engine.event_arg(ev, 0)?;
            engine.set_event_arg(ev, 0, count + 1)?;
            if count < 2 {
                engine.enqueue(ev, 1)?;
            }
            Ok(())
        })
        .unwrap();
    engine.enqueue(ev, 1).unwrap();
    engine.run().unwrap();
    assert_eq!(engine.event_arg(ev, 0).unwrap(), 3);
    assert_eq!(engine.event_args(ev).unwrap().get(0), Some(3));
    assert!(matches!(
        engine.set_event_arg(ev, 9, 1),
        Err(KernelError::UnknownId { .. })
    ));
    assert!(matches!(
        engine.event_arg(ev, usize::MAX),
        Err(KernelError::UnknownId { .. })
    ));
    assert_eq!(engine.event_arg(ev, 0).unwrap(), 3);
}
