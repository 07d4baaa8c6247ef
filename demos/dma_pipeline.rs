//! DMA Pipeline Example
//!
//! A DMA engine in a fast clock domain streams reads from a memory in a slow
//! domain. The memory answers asynchronously after a fixed number of its own
//! cycles, so every transfer crosses clock domains. Halfway through, a power
//! manager doubles the memory clock, and later gates it for a while.
//!
//! The example showcases:
//! - Asynchronous io completion
//! - Per-cycle clock events enabled and disabled on back-pressure
//! - Frequency changes and gating with pending events
//! - Clock-domain crossing statistics
//! - Driving the engine directly, without a launcher

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use soctime::{
    ClockId, ComponentId, Engine, EventId, IoMaster, IoReq, IoSlave, IoStatus, LauncherConfigBuilder,
    SimResult, StatsCollector,
};

// ============================================================================
// Configuration
// ============================================================================

const DMA_CLOCK_HZ: u64 = 400_000_000;
const MEM_CLOCK_HZ: u64 = 50_000_000;
const MEM_LATENCY_CYCLES: i64 = 4;
const BURST_BYTES: u64 = 64;
const TRANSFER_BYTES: u64 = 256 * 1024;
const MAX_OUTSTANDING: usize = 4;

// ============================================================================
// Memory model
// ============================================================================

/// Answers every read `MEM_LATENCY_CYCLES` cycles after accepting it.
fn build_memory(engine: &mut Engine, clock: ClockId) -> SimResult<()> {
    let mem = engine.new_component(ComponentId::ROOT, "mem")?;
    engine.set_component_clock(mem, Some(clock))?;
    let block = engine.new_block(mem, "ctrl")?;

    let inflight: Arc<Mutex<VecDeque<IoReq>>> = Arc::default();
    let responder = Arc::new(Mutex::new(None));

    let complete = {
        let inflight = Arc::clone(&inflight);
        let responder = Arc::clone(&responder);
        engine.new_clock_event(block, move |engine: &mut Engine, ev: EventId| {
            let Some(mut req) = inflight.lock().pop_front() else {
                return Ok(());
            };
            req.data = vec![(req.addr >> 6) as u8; req.size as usize];
            if !inflight.lock().is_empty() {
                engine.enqueue_cycles(ev, 1)?;
            }
            let responder: Option<soctime::IoResponder> = responder.lock().clone();
            match responder {
                Some(responder) => responder.resp(engine, req),
                None => Ok(()),
            }
        })?
    };

    let slave = IoSlave::new(move |engine: &mut Engine, req: &mut IoReq, _| {
        if req.is_write {
            return Ok(IoStatus::Invalid);
        }
        inflight.lock().push_back(req.clone());
        if !engine.is_enqueued(complete) {
            engine.enqueue_cycles(complete, MEM_LATENCY_CYCLES)?;
        }
        Ok(IoStatus::Pending)
    });
    *responder.lock() = Some(slave.responder());
    engine.new_slave_port(mem, "input", &slave)
}

// ============================================================================
// DMA model
// ============================================================================

#[derive(Debug, Default)]
struct DmaState {
    next_addr: u64,
    outstanding: usize,
    received: u64,
    issue_stalls: u64,
}

fn build_dma(engine: &mut Engine, clock: ClockId, state: Arc<Mutex<DmaState>>) -> SimResult<()> {
    let dma = engine.new_component(ComponentId::ROOT, "dma")?;
    engine.set_component_clock(dma, Some(clock))?;
    let block = engine.new_block(dma, "engine")?;

    // The issue tick is created first so the response path can restart it.
    let bus_cell: Arc<Mutex<Option<IoMaster>>> = Arc::default();
    let issue = {
        let state = Arc::clone(&state);
        let bus_cell = Arc::clone(&bus_cell);
        engine.new_clock_event(block, move |engine: &mut Engine, ev: EventId| {
            let Some(bus) = bus_cell.lock().clone() else {
                return Ok(());
            };
            let mut req = {
                let mut s = state.lock();
                if s.next_addr >= TRANSFER_BYTES {
                    return engine.disable(ev);
                }
                if s.outstanding >= MAX_OUTSTANDING {
                    s.issue_stalls += 1;
                    return engine.disable(ev);
                }
                let req = IoReq::read(s.next_addr, BURST_BYTES).with_id(s.next_addr / BURST_BYTES);
                s.next_addr += BURST_BYTES;
                s.outstanding += 1;
                req
            };
            match bus.req(engine, &mut req)? {
                IoStatus::Pending | IoStatus::Ok => Ok(()),
                status => {
                    tracing::error!(?status, addr = req.addr, "dma read rejected");
                    engine.stop_exec();
                    Ok(())
                }
            }
        })?
    };

    let bus = IoMaster::with_callbacks(
        move |engine: &mut Engine, req: IoReq| {
            let (done, restart) = {
                let mut s = state.lock();
                s.outstanding -= 1;
                s.received += req.data.len() as u64;
                (
                    s.received >= TRANSFER_BYTES,
                    s.next_addr < TRANSFER_BYTES && !engine.is_enqueued(issue),
                )
            };
            if restart {
                engine.enable(issue)?;
            }
            if done {
                tracing::info!(time = engine.time(), "transfer complete");
            }
            Ok(())
        },
        |_, _| Ok(()),
    );
    engine.new_master_port(dma, "bus", &bus)?;
    *bus_cell.lock() = Some(bus);
    engine.on_reset(dma, move |engine: &mut Engine| engine.enable(issue))
}

// ============================================================================
// Power manager
// ============================================================================

/// Doubles the memory clock at 20 us and gates it between 40 and 45 us.
fn build_power_manager(engine: &mut Engine, mem_clock: ClockId) -> SimResult<()> {
    let pm = engine.new_component(ComponentId::ROOT, "pm")?;
    let block = engine.new_block(pm, "sequencer")?;
    let step = engine.new_event(block, move |engine: &mut Engine, ev: EventId| {
        let phase = engine.event_arg(ev, 0)?;
        engine.set_event_arg(ev, 0, phase + 1)?;
        match phase {
            0 => {
                tracing::info!(time = engine.time(), "memory clock doubled");
                engine.set_frequency(mem_clock, MEM_CLOCK_HZ * 2)?;
                engine.enqueue_at(ev, 40_000_000)
            }
            1 => {
                tracing::info!(time = engine.time(), "memory clock gated");
                engine.set_clock_gated(mem_clock, true)?;
                engine.enqueue(ev, 5_000_000)
            }
            _ => {
                tracing::info!(time = engine.time(), "memory clock ungated");
                engine.set_clock_gated(mem_clock, false)
            }
        }
    })?;
    engine.on_reset(pm, move |engine: &mut Engine| engine.enqueue_at(step, 20_000_000))
}

// ============================================================================
// Main
// ============================================================================

fn main() -> SimResult<()> {
    let config = LauncherConfigBuilder::new()
        .name("dma_pipeline")
        .log_level("info")
        .build()?;
    soctime::init_logging(&config.simulation.log_level);

    let mut engine = Engine::new();
    let dma_clock = engine.new_clock("dma_clk", DMA_CLOCK_HZ);
    let mem_clock = engine.new_clock("mem_clk", MEM_CLOCK_HZ);

    let state = Arc::new(Mutex::new(DmaState::default()));
    build_memory(&mut engine, mem_clock)?;
    build_dma(&mut engine, dma_clock, Arc::clone(&state))?;
    build_power_manager(&mut engine, mem_clock)?;
    engine.bind_paths("/dma->bus", "/mem->input")?;
    engine.finalize()?;
    engine.reset()?;

    let mut collector = StatsCollector::new();
    collector.set_name(config.simulation.name.clone());
    collector.start();
    engine.run()?;
    collector.update_from_json(&engine.export_stats());
    collector.stop();

    let state = state.lock();
    println!();
    println!("Transferred {} bytes, {} issue stalls", state.received, state.issue_stalls);
    println!("Finished at {} ps", engine.time());
    for crossing in engine.crossings() {
        println!(
            "Crossing {} -> {}: {} transfers, max skew {} ps",
            crossing.master, crossing.slave, crossing.count, crossing.max_skew
        );
    }
    println!();
    println!("{}", collector.stats().summary());
    Ok(())
}
