//! Timer Interrupt Example
//!
//! A CPU model programs a timer over an io port and counts the interrupts
//! the timer raises on its wire port. The system is driven by a
//! [`Launcher`] whose configuration clocks the SoC and binds the ports.
//!
//! The example showcases:
//! - Io requests answered synchronously
//! - Wire ports carrying interrupts
//! - Clock events scheduled in cycles
//! - Configuration-driven clocks and bindings
//! - Statistics on close

use parking_lot::Mutex;
use std::sync::Arc;

use soctime::{
    ComponentId, Engine, IoMaster, IoReq, IoSlave, IoStatus, Launcher, LauncherConfigBuilder,
    SimResult, WireMaster, WireSlave,
};

// ============================================================================
// Configuration
// ============================================================================

const SYS_CLOCK_HZ: u64 = 100_000_000; // 10 ns per cycle
const TIMER_PERIOD_CYCLES: u64 = 250;
const INTERRUPTS: u32 = 8;

const TIMER_LOAD: u64 = 0x0;

// ============================================================================
// Timer model
// ============================================================================

fn le_u64(data: &[u8]) -> u64 {
    data.iter()
        .take(8)
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (b as u64) << (8 * i))
}

/// One-shot down counter: writing the load register arms it for that many
/// cycles, expiry raises `irq`.
fn build_timer(engine: &mut Engine, parent: ComponentId) -> SimResult<()> {
    let timer = engine.new_component(parent, "timer")?;
    let block = engine.new_block(timer, "counter")?;

    let irq = WireMaster::<bool>::new();
    engine.new_master_port(timer, "irq", &irq)?;
    let expire = engine.new_clock_event(block, move |engine: &mut Engine, _| {
        tracing::debug!(time = engine.time(), "timer expired");
        irq.sync(engine, true)
    })?;

    let regs = IoSlave::new(move |engine: &mut Engine, req: &mut IoReq, _| {
        match (req.addr, req.is_write) {
            (TIMER_LOAD, true) => {
                engine.cancel(expire)?;
                engine.enqueue_cycles(expire, le_u64(&req.data) as i64)?;
                Ok(IoStatus::Ok)
            }
            (TIMER_LOAD, false) => {
                let pending = engine.is_enqueued(expire) as u64;
                req.data = pending.to_le_bytes()[..req.size.min(8) as usize].to_vec();
                Ok(IoStatus::Ok)
            }
            _ => Ok(IoStatus::Invalid),
        }
    });
    engine.new_slave_port(timer, "regs", &regs)
}

// ============================================================================
// CPU model
// ============================================================================

/// Reprograms the timer on every interrupt until `INTERRUPTS` were taken.
fn build_cpu(engine: &mut Engine, parent: ComponentId, taken: Arc<Mutex<Vec<i64>>>) -> SimResult<()> {
    let cpu = engine.new_component(parent, "cpu")?;
    let bus = IoMaster::new();
    engine.new_master_port(cpu, "bus", &bus)?;

    let program = {
        let bus = bus.clone();
        move |engine: &mut Engine| -> SimResult<()> {
            let mut req = IoReq::write(TIMER_LOAD, TIMER_PERIOD_CYCLES.to_le_bytes().to_vec());
            match bus.req(engine, &mut req)? {
                IoStatus::Ok => Ok(()),
                status => {
                    tracing::warn!(?status, "timer programming failed");
                    Ok(())
                }
            }
        }
    };

    let irq = {
        let program = program.clone();
        WireSlave::new(move |engine: &mut Engine, level: bool| {
            if !level {
                return Ok(());
            }
            let count = {
                let mut taken = taken.lock();
                taken.push(engine.time());
                taken.len() as u32
            };
            tracing::info!(count, time = engine.time(), "interrupt taken");
            if count < INTERRUPTS {
                program(engine)
            } else {
                Ok(())
            }
        })
    };
    engine.new_slave_port(cpu, "irq", &irq)?;
    engine.on_reset(cpu, program)
}

// ============================================================================
// Main
// ============================================================================

fn main() -> SimResult<()> {
    let config = LauncherConfigBuilder::new()
        .name("timer_irq")
        .log_level("info")
        .add_clock_for("sys", SYS_CLOCK_HZ, &["/soc"])
        .bind("/soc/cpu->bus", "/soc/timer->regs")
        .bind("/soc/timer->irq", "/soc/cpu->irq")
        .collect_stats(true)
        .build()?;
    soctime::init_logging(&config.simulation.log_level);

    let taken = Arc::new(Mutex::new(Vec::new()));
    let mut launcher = Launcher::new(config)?;
    {
        let taken = Arc::clone(&taken);
        launcher.open(move |engine: &mut Engine| {
            let soc = engine.new_component(ComponentId::ROOT, "soc")?;
            build_timer(engine, soc)?;
            build_cpu(engine, soc, taken)
        })?;
    }
    launcher.start()?;
    launcher.run()?;
    launcher.join()?;

    println!();
    println!("Interrupts taken at:");
    for (i, time) in taken.lock().iter().enumerate() {
        println!("  #{:<2} {:>10} ps", i + 1, time);
    }

    if let Some(stats) = launcher.close()? {
        println!();
        println!("{}", stats.summary());
    }
    Ok(())
}
