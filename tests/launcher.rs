//! Integration tests for the threaded launcher.
//!
//! These tests verify:
//! - Configuration-driven clocks and bindings
//! - Testbench wire and io masters driving model ports
//! - Retain-gated stepping against a free-running dispatch thread
//! - Statistics written on close

use parking_lot::Mutex;
use soctime::{
    ComponentId, Engine, IoReq, IoSlave, IoStatus, KernelError, Launcher, LauncherConfig,
    LauncherConfigBuilder, RunState, SimResult, SimTime, WireSlave,
};
use std::sync::Arc;

/// A timer counting down `reload` cycles after each write of its control
/// register, raising its interrupt wire on expiry.
fn build_timer(engine: &mut Engine, fired: Arc<Mutex<Vec<SimTime>>>) -> SimResult<()> {
    let timer = engine.new_component(ComponentId::ROOT, "timer")?;
    let block = engine.new_block(timer, "counter")?;
    let expire = engine.new_event(block, move |engine: &mut Engine, _| {
        fired.lock().push(engine.time());
        Ok(())
    })?;

    let regs = IoSlave::new(move |engine: &mut Engine, req: &mut IoReq, _| {
        if !req.is_write {
            return Ok(IoStatus::Invalid);
        }
        let ticks = req.data.first().copied().unwrap_or(0) as SimTime;
        engine.cancel(expire)?;
        engine.enqueue(expire, ticks * 1_000)?;
        Ok(IoStatus::Ok)
    });
    engine.new_slave_port(timer, "regs", &regs)?;

    let reset = WireSlave::new(move |engine: &mut Engine, active: bool| {
        if active {
            engine.cancel(expire)?;
        }
        Ok(())
    });
    engine.new_slave_port(timer, "reset", &reset)
}

#[test]
fn test_testbench_drives_model_ports() {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let mut launcher = Launcher::new(LauncherConfig::default()).unwrap();
    {
        let fired = Arc::clone(&fired);
        launcher.open(move |e| build_timer(e, fired)).unwrap();
    }
    let io = launcher.testbench_io("bus", "/timer->regs").unwrap();
    let reset = launcher.testbench_wire::<bool>("rst", "/timer->reset").unwrap();
    launcher.start().unwrap();

    let status = launcher
        .with_engine(|e| io.req(e, &mut IoReq::write(0, vec![5])))
        .unwrap()
        .unwrap();
    assert_eq!(status, IoStatus::Ok);
    launcher.step(10_000).unwrap();
    assert_eq!(*fired.lock(), vec![5_000]);

    launcher
        .with_engine(|e| io.req(e, &mut IoReq::write(0, vec![3])))
        .unwrap()
        .unwrap();
    launcher.with_engine(|e| reset.sync(e, true)).unwrap().unwrap();
    launcher.step(10_000).unwrap();
    assert_eq!(fired.lock().len(), 1);
    assert_eq!(reset.value(), Some(true));
    launcher.close().unwrap();
}

#[test]
fn test_yaml_configuration_applies_clocks_and_bindings() {
    let yaml = r#"
simulation:
  name: "yaml-soc"
  dispatch_slice: 16
clocks:
  - name: cpu_clk
    frequency: 500000000
    components: ["/cpu"]
bindings:
  - master: "/cpu->irq"
    slave: "/pic->irq"
"#;
    let config = LauncherConfig::from_yaml(yaml).unwrap();
    let mut launcher = Launcher::new(config).unwrap();
    let irqs = Arc::new(Mutex::new(Vec::new()));
    {
        let irqs = Arc::clone(&irqs);
        launcher
            .open(move |engine: &mut Engine| {
                let cpu = engine.new_component(ComponentId::ROOT, "cpu")?;
                let pic = engine.new_component(ComponentId::ROOT, "pic")?;
                let core = engine.new_block(cpu, "core")?;
                let irq = soctime::WireMaster::<u32>::new();
                engine.new_master_port(cpu, "irq", &irq)?;
                let sink = WireSlave::new(move |engine: &mut Engine, line: u32| {
                    irqs.lock().push((engine.time(), line));
                    Ok(())
                });
                engine.new_slave_port(pic, "irq", &sink)?;

                // Raise line 3 after 4 cycles of the configured clock.
                let raise = engine.new_clock_event(core, move |engine: &mut Engine, _| {
                    irq.sync(engine, 3)
                })?;
                engine.on_reset(cpu, move |engine: &mut Engine| engine.enqueue_cycles(raise, 4))
            })
            .unwrap();
    }
    launcher.start().unwrap();
    launcher.run().unwrap();
    launcher.join().unwrap();
    assert_eq!(*irqs.lock(), vec![(8_000, 3)]);
    assert_eq!(launcher.state(), RunState::Finished);
}

#[test]
fn test_open_fails_on_unknown_configured_component() {
    let config = LauncherConfigBuilder::new()
        .add_clock_for("sys", 1_000_000, &["/missing"])
        .build()
        .unwrap();
    let mut launcher = Launcher::new(config).unwrap();
    assert!(matches!(
        launcher.open(|_| Ok(())),
        Err(KernelError::UnknownComponent(_))
    ));
}

#[test]
fn test_external_driver_steps_a_retained_run() {
    let config = LauncherConfigBuilder::new().dispatch_slice(4).build().unwrap();
    let mut launcher = Launcher::new(config).unwrap();
    let count = Arc::new(Mutex::new(0u64));
    {
        let count = Arc::clone(&count);
        launcher
            .open(move |engine: &mut Engine| {
                let block = engine.new_block(ComponentId::ROOT, "heartbeat")?;
                let beat = engine.new_event(block, move |engine: &mut Engine, ev| {
                    *count.lock() += 1;
                    engine.enqueue(ev, 100)
                })?;
                engine.on_reset(ComponentId::ROOT, move |e: &mut Engine| e.enqueue(beat, 100))
            })
            .unwrap();
    }
    launcher.start().unwrap();

    // A co-simulation peer claims time before letting the run go.
    launcher.retain();
    launcher.run().unwrap();
    for step in 1..=5 {
        let next = launcher.update(step * 1_000).unwrap();
        assert_eq!(next, step * 1_000 + 100);
    }
    assert_eq!(*count.lock(), 50);
    assert_eq!(launcher.release().unwrap(), 0);

    // Free run until stopped from the controlling thread.
    while *count.lock() < 200 {
        std::thread::yield_now();
    }
    launcher.stop();
    assert_eq!(launcher.state(), RunState::Stopped);
    let stopped_at = launcher.time();
    assert!(stopped_at >= 20_000);

    launcher.retain();
    launcher.run().unwrap();
    launcher.step(50).unwrap();
    assert_eq!(launcher.time(), stopped_at + 50);
    launcher.release().unwrap();
    launcher.stop();
    launcher.close().unwrap();
}

#[test]
fn test_close_writes_statistics() {
    let dir = std::env::temp_dir().join(format!("soctime-stats-{}", std::process::id()));
    let config = LauncherConfigBuilder::new()
        .name("stats")
        .add_clock("sys", 100_000_000)
        .collect_stats(true)
        .output_dir(dir.to_string_lossy())
        .build()
        .unwrap();
    let mut launcher = Launcher::new(config).unwrap();
    launcher
        .open(|engine: &mut Engine| {
            let cpu = engine.new_component(ComponentId::ROOT, "cpu")?;
            engine.set_component_clock(cpu, engine.clock_by_name("sys"))?;
            let core = engine.new_block(cpu, "core")?;
            let tick = engine.new_clock_event(core, |engine: &mut Engine, ev| {
                if engine.time() >= 90_000 {
                    engine.disable(ev)?;
                }
                Ok(())
            })?;
            engine.on_reset(cpu, move |e: &mut Engine| e.enable(tick))
        })
        .unwrap();
    launcher.start().unwrap();
    launcher.run().unwrap();
    launcher.join().unwrap();

    let stats = launcher.close().unwrap().expect("statistics enabled");
    assert_eq!(stats.metadata.name, "stats");
    assert_eq!(stats.final_time, 90_000);
    assert_eq!(stats.engine.events_fired, 9);
    assert_eq!(stats.clocks[0].cycles, 9);
    assert!(dir.join("stats.json").exists());
    assert!(dir.join("clocks.csv").exists());
    let _ = std::fs::remove_dir_all(&dir);

    assert!(matches!(launcher.close(), Err(KernelError::InvalidState(_))));
}
