//! Persistence Tests
//!
//! Every tick rebuilds the kernel from the store. These tests validate:
//! - Checkpoint followed by boot reproduces the process and thread tables
//! - Records that cannot be rebuilt are quarantined, not lost
//! - A corrupt table or config never stops the kernel from booting

use serde_json::{json, Value};
use storage::{Store, CORRUPT_KEY, KERNEL_KEY};
use tests_scheduling::{script_registry, Op, Script, TestWorld, SCRIPT};
use tick_kernel::{ProcessInfo, ProcessRegistry, ScheduleEvent, Thread};

fn snapshot(kernel: &tick_kernel::Kernel<'_>) -> (Vec<ProcessInfo>, Vec<Thread>) {
    (
        kernel.processes().cloned().collect(),
        kernel.threads().cloned().collect(),
    )
}

fn long_running(name: &str) -> Script {
    Script::new().with_thread(name, None, vec![Op::Yield; 10])
}

/// Test: checkpoint then boot yields the same tables
#[test]
fn test_checkpoint_round_trip() {
    let mut world = TestWorld::new(100.0);
    let script = Script::new()
        .with_priority(0.25)
        .with_thread(
            "miner",
            Some(0.25),
            vec![Op::Burn { amount: 4.0 }, Op::Sleep { ticks: 3 }, Op::Yield],
        )
        .with_thread("hauler", None, vec![Op::Yield, Op::Yield, Op::Yield]);
    let (pid, _) = world.spawn(script);

    let (before, _) = world.tick_inspect(snapshot);
    let after = world.inspect(snapshot);

    assert_eq!(before, after);
    assert_eq!(after.0.len(), 1);
    assert_eq!(after.1.len(), 2);
    assert_eq!(after.0[0].pid, pid);
    assert!(after.1.iter().any(|thread| thread.sleep().is_some()));
}

/// Test: a process whose program is unknown survives as a quarantined record
#[test]
fn test_unknown_program_is_quarantined_and_recovers() {
    let mut world = TestWorld::new(100.0);
    let (pid, _) = world.spawn(long_running("patient"));
    let table_before = world.table();

    // Registry without the program
    world.registry = ProcessRegistry::new();
    let report = world.tick();
    assert!(report.events.iter().any(|event| matches!(
        event,
        ScheduleEvent::ProcessQuarantined { pid: Some(held), .. } if held == &pid
    )));
    assert!(report.dispatch_order().is_empty());
    assert_eq!(world.table()["processes"], table_before["processes"]);
    assert_eq!(world.table()["threads"], table_before["threads"]);
    assert!(world.log.contains(&format!("Quarantined process: Unknown program: {}", SCRIPT)));

    // Fixed registry picks it up again
    world.registry = script_registry(&world.host, &world.journal);
    let report = world.tick();
    assert_eq!(report.dispatch_order().len(), 1);
    assert_eq!(world.trace(&pid), vec!["patient", "patient"]);
}

/// Test: one corrupt process record does not stop the others
#[test]
fn test_corrupt_record_is_isolated() {
    let mut world = TestWorld::new(100.0);
    let ((healthy, broken), _) = world.tick_with(|kernel| {
        let healthy = kernel
            .start_process(SCRIPT, long_running("healthy").to_options(), None)
            .unwrap();
        let broken = kernel
            .start_process(SCRIPT, long_running("broken").to_options(), None)
            .unwrap();
        (healthy, broken)
    });

    let mut table = world.table();
    table["processes"][1]["priority"] = json!("not a number");
    world.store.save(KERNEL_KEY, table.to_string()).unwrap();

    let report = world.tick();
    assert_eq!(report.dispatch_order().len(), 1);
    assert_eq!(report.processes, 1);
    assert_eq!(world.trace(&healthy), vec!["healthy", "healthy"]);

    // The broken record and its memory are carried forward untouched
    assert_eq!(world.table()["processes"][1], table["processes"][1]);
    assert_eq!(world.trace(&broken), vec!["broken"]);
    let held = world.inspect(|kernel| kernel.quarantined().to_vec());
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].pid.as_ref(), Some(&broken));
    assert_eq!(held[0].threads.len(), 1);
}

/// Test: an unparseable table is preserved and the kernel starts empty
#[test]
fn test_corrupt_table_is_preserved() {
    let mut world = TestWorld::new(100.0);
    world.spawn(long_running("lost"));
    world
        .store
        .save(KERNEL_KEY, "{\"processes\": [".to_string())
        .unwrap();

    let report = world.tick();
    assert_eq!(report.processes, 0);
    assert_eq!(world.store.get(CORRUPT_KEY), Some("{\"processes\": ["));
    assert!(world.log.contains("Kernel table is corrupt"));
    assert_eq!(world.table()["processes"], json!([]));
}

/// Test: a process can decline to restore some of its threads
#[test]
fn test_restore_thread_can_drop_threads() {
    let mut world = TestWorld::new(100.0);
    let mut script = Script::new()
        .with_thread("scratch", None, vec![Op::Yield, Op::Yield])
        .with_thread("durable", None, vec![Op::Yield, Op::Yield]);
    script.forget = vec!["scratch".to_string()];
    let (pid, first) = world.spawn(script);
    assert_eq!(first.dispatch_order().len(), 2);

    let report = world.tick();
    assert_eq!(report.threads, 1);
    assert_eq!(world.trace(&pid), vec!["scratch", "durable", "durable"]);
    assert!(world.log.contains("Thread 'scratch' not restored"));
}

/// Test: a failing serialize keeps the previous options
#[test]
fn test_serialize_failure_keeps_options() {
    let mut world = TestWorld::new(100.0);
    let mut script = long_running("stubborn");
    script.fail_serialize = true;
    let options = script.to_options();
    let (pid, _) = world.spawn(script);

    assert!(world.log.contains(
        "serialize failed, keeping previous options: cannot serialize"
    ));
    assert_eq!(world.table()["processes"][0]["options"], options);
    assert_eq!(world.table()["processes"][0]["pid"], json!(pid));
}

/// Test: an invalid config falls back to defaults and is reported
#[test]
fn test_invalid_config_falls_back_to_defaults() {
    let mut world = TestWorld::new(100.0).with_config(json!({"future_timeout": "soon"}));
    let (_, report) = world.spawn(long_running("steady"));

    assert_eq!(report.dispatch_order().len(), 1);
    assert!(world
        .log
        .entries()
        .iter()
        .any(|entry| entry.message.starts_with("Invalid kernel config")));
    let timeout = world.inspect(|kernel| kernel.config().future_timeout);
    assert_eq!(timeout, 1000);
}

/// Test: the persisted table records the tick it was written at
#[test]
fn test_table_records_tick() {
    let mut world = TestWorld::new(100.0);
    let start = world.now();
    world.spawn(long_running("clock"));
    world.tick();
    assert_eq!(world.table()["tick"], Value::from(start + 1));
}
