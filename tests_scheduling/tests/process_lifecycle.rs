//! Process Lifecycle Tests
//!
//! Validates process creation and removal across ticks:
//! - Orphans are removed in cascade under the default policy
//! - Parents hear about children only after the child's `on_exit`
//! - Sunset and failed starts leave nothing behind
//! - Host-side contexts obey the same ownership rules as processes

use core_types::{Pid, Tid};
use serde_json::{json, Value};
use storage::PROCESS_KEY;
use tests_scheduling::{Op, Script, TestWorld, SCRIPT};
use tick_kernel::ProcessExitReason;

fn spawn_op(script: Script) -> Op {
    Op::Spawn {
        name: SCRIPT.to_string(),
        options: script.to_options(),
    }
}

/// parent → child → grandchild, the parent exits on its third run
fn family() -> Script {
    let grandchild = Script::new().with_thread("grandchild", None, vec![Op::Yield; 6]);
    let mut child_steps = vec![spawn_op(grandchild)];
    child_steps.extend(vec![Op::Yield; 6]);
    let child = Script::new().with_thread("child", None, child_steps);
    Script::new().with_thread("parent", None, vec![spawn_op(child), Op::Yield, Op::Exit])
}

fn persisted_pids(world: &TestWorld) -> Vec<Pid> {
    world.table()["processes"]
        .as_array()
        .map(|records| {
            records
                .iter()
                .filter_map(|record| record["pid"].as_str().map(Pid::new))
                .collect()
        })
        .unwrap_or_default()
}

/// Test: the default policy removes orphans, one generation per drain pass
#[test]
fn test_orphans_are_killed_in_cascade() {
    let mut world = TestWorld::new(100.0);
    let (parent, _) = world.spawn(family());
    world.tick();

    let pids = persisted_pids(&world);
    assert_eq!(pids.len(), 3);
    let (child, grandchild) = (pids[1].clone(), pids[2].clone());

    let report = world.tick();
    assert_eq!(
        report.exited_processes(),
        vec![
            (parent, ProcessExitReason::Killed),
            (child.clone(), ProcessExitReason::Orphaned),
            (grandchild.clone(), ProcessExitReason::Orphaned),
        ]
    );
    assert_eq!(report.processes, 0);
    assert!(world.journal.contains(&format!("exit {}", grandchild)));
    assert!(!world.journal.contains(&format!("child_exit {} {}", child, grandchild)));
}

/// Test: under the orphan policy children outlive their parent
#[test]
fn test_orphan_policy_keeps_children() {
    let mut world = TestWorld::new(100.0).with_config(json!({"orphan_policy": "orphan"}));
    let (parent, _) = world.spawn(family());
    world.tick();

    let report = world.tick();
    assert_eq!(
        report.exited_processes(),
        vec![(parent.clone(), ProcessExitReason::Killed)]
    );
    assert_eq!(report.processes, 2);

    let report = world.tick();
    assert_eq!(report.dispatch_order().len(), 2);
    let ppids = world.inspect(|kernel| {
        kernel
            .processes()
            .map(|info| info.ppid.clone())
            .collect::<Vec<_>>()
    });
    assert_eq!(ppids[0], Some(parent));
}

/// Test: `on_child_exit` fires after the child's own `on_exit`
#[test]
fn test_child_exit_notifies_parent_after_on_exit() {
    let mut world = TestWorld::new(100.0);
    let child = Script::new().with_thread("child", None, vec![Op::Done]);
    let parent = Script::new().with_thread(
        "parent",
        None,
        vec![spawn_op(child), Op::Yield, Op::Yield, Op::Yield],
    );
    let (parent, _) = world.spawn(parent);
    let child = Pid::new(world.memory(&parent)["children"][0].as_str().unwrap());
    world.journal.clear();

    let report = world.tick();
    assert_eq!(
        report.exited_processes(),
        vec![(child.clone(), ProcessExitReason::Finished)]
    );
    assert_eq!(
        world.journal.entries(),
        vec![
            format!("thread_exit {} child completed", child),
            format!("exit {}", child),
            format!("child_exit {} {}", parent, child),
        ]
    );
}

/// Test: a sunset process is removed at the end of the tick it sets
#[test]
fn test_sunset_removes_process() {
    let mut world = TestWorld::new(100.0);
    let start = world.now();
    let mut script = Script::new().with_thread("dusk", None, vec![Op::Yield; 10]);
    script.sunset_at = Some(start + 2);
    let (pid, first) = world.spawn(script);
    assert!(first.exited_processes().is_empty());

    assert!(world.tick().exited_processes().is_empty());
    let report = world.tick();
    assert_eq!(report.exited_processes(), vec![(pid, ProcessExitReason::Sunset)]);
    // It still ran in its last tick
    assert_eq!(report.dispatch_order().len(), 1);
}

/// Test: a process whose `on_start` fails leaves nothing behind
#[test]
fn test_failed_start_is_discarded() {
    let mut world = TestWorld::new(100.0);
    let mut script = Script::new().with_thread("never", None, vec![Op::Yield]);
    script.fail_start = true;

    let (result, report) = world.tick_with(|kernel| {
        kernel.start_process(SCRIPT, script.to_options(), None)
    });
    let err = result.unwrap_err();
    assert!(err.to_string().contains("start refused"));
    assert_eq!(report.processes, 0);
    assert_eq!(report.threads, 0);
    assert!(report.dispatch_order().is_empty());
    assert_eq!(world.table()["processes"], json!([]));
    let memory: Value = serde_json::from_str(world.store.get(PROCESS_KEY).unwrap()).unwrap();
    assert_eq!(memory, json!({}));
    assert!(!world.journal.entries().iter().any(|line| line.starts_with("exit")));
}

/// Test: rejected options never reach the table
#[test]
fn test_rejected_options_fail_spawn() {
    let mut world = TestWorld::new(100.0);
    let options = json!({"reject": true});
    let (result, _) = world.tick_with(|kernel| kernel.start_process(SCRIPT, options, None));
    assert!(result.unwrap_err().to_string().contains("options rejected"));
    assert!(world.journal.entries().is_empty());
}

/// Test: killing another process's thread is refused, killing one's own works
#[test]
fn test_kill_thread_requires_ownership() {
    let mut world = TestWorld::new(100.0);
    let ((a, b), _) = world.tick_with(|kernel| {
        let script = |name: &str| Script::new().with_thread(name, None, vec![Op::Yield; 4]);
        let a = kernel.start_process(SCRIPT, script("a").to_options(), None).unwrap();
        let b = kernel.start_process(SCRIPT, script("b").to_options(), None).unwrap();
        (a, b)
    });

    let thread_of = |world: &mut TestWorld, pid: &Pid| -> Tid {
        world.inspect(|kernel| kernel.threads_of(pid).next().unwrap().tid().clone())
    };
    let tid_b = thread_of(&mut world, &b);
    let tid_a = thread_of(&mut world, &a);

    let ((denied, allowed), report) = world.tick_with(|kernel| {
        let denied = kernel.with_process(&a, |ctx| ctx.kill_thread(&tid_b)).unwrap();
        let allowed = kernel.with_process(&a, |ctx| ctx.kill_thread(&tid_a)).unwrap();
        (denied, allowed)
    });
    assert!(denied.unwrap_err().is_permission_denied());
    assert!(allowed.is_ok());

    assert!(world.journal.contains(&format!("thread_exit {} a killed", a)));
    assert_eq!(report.exited_processes(), vec![(a, ProcessExitReason::Finished)]);
    assert_eq!(report.dispatch_order().len(), 1);
}

/// Test: `ensure_process` starts a root program once
#[test]
fn test_ensure_process_is_idempotent() {
    let mut world = TestWorld::new(100.0);
    let options: Value = Script::new()
        .with_thread("init", None, vec![Op::Yield; 4])
        .to_options();

    let (first, _) = world.tick_with(|kernel| kernel.ensure_process(SCRIPT, options.clone()));
    let (second, report) = world.tick_with(|kernel| kernel.ensure_process(SCRIPT, options.clone()));
    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(report.processes, 1);
}
