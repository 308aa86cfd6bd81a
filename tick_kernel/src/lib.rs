//! # Tick Kernel
//!
//! A cooperative process and thread scheduler for a host that gives the
//! program a fixed CPU allowance per tick and keeps nothing in memory between
//! ticks.
//!
//! ## Philosophy
//!
//! - **Rebuilt every tick**: the whole kernel is reconstructed from the store
//!   at boot and written back at checkpoint
//! - **Cooperative, never preemptive**: a thread runs until its routine
//!   returns; the kernel only decides whether to start the next one
//! - **Faults stay local**: a failing or panicking thread is removed and
//!   reported to its process; the rest of the tick carries on
//! - **Capabilities through contexts**: a process can only touch its own
//!   threads, its own memory and its direct children
//!
//! ## Core Concepts
//!
//! - `Kernel`: one tick's worth of scheduler (boot → dispatch → drain → checkpoint)
//! - `Process`: behavior of a named program, rebuilt from its options
//! - `Thread`/`Routine`: a resumable unit of work and its persisted state
//! - `ProcessContext`/`ThreadContext`: the only handles a process gets
//! - `ScheduleEvent`/`TickReport`: audit trail of what the tick did

pub mod co;
pub mod config;
pub mod context;
mod dispatch;
pub mod events;
pub mod kernel;
pub mod process;
pub mod registry;
pub mod sim_host;
pub mod thread;

pub use config::{KernelConfig, OrphanPolicy};
pub use context::{ProcessContext, ThreadContext};
pub use events::{ProcessExitReason, ScheduleEvent, ThreadExitReason, TickReport};
pub use kernel::{Kernel, Phase, Quarantined};
pub use process::{Process, ProcessError, ProcessInfo, ProcessStats};
pub use registry::ProcessRegistry;
pub use sim_host::SimHost;
pub use thread::{
    CpuStats, NewThread, Routine, Step, Thread, ThreadError, ThreadExit, ThreadFailure,
    MAIN_ROUTINE,
};

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Pid, Priority};
    use kernel_api::{KernelError, Tick};
    use logger::MemoryLog;
    use serde_json::{json, Value};
    use storage::MemoryStore;

    /// Counts resumptions in memory; finishes after `runs`
    struct Counter {
        runs: u64,
    }

    impl Process for Counter {
        fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
            let done = {
                let memory = ctx.memory();
                let count = memory["count"].as_u64().unwrap_or(0) + 1;
                memory["count"] = json!(count);
                count >= self.runs
            };
            Ok(if done { Step::done() } else { Step::Yield })
        }
    }

    /// Starts an `observer` child from its main thread
    struct Parent;

    impl Process for Parent {
        fn priority(&self) -> Option<Priority> {
            Some(Priority::HIGH)
        }

        fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
            let child = ctx.start_process("observer", Value::Null)?;
            ctx.memory()["child"] = json!(child);
            Ok(Step::Yield)
        }
    }

    /// Records what its hooks were allowed to do
    struct Observer;

    impl Process for Observer {
        fn on_start(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
            let denied = ctx
                .current_thread()
                .err()
                .map_or(false, |err| err.is_permission_denied());
            let parent = ctx.parent().map(|info| info.name.clone());
            let memory = ctx.memory();
            memory["current_thread_denied"] = json!(denied);
            memory["parent"] = json!(parent);
            Ok(())
        }

        fn resume(&mut self, _ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
            Ok(Step::Yield)
        }
    }

    /// Renames its thread and parks it until woken
    struct Napper;

    impl Process for Napper {
        fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
            ctx.set_description("napping");
            ctx.park();
            Ok(Step::Yield)
        }
    }

    /// Exits from its first resumption
    struct Quitter;

    impl Process for Quitter {
        fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
            ctx.exit()?;
            ctx.memory()["exited"] = json!(true);
            Ok(Step::Yield)
        }
    }

    fn registry() -> ProcessRegistry {
        ProcessRegistry::new()
            .with("counter", |opts| {
                Ok(Box::new(Counter {
                    runs: opts["runs"].as_u64().unwrap_or(1),
                }))
            })
            .with("parent", |_| Ok(Box::new(Parent)))
            .with("observer", |_| Ok(Box::new(Observer)))
            .with("napper", |_| Ok(Box::new(Napper)))
            .with("quitter", |_| Ok(Box::new(Quitter)))
    }

    #[test]
    fn test_start_process_reloads_main_thread() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);

        let pid = kernel.start_process("counter", json!({"runs": 2}), None).unwrap();
        let threads: Vec<_> = kernel.threads_of(&pid).collect();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].routine().name(), MAIN_ROUTINE);
        assert_eq!(threads[0].description(), "Main thread");
        assert_eq!(kernel.memory(&pid), Some(&json!({})));
    }

    #[test]
    fn test_unknown_program_is_rejected() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);

        assert_eq!(
            kernel.start_process("missing", Value::Null, None),
            Err(KernelError::UnknownProgram("missing".to_string()))
        );
        assert_eq!(
            kernel.start_process("counter", Value::Null, Some(Pid::new("nope"))),
            Err(KernelError::ProcessNotFound(Pid::new("nope")))
        );
    }

    #[test]
    fn test_process_finishes_when_threads_complete() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let mut store = MemoryStore::new();

        let pid = {
            let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);
            let pid = kernel.start_process("counter", json!({"runs": 2}), None).unwrap();
            let report = kernel.run();
            assert_eq!(report.dispatch_order().len(), 1);
            kernel.checkpoint(&mut store).unwrap();
            pid
        };
        host.next_tick();

        let report = Kernel::tick(&host, &registry, &mut log, &mut store).unwrap();
        assert_eq!(
            report.exited_processes(),
            vec![(pid.clone(), ProcessExitReason::Finished)]
        );
        assert_eq!(report.processes, 0);
    }

    #[test]
    fn test_hook_outside_own_thread_cannot_see_current_thread() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);

        let parent = kernel.start_process("parent", Value::Null, None).unwrap();
        kernel.run();

        let child = kernel.memory(&parent).unwrap()["child"].as_str().unwrap().to_string();
        let child = Pid::new(child);
        assert_eq!(kernel.process(&child).unwrap().ppid, Some(parent));
        let memory = kernel.memory(&child).unwrap();
        assert_eq!(memory["current_thread_denied"], json!(true));
        assert_eq!(memory["parent"], json!("parent"));
    }

    #[test]
    fn test_host_context_has_no_current_thread() {
        let host = SimHost::new(100.0).with_tick(4);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);
        let pid = kernel.start_process("counter", Value::Null, None).unwrap();

        let result = kernel
            .with_process(&pid, |ctx| {
                assert!(ctx.current_thread().unwrap().is_none());
                ctx.sleep_thread(3)
            })
            .unwrap();
        assert_eq!(result, Err(KernelError::NoCurrentThread));

        kernel
            .with_process(&pid, |ctx| ctx.sleep_process(3))
            .unwrap()
            .unwrap();
        assert_eq!(kernel.process(&pid).unwrap().sleep, Some(Tick::new(7)));
    }

    #[test]
    fn test_kill_child_requires_parentage() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);

        let a = kernel.start_process("counter", Value::Null, None).unwrap();
        let b = kernel.start_process("counter", Value::Null, None).unwrap();
        let c = kernel.start_process("counter", Value::Null, Some(a.clone())).unwrap();

        let denied = kernel.with_process(&b, |ctx| ctx.kill_child(&c)).unwrap();
        assert!(denied.unwrap_err().is_permission_denied());

        kernel.with_process(&a, |ctx| ctx.kill_child(&c)).unwrap().unwrap();
        assert!(kernel.is_killed(&c));
    }

    #[test]
    fn test_park_and_describe_thread() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);

        let pid = kernel.start_process("napper", Value::Null, None).unwrap();
        kernel.run();

        let thread = kernel.threads_of(&pid).next().unwrap();
        assert_eq!(thread.description(), "napping");
        assert!(thread.is_parked());
        assert_eq!(thread.sleep(), Some(Tick::NEVER));
        assert!(kernel.process(&pid).is_some());
    }

    #[test]
    fn test_exit_removes_process_at_end_of_tick() {
        let host = SimHost::new(100.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let store = MemoryStore::new();
        let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);

        let pid = kernel.start_process("quitter", Value::Null, None).unwrap();
        let report = kernel.run();

        assert_eq!(report.dispatch_order().len(), 1);
        assert_eq!(
            report.exited_processes(),
            vec![(pid.clone(), ProcessExitReason::Killed)]
        );
        assert!(kernel.process(&pid).is_none());
        assert!(report.failed_threads().is_empty());
    }
}
