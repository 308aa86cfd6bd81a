//! Scheduling Test Utilities
//!
//! Shared fixtures for the kernel integration tests.
//!
//! ## Test Philosophy
//!
//! - **Every tick is a fresh kernel**: tests drive the system tick by tick
//!   through the store, exactly like a real host
//! - **Scripted behavior**: one configurable program covers dispatch, faults,
//!   sleeping and futures, so each test reads as data
//! - **Deterministic CPU**: threads burn simulated CPU, never wall time

use core_types::{Pid, Priority};
use kernel_api::Tick;
use lifecycle::FutureError;
use logger::MemoryLog;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use storage::{MemoryStore, Store, CONFIG_KEY, KERNEL_KEY, PROCESS_KEY};
use tick_kernel::{
    Kernel, Process, ProcessContext, ProcessError, ProcessInfo, ProcessRegistry, Routine,
    SimHost, Step, Thread, ThreadContext, ThreadError, ThreadExit, TickReport,
};

/// Name the scripted program is registered under
pub const SCRIPT: &str = "script";

/// One instruction of a scripted thread
///
/// `yield`, `sleep`, `sleep_process`, `exit` and a pending `await` end the
/// resumption; every other op runs straight on into the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Yield,
    Burn { amount: f64 },
    Sleep { ticks: u64 },
    SleepProcess { ticks: u64 },
    Fail { message: String },
    Panic { message: String },
    Put { key: String, value: Value },
    Throw { key: String, message: String },
    Await { key: String, #[serde(default)] timeout: Option<u64> },
    Spawn { name: String, #[serde(default)] options: Value },
    Exit,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadScript {
    pub name: String,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub steps: Vec<Op>,
}

/// Options of the scripted program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub priority: Option<f64>,
    pub thread_priority: Option<f64>,
    pub threads: Vec<ThreadScript>,
    /// Reported as sunset from this tick on
    pub sunset_at: Option<u64>,
    /// Threads with these routine names are not rebuilt after a restart
    pub forget: Vec<String>,
    /// The constructor refuses these options
    pub reject: bool,
    pub fail_serialize: bool,
    pub fail_start: bool,
    /// `on_thread_exit` panics with this message after journaling
    pub panic_on_thread_exit: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_thread(mut self, name: &str, priority: Option<f64>, steps: Vec<Op>) -> Self {
        self.threads.push(ThreadScript {
            name: name.to_string(),
            priority,
            steps,
        });
        self
    }

    pub fn to_options(&self) -> Value {
        serde_json::to_value(self).expect("script options")
    }
}

/// Hook calls observed across every process, in call order
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn push(&self, line: String) {
        self.0.borrow_mut().push(line);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.0.borrow().iter().any(|l| l == line)
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Cursor {
    pc: usize,
}

/// Program whose threads follow a script from its options
pub struct Scripted {
    script: Script,
    host: SimHost,
    journal: Journal,
}

impl Scripted {
    pub fn new(options: &Value, host: SimHost, journal: Journal) -> Result<Self, ProcessError> {
        let script: Script = if options.is_null() {
            Script::default()
        } else {
            serde_json::from_value(options.clone())?
        };
        if script.reject {
            return Err(ProcessError::failed("options rejected"));
        }
        Ok(Self {
            script,
            host,
            journal,
        })
    }

    fn push_memory(ctx: &mut ProcessContext<'_, '_>, list: &str, value: Value) {
        let memory = ctx.memory();
        if !memory[list].is_array() {
            memory[list] = json!([]);
        }
        if let Some(items) = memory[list].as_array_mut() {
            items.push(value);
        }
    }
}

impl Process for Scripted {
    fn priority(&self) -> Option<Priority> {
        self.script.priority.map(Priority::new)
    }

    fn default_thread_priority(&self) -> Option<Priority> {
        self.script.thread_priority.map(Priority::new)
    }

    fn on_start(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
        self.journal.push(format!("start {}", ctx.pid()));
        if self.script.fail_start {
            return Err(ProcessError::failed("start refused"));
        }
        Ok(())
    }

    fn on_reload(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
        self.journal.push(format!("reload {}", ctx.pid()));
        for thread in &self.script.threads {
            ctx.start_thread(
                Routine::new(thread.name.clone()),
                thread.priority.map(Priority::new),
                thread.name.clone(),
            )?;
        }
        Ok(())
    }

    fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let name = ctx.routine().name().to_string();
        let steps = self
            .script
            .threads
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.steps.clone())
            .ok_or_else(|| ThreadError::UnknownRoutine(name.clone()))?;
        let mut cursor: Cursor = ctx.routine().load()?;
        Self::push_memory(ctx, "trace", json!(name));

        loop {
            let Some(op) = steps.get(cursor.pc).cloned() else {
                return Ok(Step::done());
            };
            cursor.pc += 1;
            ctx.routine_mut().store(&cursor)?;

            match op {
                Op::Yield => return Ok(Step::Yield),
                Op::Burn { amount } => self.host.burn(amount),
                Op::Sleep { ticks } => {
                    ctx.sleep_thread(ticks)?;
                    return Ok(Step::Yield);
                }
                Op::SleepProcess { ticks } => {
                    ctx.sleep_process(ticks)?;
                    return Ok(Step::Yield);
                }
                Op::Fail { message } => return Err(ThreadError::failed(message)),
                Op::Panic { message } => panic!("{}", message),
                Op::Put { key, value } => {
                    ctx.put_future(key, value);
                }
                Op::Throw { key, message } => {
                    ctx.throw_future(key, message);
                }
                Op::Await { key, timeout } => match ctx.wait_future(key.clone(), timeout) {
                    Some(resolution) => {
                        let outcome = match resolution {
                            Ok(value) => json!({"thread": name, "key": key, "ok": value}),
                            Err(FutureError::TimeLimitExceeded { .. }) => {
                                json!({"thread": name, "key": key, "timeout": true})
                            }
                            Err(err) => json!({"thread": name, "key": key, "err": err.to_string()}),
                        };
                        Self::push_memory(ctx, "awaited", outcome);
                    }
                    None => {
                        cursor.pc -= 1;
                        ctx.routine_mut().store(&cursor)?;
                        return Ok(Step::Yield);
                    }
                },
                Op::Spawn { name, options } => {
                    let child = ctx.start_process(&name, options)?;
                    Self::push_memory(ctx, "children", json!(child));
                }
                Op::Exit => {
                    ctx.exit()?;
                    return Ok(Step::Yield);
                }
                Op::Done => return Ok(Step::done()),
            }
        }
    }

    fn restore_thread(&self, routine: &Routine) -> bool {
        !self.script.forget.iter().any(|name| name == routine.name())
    }

    fn on_thread_exit(&mut self, ctx: &mut ProcessContext<'_, '_>, thread: &Thread, exit: &ThreadExit) {
        let outcome = match exit {
            ThreadExit::Completed(_) => "completed".to_string(),
            ThreadExit::Failed(failure) => format!("failed: {}", failure.message),
            ThreadExit::Killed => "killed".to_string(),
        };
        self.journal.push(format!(
            "thread_exit {} {} {}",
            ctx.pid(),
            thread.description(),
            outcome
        ));
        if let Some(message) = &self.script.panic_on_thread_exit {
            panic!("{}", message);
        }
    }

    fn on_child_exit(&mut self, ctx: &mut ProcessContext<'_, '_>, child: &ProcessInfo) {
        self.journal
            .push(format!("child_exit {} {}", ctx.pid(), child.pid));
    }

    fn on_exit(&mut self, ctx: &mut ProcessContext<'_, '_>) {
        self.journal.push(format!("exit {}", ctx.pid()));
    }

    fn is_sunset(&self, ctx: &ProcessContext<'_, '_>) -> bool {
        self.script
            .sunset_at
            .map_or(false, |tick| ctx.now() >= Tick::new(tick))
    }

    fn serialize(&self) -> Result<Value, ProcessError> {
        if self.script.fail_serialize {
            return Err(ProcessError::failed("cannot serialize"));
        }
        Ok(Value::Null)
    }
}

/// Registry with the scripted program bound to `host` and `journal`
pub fn script_registry(host: &SimHost, journal: &Journal) -> ProcessRegistry {
    let (host, journal) = (host.clone(), journal.clone());
    ProcessRegistry::new().with(SCRIPT, move |options| {
        Ok(Box::new(Scripted::new(options, host.clone(), journal.clone())?))
    })
}

/// Host, store, log and registry for driving the kernel tick by tick
pub struct TestWorld {
    pub host: SimHost,
    pub store: MemoryStore,
    pub log: MemoryLog,
    pub registry: ProcessRegistry,
    pub journal: Journal,
}

impl TestWorld {
    pub fn new(cpu_limit: f64) -> Self {
        let host = SimHost::new(cpu_limit).with_tick(1);
        let journal = Journal::default();
        let registry = script_registry(&host, &journal);
        Self {
            host,
            store: MemoryStore::new(),
            log: MemoryLog::new(),
            registry,
            journal,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.store
            .save(CONFIG_KEY, config.to_string())
            .expect("save config");
        self
    }

    pub fn now(&self) -> u64 {
        use kernel_api::HostApi;
        self.host.time().as_u64()
    }

    /// Runs one complete tick
    pub fn tick(&mut self) -> TickReport {
        self.tick_with(|_| ()).1
    }

    /// Runs one tick, calling `setup` between boot and dispatch
    pub fn tick_with<R>(&mut self, setup: impl FnOnce(&mut Kernel<'_>) -> R) -> (R, TickReport) {
        let mut kernel = Kernel::boot(&self.host, &self.registry, &mut self.log, &self.store);
        let result = setup(&mut kernel);
        let report = kernel.run();
        kernel.checkpoint(&mut self.store).expect("checkpoint");
        drop(kernel);
        self.host.next_tick();
        (result, report)
    }

    /// Runs one tick and inspects the kernel before it is checkpointed
    pub fn tick_inspect<R>(&mut self, inspect: impl FnOnce(&Kernel<'_>) -> R) -> (R, TickReport) {
        let mut kernel = Kernel::boot(&self.host, &self.registry, &mut self.log, &self.store);
        let report = kernel.run();
        let result = inspect(&kernel);
        kernel.checkpoint(&mut self.store).expect("checkpoint");
        drop(kernel);
        self.host.next_tick();
        (result, report)
    }

    /// Boots a kernel from the store and inspects it without running a tick
    pub fn inspect<R>(&mut self, inspect: impl FnOnce(&Kernel<'_>) -> R) -> R {
        let kernel = Kernel::boot(&self.host, &self.registry, &mut self.log, &self.store);
        inspect(&kernel)
    }

    /// Starts a scripted root process in its own tick
    pub fn spawn(&mut self, script: Script) -> (Pid, TickReport) {
        let options = script.to_options();
        let (pid, report) = self.tick_with(|kernel| kernel.start_process(SCRIPT, options, None));
        (pid.expect("spawn"), report)
    }

    /// Persisted kernel table
    pub fn table(&self) -> Value {
        self.load_json(KERNEL_KEY)
    }

    /// Persisted memory namespace of `pid`
    pub fn memory(&self, pid: &Pid) -> Value {
        self.load_json(PROCESS_KEY)[pid.as_str()].clone()
    }

    fn load_json(&self, key: &str) -> Value {
        self.store
            .get(key)
            .map(|raw| serde_json::from_str(raw).expect("stored json"))
            .unwrap_or(Value::Null)
    }

    /// Names of the threads traced in `pid`'s memory, in resumption order
    pub fn trace(&self, pid: &Pid) -> Vec<String> {
        self.memory(pid)["trace"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Thread descriptions in the order they were resumed this tick
pub fn resumed_descriptions(report: &TickReport, threads: &[(String, String)]) -> Vec<String> {
    report
        .dispatch_order()
        .iter()
        .filter_map(|tid| {
            threads
                .iter()
                .find(|(t, _)| t == tid.as_str())
                .map(|(_, d)| d.clone())
        })
        .collect()
}

/// `(tid, description)` of every persisted thread
pub fn persisted_threads(world: &TestWorld) -> Vec<(String, String)> {
    world.table()["threads"]
        .as_array()
        .map(|threads| {
            threads
                .iter()
                .map(|t| {
                    (
                        t["tid"].as_str().unwrap_or_default().to_string(),
                        t["description"].as_str().unwrap_or_default().to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_options_round_trip() {
        let script = Script::new()
            .with_priority(0.2)
            .with_thread("scan", Some(0.3), vec![Op::Burn { amount: 2.0 }, Op::Yield]);
        let options = script.to_options();
        assert_eq!(options["threads"][0]["steps"][0], json!({"op": "burn", "amount": 2.0}));
        assert_eq!(serde_json::from_value::<Script>(options).unwrap(), script);
    }

    #[test]
    fn test_rejected_options() {
        let host = SimHost::new(10.0);
        let journal = Journal::default();
        let registry = script_registry(&host, &journal);
        assert!(registry
            .construct(SCRIPT, &json!({"reject": true}))
            .is_err());
        assert!(registry.construct(SCRIPT, &Value::Null).is_ok());
    }
}
