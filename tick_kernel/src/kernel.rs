//! The kernel instance
//!
//! A `Kernel` lives for exactly one host tick: [`Kernel::boot`] rebuilds the
//! process and thread tables from the store, [`Kernel::run`] dispatches and
//! drains, and [`Kernel::checkpoint`] writes everything back. Nothing is kept
//! in memory between ticks.

use crate::config::{KernelConfig, OrphanPolicy};
use crate::context::ProcessContext;
use crate::events::{ProcessExitReason, ScheduleEvent, ThreadExitReason, TickReport};
use crate::process::{Process, ProcessInfo, ProcessStats};
use crate::registry::ProcessRegistry;
use crate::thread::{CpuStats, NewThread, Thread, ThreadExit, ThreadFailure};
use core_types::{IdGenerator, Pid, Priority, Tid};
use kernel_api::{HostApi, KernelError, Tick};
use lifecycle::{FutureKey, FutureTable};
use logger::{LogEntry, LogLevel, LogSink};
use resources::BudgetGate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use storage::{Store, CORRUPT_KEY, KERNEL_KEY, PROCESS_KEY};

const KERNEL_TAG: &str = "Kernel";

/// Where the kernel is within its tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Dispatch,
    Drain,
    Checkpoint,
}

pub(crate) struct ProcessEntry {
    pub(crate) info: ProcessInfo,
    /// Taken out while one of the process's hooks is running
    pub(crate) behavior: Option<Box<dyn Process>>,
    pub(crate) killed: Option<ProcessExitReason>,
}

/// A persisted process that could not be rebuilt
///
/// Its records are written back verbatim at checkpoint, so a later tick with
/// a fixed registry picks it up again.
#[derive(Debug, Clone, PartialEq)]
pub struct Quarantined {
    pub pid: Option<Pid>,
    pub record: Value,
    pub threads: Vec<Value>,
    pub reason: String,
}

pub(crate) enum Notice {
    ThreadExited { pid: Pid, thread: Thread, exit: ThreadExit },
    ChildExited { ppid: Pid, child: ProcessInfo },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredTable {
    processes: Vec<Value>,
    threads: Vec<Value>,
    futures: Value,
}

#[derive(Serialize)]
struct TableImage<'t> {
    tick: Tick,
    processes: Vec<Value>,
    threads: Vec<Value>,
    futures: &'t FutureTable,
}

pub struct Kernel<'a> {
    pub(crate) host: &'a dyn HostApi,
    registry: &'a ProcessRegistry,
    sink: &'a mut dyn LogSink,
    pub(crate) config: KernelConfig,
    pub(crate) gate: BudgetGate<'a>,
    pub(crate) now: Tick,
    ids: IdGenerator,
    pub(crate) processes: Vec<ProcessEntry>,
    pub(crate) threads: Vec<Thread>,
    pub(crate) memory: BTreeMap<Pid, Value>,
    pub(crate) futures: FutureTable,
    quarantine: Vec<Quarantined>,
    /// Raw table text that failed to parse, preserved at checkpoint
    corrupt: Option<String>,
    /// The store could not be read; checkpoint must not overwrite it
    unreadable: Option<String>,
    pub(crate) current: Option<Tid>,
    pub(crate) notices: VecDeque<Notice>,
    pub(crate) events: Vec<ScheduleEvent>,
    pub(crate) phase: Phase,
}

impl<'a> Kernel<'a> {
    /// Builds this tick's kernel from `store`
    ///
    /// Never fails: unreadable configuration falls back to defaults, an
    /// unreadable table starts empty, and individual records that cannot be
    /// rebuilt are quarantined.
    pub fn boot(
        host: &'a dyn HostApi,
        registry: &'a ProcessRegistry,
        sink: &'a mut dyn LogSink,
        store: &dyn Store,
    ) -> Self {
        let now = host.time();
        let (config, warning) = KernelConfig::load(store);
        let gate = BudgetGate::new(host, config.budget);

        let mut kernel = Kernel {
            host,
            registry,
            sink,
            config,
            gate,
            now,
            ids: IdGenerator::new(now.as_u64()),
            processes: Vec::new(),
            threads: Vec::new(),
            memory: BTreeMap::new(),
            futures: FutureTable::new(),
            quarantine: Vec::new(),
            corrupt: None,
            unreadable: None,
            current: None,
            notices: VecDeque::new(),
            events: Vec::new(),
            phase: Phase::Init,
        };

        if let Some(warning) = warning {
            kernel.kernel_log(LogLevel::Error, warning);
        }
        kernel.load_memory(store);
        kernel.load_table(store);
        kernel.reload_idle();
        kernel
    }

    /// Boots, runs and checkpoints one tick
    pub fn tick(
        host: &'a dyn HostApi,
        registry: &'a ProcessRegistry,
        sink: &'a mut dyn LogSink,
        store: &mut dyn Store,
    ) -> Result<TickReport, KernelError> {
        let mut kernel = Kernel::boot(host, registry, sink, &*store);
        let report = kernel.run();
        kernel.checkpoint(store)?;
        Ok(report)
    }

    fn load_memory(&mut self, store: &dyn Store) {
        match store.load(PROCESS_KEY) {
            Ok(None) => {}
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(memory) => self.memory = memory,
                Err(err) => {
                    self.kernel_log(LogLevel::Error, format!("Process memory is unreadable: {}", err))
                }
            },
            Err(err) => {
                self.kernel_log(LogLevel::Error, format!("Process memory unavailable: {}", err));
                self.unreadable = Some(err.to_string());
            }
        }
    }

    fn load_table(&mut self, store: &dyn Store) {
        let raw = match store.load(KERNEL_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                self.kernel_log(LogLevel::Error, format!("Kernel table unavailable: {}", err));
                self.unreadable = Some(err.to_string());
                return;
            }
        };

        let table: StoredTable = match serde_json::from_str(&raw) {
            Ok(table) => table,
            Err(err) => {
                self.kernel_log(
                    LogLevel::Error,
                    format!("Kernel table is corrupt, starting empty: {}", err),
                );
                self.corrupt = Some(raw);
                return;
            }
        };

        for record in table.processes {
            self.restore_process(record);
        }
        if !table.futures.is_null() {
            match serde_json::from_value(table.futures) {
                Ok(futures) => self.futures = futures,
                Err(err) => self.kernel_log(
                    LogLevel::Error,
                    format!("Future table is unreadable, dropping it: {}", err),
                ),
            }
        }
        for record in table.threads {
            self.restore_thread(record);
        }
    }

    fn restore_process(&mut self, record: Value) {
        let info: ProcessInfo = match serde_json::from_value(record.clone()) {
            Ok(info) => info,
            Err(err) => {
                self.quarantine(record, format!("Unreadable process record: {}", err));
                return;
            }
        };
        if self.entry(&info.pid).is_some() {
            self.kernel_log(LogLevel::Warn, format!("Duplicate process record {}", info.pid));
            return;
        }
        match self.registry.construct(&info.name, &info.options) {
            Ok(behavior) => self.processes.push(ProcessEntry {
                info,
                behavior: Some(behavior),
                killed: None,
            }),
            Err(err) => self.quarantine(record, err.to_string()),
        }
    }

    fn quarantine(&mut self, record: Value, reason: String) {
        let pid = record.get("pid").and_then(Value::as_str).map(Pid::new);
        let entry = LogEntry::new(LogLevel::Error, self.now, format!("Quarantined process: {}", reason))
            .with_tag(KERNEL_TAG);
        let entry = match &pid {
            Some(pid) => entry.with_pid(pid.clone()),
            None => entry,
        };
        self.sink.record(entry);
        self.events.push(ScheduleEvent::ProcessQuarantined {
            pid: pid.clone(),
            reason: reason.clone(),
        });
        self.quarantine.push(Quarantined {
            pid,
            record,
            threads: Vec::new(),
            reason,
        });
    }

    fn restore_thread(&mut self, record: Value) {
        let owner = record.get("pid").and_then(Value::as_str).map(Pid::new);
        if let Some(owner) = &owner {
            if let Some(held) = self
                .quarantine
                .iter_mut()
                .find(|q| q.pid.as_ref() == Some(owner))
            {
                held.threads.push(record);
                return;
            }
        }

        let thread: Thread = match serde_json::from_value(record) {
            Ok(thread) => thread,
            Err(err) => {
                self.kernel_log(LogLevel::Error, format!("Dropping unreadable thread record: {}", err));
                return;
            }
        };
        if self.thread(&thread.tid).is_some() {
            self.kernel_log(LogLevel::Warn, format!("Duplicate thread record {}", thread.tid));
            return;
        }
        let Some(entry) = self.entry(&thread.pid) else {
            self.kernel_log(
                LogLevel::Warn,
                format!("Dropping thread {} of missing process {}", thread.tid, thread.pid),
            );
            return;
        };
        let restore = entry
            .behavior
            .as_ref()
            .map_or(false, |behavior| behavior.restore_thread(&thread.routine));
        if !restore {
            let pid = thread.pid.clone();
            self.log_for(
                &pid,
                Some(&thread.tid),
                LogLevel::Debug,
                format!("Thread '{}' not restored", thread.routine.name()),
            );
            return;
        }
        self.threads.push(thread);
    }

    /// Calls `on_reload` for every awake process that has no threads
    fn reload_idle(&mut self) {
        let now = self.now;
        let idle: Vec<Pid> = self
            .processes
            .iter()
            .filter(|entry| !entry.info.is_asleep(now) && !self.has_threads(&entry.info.pid))
            .map(|entry| entry.info.pid.clone())
            .collect();
        for pid in idle {
            self.reload(&pid);
        }
    }

    pub(crate) fn reload(&mut self, pid: &Pid) {
        self.events.push(ScheduleEvent::ProcessReloaded { pid: pid.clone() });
        if let Some(Err(err)) = self.with_behavior(pid, "on_reload", |process, ctx| process.on_reload(ctx)) {
            self.log_for(pid, None, LogLevel::Error, format!("on_reload failed: {}", err));
        }
    }

    /// Runs `f` with the behavior of `pid` and a context bound to it
    ///
    /// Returns `None` if the process is gone, its behavior is already in use
    /// further up the stack, or `hook` panicked.
    pub(crate) fn with_behavior<R>(
        &mut self,
        pid: &Pid,
        hook: &str,
        f: impl FnOnce(&mut dyn Process, &mut ProcessContext<'_, 'a>) -> R,
    ) -> Option<R> {
        self.call_hook(pid, hook, f)?.ok()
    }

    /// Like [`Kernel::with_behavior`], but hands a caught panic back
    ///
    /// The panic is logged against `pid` and the behavior is put back on
    /// every path.
    pub(crate) fn call_hook<R>(
        &mut self,
        pid: &Pid,
        hook: &str,
        f: impl FnOnce(&mut dyn Process, &mut ProcessContext<'_, 'a>) -> R,
    ) -> Option<Result<R, ThreadFailure>> {
        let mut behavior = self.entry_mut(pid)?.behavior.take()?;
        let outcome = {
            let mut ctx = ProcessContext::new(self, pid.clone());
            panic::catch_unwind(AssertUnwindSafe(|| f(behavior.as_mut(), &mut ctx)))
        };
        if let Some(entry) = self.entry_mut(pid) {
            entry.behavior = Some(behavior);
        }
        match outcome {
            Ok(result) => Some(Ok(result)),
            Err(payload) => {
                let failure = ThreadFailure::from_panic(payload);
                self.log_for(
                    pid,
                    None,
                    LogLevel::Error,
                    format!("{} panicked: {}", hook, failure.message),
                );
                Some(Err(failure))
            }
        }
    }

    /// Starts `name` as a new process
    ///
    /// The behavior is constructed, registered and given `on_start`; if it
    /// has no threads afterwards it also gets `on_reload`.
    pub fn start_process(
        &mut self,
        name: &str,
        options: Value,
        ppid: Option<Pid>,
    ) -> Result<Pid, KernelError> {
        if let Some(ppid) = &ppid {
            if self.entry(ppid).is_none() {
                return Err(KernelError::ProcessNotFound(ppid.clone()));
            }
        }
        let behavior = self.registry.construct(name, &options)?;
        let pid = self.ids.next_pid();
        let info = ProcessInfo {
            pid: pid.clone(),
            ppid,
            name: name.to_string(),
            priority: behavior
                .priority()
                .unwrap_or(self.config.default_process_priority),
            default_thread_prio: behavior
                .default_thread_priority()
                .unwrap_or(self.config.default_thread_priority),
            sleep: None,
            options,
        };
        self.processes.push(ProcessEntry {
            info,
            behavior: Some(behavior),
            killed: None,
        });
        self.memory
            .entry(pid.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        self.events.push(ScheduleEvent::ProcessStarted {
            pid: pid.clone(),
            name: name.to_string(),
        });
        self.log_for(&pid, None, LogLevel::Debug, "Process started");

        let refused = match self.call_hook(&pid, "on_start", |process, ctx| process.on_start(ctx)) {
            Some(Ok(Err(err))) => {
                self.log_for(&pid, None, LogLevel::Error, format!("on_start failed: {}", err));
                Some(err.to_string())
            }
            Some(Err(failure)) => Some(format!("on_start panicked: {}", failure.message)),
            Some(Ok(Ok(()))) | None => None,
        };
        if let Some(reason) = refused {
            self.discard_process(&pid);
            return Err(KernelError::SpawnFailed {
                name: name.to_string(),
                reason,
            });
        }

        let asleep = self
            .entry(&pid)
            .map_or(true, |entry| entry.info.is_asleep(self.now));
        if !asleep && !self.has_threads(&pid) {
            self.reload(&pid);
        }
        Ok(pid)
    }

    /// Starts `name` as a root process unless one is already registered
    pub fn ensure_process(&mut self, name: &str, options: Value) -> Result<Pid, KernelError> {
        let existing = self
            .processes
            .iter()
            .find(|entry| entry.info.name == name && entry.info.ppid.is_none())
            .map(|entry| entry.info.pid.clone());
        match existing {
            Some(pid) => Ok(pid),
            None if self.is_quarantined_name(name) => Err(KernelError::SpawnFailed {
                name: name.to_string(),
                reason: "a persisted instance is quarantined".to_string(),
            }),
            None => self.start_process(name, options, None),
        }
    }

    fn is_quarantined_name(&self, name: &str) -> bool {
        self.quarantine
            .iter()
            .any(|q| q.record.get("name").and_then(Value::as_str) == Some(name))
    }

    /// Removes a process that never finished starting, without any hooks
    fn discard_process(&mut self, pid: &Pid) {
        let tids: Vec<Tid> = self.threads_of(pid).map(|t| t.tid.clone()).collect();
        for tid in &tids {
            self.futures.forget(tid);
        }
        self.threads.retain(|thread| &thread.pid != pid);
        self.processes.retain(|entry| &entry.info.pid != pid);
        self.memory.remove(pid);
    }

    pub(crate) fn attach_thread(
        &mut self,
        pid: &Pid,
        thread: NewThread,
        priority: Option<Priority>,
    ) -> Result<Tid, KernelError> {
        let entry = self
            .entry(pid)
            .ok_or_else(|| KernelError::ProcessNotFound(pid.clone()))?;
        let priority = priority.unwrap_or(entry.info.default_thread_prio);
        let tid = self.ids.next_tid();
        self.threads.push(Thread {
            tid: tid.clone(),
            pid: pid.clone(),
            priority,
            description: thread.description,
            sleep: None,
            stats: CpuStats::default(),
            routine: thread.routine,
        });
        self.events.push(ScheduleEvent::ThreadStarted {
            tid: tid.clone(),
            pid: pid.clone(),
        });
        Ok(tid)
    }

    /// Detaches a thread and queues its owner's `on_thread_exit`
    pub(crate) fn exit_thread(&mut self, tid: &Tid, exit: ThreadExit) -> bool {
        let Some(idx) = self.threads.iter().position(|t| &t.tid == tid) else {
            return false;
        };
        let thread = self.threads.remove(idx);
        self.futures.forget(tid);
        let reason = match &exit {
            ThreadExit::Completed(_) => ThreadExitReason::Completed,
            ThreadExit::Failed(_) => ThreadExitReason::Failed,
            ThreadExit::Killed => ThreadExitReason::Killed,
        };
        self.events.push(ScheduleEvent::ThreadExited {
            tid: tid.clone(),
            pid: thread.pid.clone(),
            reason,
        });
        self.notices.push_back(Notice::ThreadExited {
            pid: thread.pid.clone(),
            thread,
            exit,
        });
        true
    }

    pub(crate) fn kill_thread(&mut self, tid: &Tid) -> bool {
        self.exit_thread(tid, ThreadExit::Killed)
    }

    /// Marks a process for removal at the end of the tick
    pub fn kill(&mut self, pid: &Pid) -> Result<(), KernelError> {
        let entry = self
            .entry_mut(pid)
            .ok_or_else(|| KernelError::ProcessNotFound(pid.clone()))?;
        if entry.killed.is_none() {
            entry.killed = Some(ProcessExitReason::Killed);
        }
        Ok(())
    }

    /// Runs queued lifecycle hooks until none are left
    pub(crate) fn flush_notices(&mut self) {
        while let Some(notice) = self.notices.pop_front() {
            match notice {
                Notice::ThreadExited { pid, thread, exit } => {
                    self.with_behavior(&pid, "on_thread_exit", |process, ctx| {
                        process.on_thread_exit(ctx, &thread, &exit)
                    });
                }
                Notice::ChildExited { ppid, child } => {
                    self.with_behavior(&ppid, "on_child_exit", |process, ctx| {
                        process.on_child_exit(ctx, &child)
                    });
                }
            }
        }
    }

    /// Host-side access to a process, without its behavior
    pub fn with_process<R>(
        &mut self,
        pid: &Pid,
        f: impl FnOnce(&mut ProcessContext<'_, 'a>) -> R,
    ) -> Result<R, KernelError> {
        if self.entry(pid).is_none() {
            return Err(KernelError::ProcessNotFound(pid.clone()));
        }
        let mut ctx = ProcessContext::new(self, pid.clone());
        Ok(f(&mut ctx))
    }

    pub fn put_future(&mut self, key: impl Into<FutureKey>, value: Value) -> bool {
        self.futures.put(&key.into(), value, self.now)
    }

    pub fn throw_future(&mut self, key: impl Into<FutureKey>, message: impl Into<String>) -> bool {
        self.futures.throw(&key.into(), message, self.now)
    }

    /// Writes the table, memory and futures back to `store`
    pub fn checkpoint(&mut self, store: &mut dyn Store) -> Result<(), KernelError> {
        self.phase = Phase::Checkpoint;
        if let Some(reason) = self.unreadable.clone() {
            self.kernel_log(
                LogLevel::Error,
                "Store was unreadable at boot, skipping checkpoint",
            );
            return Err(KernelError::Store(reason));
        }

        let mut processes = Vec::with_capacity(self.processes.len() + self.quarantine.len());
        let mut failed = Vec::new();
        for entry in &self.processes {
            let mut info = entry.info.clone();
            match entry.behavior.as_ref().map(|behavior| behavior.serialize()) {
                Some(Ok(Value::Null)) | None => {}
                Some(Ok(options)) => info.options = options,
                Some(Err(err)) => failed.push((info.pid.clone(), err.to_string())),
            }
            processes.push(to_value(&info)?);
        }
        for (pid, reason) in failed {
            self.log_for(
                &pid,
                None,
                LogLevel::Error,
                format!("serialize failed, keeping previous options: {}", reason),
            );
        }
        processes.extend(self.quarantine.iter().map(|q| q.record.clone()));

        let mut threads = self
            .threads
            .iter()
            .map(to_value)
            .collect::<Result<Vec<_>, _>>()?;
        threads.extend(self.quarantine.iter().flat_map(|q| q.threads.iter().cloned()));

        let live: BTreeSet<Tid> = self
            .threads
            .iter()
            .map(|t| t.tid.clone())
            .chain(
                self.quarantine
                    .iter()
                    .flat_map(|q| q.threads.iter())
                    .filter_map(|t| t.get("tid").and_then(Value::as_str))
                    .map(Tid::new),
            )
            .collect();
        self.futures.retain_waiters(|tid| live.contains(tid));

        let image = TableImage {
            tick: self.now,
            processes,
            threads,
            futures: &self.futures,
        };
        let table = serde_json::to_string(&image)
            .map_err(|err| KernelError::Serialization(err.to_string()))?;

        let processes = &self.processes;
        let quarantine = &self.quarantine;
        self.memory.retain(|pid, _| {
            processes.iter().any(|entry| &entry.info.pid == pid)
                || quarantine.iter().any(|q| q.pid.as_ref() == Some(pid))
        });
        let memory = serde_json::to_string(&self.memory)
            .map_err(|err| KernelError::Serialization(err.to_string()))?;

        store
            .save(KERNEL_KEY, table)
            .map_err(|err| KernelError::Store(err.to_string()))?;
        store
            .save(PROCESS_KEY, memory)
            .map_err(|err| KernelError::Store(err.to_string()))?;
        if let Some(raw) = self.corrupt.take() {
            store
                .save(CORRUPT_KEY, raw)
                .map_err(|err| KernelError::Store(err.to_string()))?;
        }
        Ok(())
    }

    pub fn report(&self) -> TickReport {
        TickReport {
            tick: self.now,
            events: self.events.clone(),
            budget: self.gate.snapshot(),
            processes: self.processes.len(),
            threads: self.threads.len(),
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn gate(&self) -> &BudgetGate<'a> {
        &self.gate
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub(crate) fn entry(&self, pid: &Pid) -> Option<&ProcessEntry> {
        self.processes.iter().find(|entry| &entry.info.pid == pid)
    }

    pub(crate) fn entry_mut(&mut self, pid: &Pid) -> Option<&mut ProcessEntry> {
        self.processes.iter_mut().find(|entry| &entry.info.pid == pid)
    }

    pub fn process(&self, pid: &Pid) -> Option<&ProcessInfo> {
        self.entry(pid).map(|entry| &entry.info)
    }

    pub(crate) fn process_mut(&mut self, pid: &Pid) -> Option<&mut ProcessInfo> {
        self.entry_mut(pid).map(|entry| &mut entry.info)
    }

    /// Registered processes, in registration order
    pub fn processes(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.processes.iter().map(|entry| &entry.info)
    }

    pub fn find_process(&self, name: &str) -> Option<&ProcessInfo> {
        self.processes().find(|info| info.name == name)
    }

    pub fn is_killed(&self, pid: &Pid) -> bool {
        self.entry(pid).map_or(false, |entry| entry.killed.is_some())
    }

    pub fn thread(&self, tid: &Tid) -> Option<&Thread> {
        self.threads.iter().find(|thread| &thread.tid == tid)
    }

    pub(crate) fn thread_mut(&mut self, tid: &Tid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|thread| &thread.tid == tid)
    }

    /// Registered threads, in registration order
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }

    pub fn threads_of<'s>(&'s self, pid: &'s Pid) -> impl Iterator<Item = &'s Thread> + 's {
        self.threads.iter().filter(move |thread| &thread.pid == pid)
    }

    pub(crate) fn has_threads(&self, pid: &Pid) -> bool {
        self.threads.iter().any(|thread| &thread.pid == pid)
    }

    pub fn process_stats(&self, pid: &Pid) -> Option<ProcessStats> {
        self.entry(pid)?;
        Some(ProcessStats::from_threads(self.threads_of(pid)))
    }

    pub fn memory(&self, pid: &Pid) -> Option<&Value> {
        self.memory.get(pid)
    }

    pub fn futures(&self) -> &FutureTable {
        &self.futures
    }

    pub fn quarantined(&self) -> &[Quarantined] {
        &self.quarantine
    }

    pub(crate) fn parent_exists(&self, ppid: &Pid) -> bool {
        self.entry(ppid).is_some() || self.quarantine.iter().any(|q| q.pid.as_ref() == Some(ppid))
    }

    pub(crate) fn orphan_policy(&self) -> OrphanPolicy {
        self.config.orphan_policy
    }

    pub(crate) fn kernel_log(&mut self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, self.now, message).with_tag(KERNEL_TAG);
        self.sink.record(entry);
    }

    /// Logs on behalf of `pid`, tagged with its friendly name
    pub(crate) fn log_for(
        &mut self,
        pid: &Pid,
        tid: Option<&Tid>,
        level: LogLevel,
        message: impl Into<String>,
    ) {
        let tag = self
            .entry(pid)
            .map(|entry| entry.info.friendly_name())
            .unwrap_or_else(|| pid.to_string());
        let entry = LogEntry::new(level, self.now, message)
            .with_tag(tag)
            .with_pid(pid.clone())
            .with_tid(tid.cloned());
        self.sink.record(entry);
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, KernelError> {
    serde_json::to_value(value).map_err(|err| KernelError::Serialization(err.to_string()))
}
