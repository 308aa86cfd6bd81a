//! Capability-scoped views of the kernel
//!
//! A process never sees the kernel directly. Every hook receives a
//! [`ProcessContext`] bound to the calling process, and `resume` receives a
//! [`ThreadContext`] that additionally knows which thread is running. All
//! checks ("is this my thread", "is this my child") happen here.

use crate::kernel::Kernel;
use crate::process::{ProcessInfo, ProcessStats};
use crate::thread::{NewThread, Routine, Thread};
use core_types::{Pid, Priority, Tid};
use kernel_api::{KernelError, Tick};
use lifecycle::{FutureKey, Resolution, WaitState};
use logger::LogLevel;
use resources::BudgetMode;
use serde_json::{Map, Value};
use std::ops::{Deref, DerefMut};

static NO_OPTIONS: Value = Value::Null;

/// Kernel access on behalf of one process
pub struct ProcessContext<'k, 'a> {
    pub(crate) kernel: &'k mut Kernel<'a>,
    pid: Pid,
}

impl<'k, 'a> ProcessContext<'k, 'a> {
    pub(crate) fn new(kernel: &'k mut Kernel<'a>, pid: Pid) -> Self {
        Self { kernel, pid }
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn now(&self) -> Tick {
        self.kernel.now()
    }

    pub fn process(&self) -> Result<&ProcessInfo, KernelError> {
        self.kernel
            .process(&self.pid)
            .ok_or_else(|| KernelError::ProcessNotFound(self.pid.clone()))
    }

    pub fn friendly_name(&self) -> String {
        self.process()
            .map(ProcessInfo::friendly_name)
            .unwrap_or_else(|_| self.pid.to_string())
    }

    /// Start options, or the options last returned by `serialize`
    pub fn options(&self) -> &Value {
        self.process().map(|info| &info.options).unwrap_or(&NO_OPTIONS)
    }

    /// The parent, if it is still registered
    pub fn parent(&self) -> Option<&ProcessInfo> {
        let ppid = self.process().ok()?.ppid.as_ref()?;
        self.kernel.process(ppid)
    }

    pub fn children(&self) -> Vec<&ProcessInfo> {
        self.kernel
            .processes()
            .filter(|info| info.ppid.as_ref() == Some(&self.pid))
            .collect()
    }

    /// This process's threads, in registration order
    pub fn threads(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.kernel.threads_of(&self.pid)
    }

    pub fn stats(&self) -> ProcessStats {
        ProcessStats::from_threads(self.kernel.threads_of(&self.pid))
    }

    /// The executing thread, which must belong to this process
    pub fn current_thread(&self) -> Result<Option<&Thread>, KernelError> {
        let Some(tid) = self.kernel.current.as_ref() else {
            return Ok(None);
        };
        let thread = self
            .kernel
            .thread(tid)
            .ok_or_else(|| KernelError::ThreadNotFound(tid.clone()))?;
        if thread.pid != self.pid {
            return Err(KernelError::PermissionDenied {
                pid: self.pid.clone(),
                target: format!("thread {}", tid),
            });
        }
        Ok(Some(thread))
    }

    fn owned_thread(&self, tid: &Tid) -> Result<(), KernelError> {
        let thread = self
            .kernel
            .thread(tid)
            .ok_or_else(|| KernelError::ThreadNotFound(tid.clone()))?;
        if thread.pid != self.pid {
            return Err(KernelError::PermissionDenied {
                pid: self.pid.clone(),
                target: format!("thread {}", tid),
            });
        }
        Ok(())
    }

    /// Starts a thread running `routine`; it is first resumed on the next tick
    /// if dispatch is already under way
    pub fn start_thread(
        &mut self,
        routine: Routine,
        priority: Option<Priority>,
        description: impl Into<String>,
    ) -> Result<Tid, KernelError> {
        self.attach_thread(NewThread::new(routine).with_description(description), priority)
    }

    pub fn attach_thread(
        &mut self,
        thread: NewThread,
        priority: Option<Priority>,
    ) -> Result<Tid, KernelError> {
        let pid = self.pid.clone();
        self.kernel.attach_thread(&pid, thread, priority)
    }

    pub fn kill_thread(&mut self, tid: &Tid) -> Result<(), KernelError> {
        self.owned_thread(tid)?;
        self.kernel.kill_thread(tid);
        Ok(())
    }

    pub fn set_thread_priority(&mut self, tid: &Tid, priority: Priority) -> Result<(), KernelError> {
        self.owned_thread(tid)?;
        if let Some(thread) = self.kernel.thread_mut(tid) {
            thread.priority = priority;
        }
        Ok(())
    }

    /// Starts a child of this process
    pub fn start_process(&mut self, name: &str, options: Value) -> Result<Pid, KernelError> {
        let ppid = self.pid.clone();
        self.kernel.start_process(name, options, Some(ppid))
    }

    /// Kills a direct child; it is removed at the end of the tick
    pub fn kill_child(&mut self, pid: &Pid) -> Result<(), KernelError> {
        let child = self
            .kernel
            .process(pid)
            .ok_or_else(|| KernelError::ProcessNotFound(pid.clone()))?;
        if child.ppid.as_ref() != Some(&self.pid) {
            return Err(KernelError::PermissionDenied {
                pid: self.pid.clone(),
                target: format!("process {}", pid),
            });
        }
        self.kernel.kill(pid)
    }

    /// Ends this process at the end of the tick
    ///
    /// Fails with `ProcessNotFound` once the process has already been removed.
    pub fn exit(&mut self) -> Result<(), KernelError> {
        let pid = self.pid.clone();
        self.kernel.kill(&pid)
    }

    /// Suspends every thread of this process for `ticks` ticks
    pub fn sleep_process(&mut self, ticks: u64) -> Result<(), KernelError> {
        let until = self.now() + ticks;
        let pid = self.pid.clone();
        let info = self
            .kernel
            .process_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        info.sleep = Some(until);
        Ok(())
    }

    /// Suspends the executing thread for `ticks` ticks
    pub fn sleep_thread(&mut self, ticks: u64) -> Result<(), KernelError> {
        let tid = self.current_thread()?.ok_or(KernelError::NoCurrentThread)?.tid.clone();
        let until = self.now() + ticks;
        if let Some(thread) = self.kernel.thread_mut(&tid) {
            thread.sleep = Some(until);
        }
        Ok(())
    }

    pub fn set_priority(&mut self, priority: Priority) -> Result<(), KernelError> {
        let pid = self.pid.clone();
        let info = self
            .kernel
            .process_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        info.priority = priority;
        Ok(())
    }

    pub fn set_default_thread_priority(&mut self, priority: Priority) -> Result<(), KernelError> {
        let pid = self.pid.clone();
        let info = self
            .kernel
            .process_mut(&pid)
            .ok_or(KernelError::ProcessNotFound(pid))?;
        info.default_thread_prio = priority;
        Ok(())
    }

    /// This process's persisted memory namespace
    pub fn memory(&mut self) -> &mut Value {
        self.kernel
            .memory
            .entry(self.pid.clone())
            .or_insert_with(|| Value::Object(Map::new()))
    }

    pub fn memory_ref(&self) -> Option<&Value> {
        self.kernel.memory(&self.pid)
    }

    /// Fulfils a future; waiters see the value after the end-of-tick drain
    pub fn put_future(&mut self, key: impl Into<FutureKey>, value: Value) -> bool {
        self.kernel.put_future(key, value)
    }

    pub fn throw_future(&mut self, key: impl Into<FutureKey>, message: impl Into<String>) -> bool {
        self.kernel.throw_future(key, message)
    }

    pub fn cpu_used(&self) -> f64 {
        self.kernel.gate().used()
    }

    /// Effective CPU ceiling for this tick
    pub fn cpu_limit(&self) -> f64 {
        self.kernel.gate().limit()
    }

    pub fn budget_mode(&self) -> BudgetMode {
        self.kernel.gate().mode()
    }

    pub fn has_budget(&self, margin: f64) -> bool {
        self.kernel.gate().has_budget(margin)
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let pid = self.pid.clone();
        let tid = self.kernel.current.clone();
        self.kernel.log_for(&pid, tid.as_ref(), level, message);
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }
}

/// Kernel access for the thread being resumed
pub struct ThreadContext<'k, 'a> {
    process: ProcessContext<'k, 'a>,
    tid: Tid,
    routine: Routine,
}

impl<'k, 'a> ThreadContext<'k, 'a> {
    pub(crate) fn new(kernel: &'k mut Kernel<'a>, pid: Pid, tid: Tid, routine: Routine) -> Self {
        Self {
            process: ProcessContext::new(kernel, pid),
            tid,
            routine,
        }
    }

    pub fn tid(&self) -> &Tid {
        &self.tid
    }

    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    pub fn routine_mut(&mut self) -> &mut Routine {
        &mut self.routine
    }

    pub(crate) fn into_routine(self) -> Routine {
        self.routine
    }

    /// Replaces the description shown for this thread
    pub fn set_description(&mut self, description: impl Into<String>) {
        let tid = self.tid.clone();
        if let Some(thread) = self.process.kernel.thread_mut(&tid) {
            thread.description = description.into();
        }
    }

    /// Not runnable again until `ticks` ticks from now
    pub fn sleep(&mut self, ticks: u64) {
        let until = self.now() + ticks;
        self.sleep_until(until);
    }

    pub fn sleep_until(&mut self, tick: Tick) {
        let tid = self.tid.clone();
        if let Some(thread) = self.process.kernel.thread_mut(&tid) {
            thread.sleep = Some(tick);
        }
    }

    /// Not runnable again until something wakes this thread
    pub fn park(&mut self) {
        self.sleep_until(Tick::NEVER);
    }

    /// Waits on a future
    ///
    /// Returns the resolution once it has been delivered. Until then the
    /// thread is parked and `None` is returned; the routine should yield and
    /// call again when resumed. `timeout` defaults to the configured future
    /// timeout and only applies if this is the first wait on `key`.
    pub fn wait_future(&mut self, key: impl Into<FutureKey>, timeout: Option<u64>) -> Option<Resolution> {
        let key = key.into();
        let now = self.now();
        let kernel = &mut self.process.kernel;
        let timeout = timeout.unwrap_or(kernel.config().future_timeout);
        match kernel.futures.wait(&key, &self.tid, now, timeout) {
            WaitState::Ready(resolution) => Some(resolution),
            WaitState::Pending => {
                // A timeout is delivered by the drain of the tick after the
                // deadline; an earlier release wakes the thread sooner.
                let wake = kernel
                    .futures
                    .deadline(&key)
                    .map_or(Tick::NEVER, |deadline| deadline.tick() + 2);
                self.sleep_until(wake);
                None
            }
        }
    }
}

impl<'k, 'a> Deref for ThreadContext<'k, 'a> {
    type Target = ProcessContext<'k, 'a>;

    fn deref(&self) -> &Self::Target {
        &self.process
    }
}

impl DerefMut for ThreadContext<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.process
    }
}
