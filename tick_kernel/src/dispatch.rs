//! Dispatch and drain
//!
//! Dispatch resumes every ready thread at most once, lowest priority value
//! first, until the CPU gate closes. Drain then releases futures and removes
//! processes that are finished, killed or sunset.

use crate::config::OrphanPolicy;
use crate::context::ThreadContext;
use crate::events::{ProcessExitReason, ScheduleEvent, ThreadExitReason, TickReport};
use crate::kernel::{Kernel, Notice, Phase};
use crate::thread::{Step, ThreadExit, ThreadFailure};
use core_types::{Pid, Tid};
use lifecycle::ReleaseKind;
use logger::LogLevel;
use std::panic::{self, AssertUnwindSafe};

impl<'a> Kernel<'a> {
    /// Dispatches ready threads, then drains
    pub fn run(&mut self) -> TickReport {
        self.dispatch();
        self.drain();
        self.report()
    }

    pub fn dispatch(&mut self) {
        self.phase = Phase::Dispatch;
        let ready = self.ready_threads();
        let total = ready.len();

        for (idx, tid) in ready.into_iter().enumerate() {
            if !self.gate.has_budget(self.config.dispatch_margin) {
                let deferred = total - idx;
                self.events.push(ScheduleEvent::BudgetExhausted {
                    used: self.gate.used(),
                    limit: self.gate.limit(),
                    deferred,
                });
                self.kernel_log(
                    LogLevel::Warn,
                    format!(
                        "CPU budget exhausted ({:.2}/{:.2}), deferring {} threads",
                        self.gate.used(),
                        self.gate.limit(),
                        deferred
                    ),
                );
                break;
            }
            // Earlier threads may have killed, slept or exited this one.
            if !self.is_runnable(&tid) {
                continue;
            }
            self.resume(&tid);
            self.flush_notices();
        }
    }

    /// Threads to dispatch this tick, in dispatch order
    fn ready_threads(&mut self) -> Vec<Tid> {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        for (seq, thread) in self.threads.iter().enumerate() {
            let Some(owner) = self.entry(&thread.pid) else {
                continue;
            };
            if thread.is_asleep(self.now) || owner.killed.is_some() || owner.info.is_asleep(self.now) {
                continue;
            }
            if !self.gate.admits(owner.info.priority) {
                skipped.push(thread.tid.clone());
                continue;
            }
            ready.push((thread.priority, seq, thread.tid.clone()));
        }
        if !skipped.is_empty() {
            self.kernel_log(
                LogLevel::Warn,
                format!("Critical CPU reserve, skipping {} low-priority threads", skipped.len()),
            );
        }
        for tid in skipped {
            self.events.push(ScheduleEvent::CriticalSkipped { tid });
        }

        ready.sort_by(|a, b| a.0.order(&b.0).then(a.1.cmp(&b.1)));
        ready.into_iter().map(|(_, _, tid)| tid).collect()
    }

    fn is_runnable(&self, tid: &Tid) -> bool {
        let Some(thread) = self.thread(tid) else {
            return false;
        };
        let Some(owner) = self.entry(&thread.pid) else {
            return false;
        };
        !thread.is_asleep(self.now) && owner.killed.is_none() && !owner.info.is_asleep(self.now)
    }

    /// Resumes one thread and accounts for it
    fn resume(&mut self, tid: &Tid) {
        let sys_start = self.host.cpu_used();
        let Some(thread) = self.thread_mut(tid) else {
            return;
        };
        let pid = thread.pid.clone();
        let routine = std::mem::take(&mut thread.routine);
        let Some(mut behavior) = self.entry_mut(&pid).and_then(|entry| entry.behavior.take()) else {
            if let Some(thread) = self.thread_mut(tid) {
                thread.routine = routine;
            }
            return;
        };

        self.current = Some(tid.clone());
        self.events.push(ScheduleEvent::ThreadResumed {
            tid: tid.clone(),
            pid: pid.clone(),
        });
        log::trace!(target: "tick_kernel", "resuming {} of {}", tid, pid);

        let usr_start = self.host.cpu_used();
        let (outcome, routine) = {
            let mut ctx = ThreadContext::new(self, pid.clone(), tid.clone(), routine);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| behavior.resume(&mut ctx)));
            (outcome, ctx.into_routine())
        };
        let usr = self.host.cpu_used() - usr_start;

        self.current = None;
        if let Some(entry) = self.entry_mut(&pid) {
            entry.behavior = Some(behavior);
        }

        let exit = match outcome {
            Ok(Ok(Step::Yield)) => None,
            Ok(Ok(Step::Done(value))) => Some(ThreadExit::Completed(value)),
            Ok(Err(err)) => Some(ThreadExit::Failed(ThreadFailure::from_error(&err))),
            Err(payload) => Some(ThreadExit::Failed(ThreadFailure::from_panic(payload))),
        };
        if let Some(ThreadExit::Failed(failure)) = &exit {
            self.log_failure(&pid, tid, failure);
        }

        let window = self.config.cpu_stats_window;
        let sys = self.host.cpu_used() - sys_start;
        // Gone if it killed itself or its process discarded it.
        let Some(thread) = self.thread_mut(tid) else {
            return;
        };
        thread.routine = routine;
        thread.stats.record(usr, sys, window);

        if let Some(exit) = exit {
            self.exit_thread(tid, exit);
        }
    }

    fn log_failure(&mut self, pid: &Pid, tid: &Tid, failure: &ThreadFailure) {
        let mut message = if failure.panicked {
            format!("Thread panicked: {}", failure.message)
        } else {
            format!("Thread failed: {}", failure.message)
        };
        for cause in &failure.chain {
            message.push_str("\n  caused by: ");
            message.push_str(cause);
        }
        self.log_for(pid, Some(tid), LogLevel::Error, message);
    }

    /// Releases futures and removes processes that are done
    pub fn drain(&mut self) {
        self.phase = Phase::Drain;
        self.release_futures();
        self.flush_notices();
        self.mark_sunset();

        loop {
            let doomed = self.doomed_processes();
            if doomed.is_empty() {
                break;
            }
            for (pid, reason) in doomed {
                self.remove_process(&pid, reason);
            }
            self.flush_notices();
        }
    }

    fn release_futures(&mut self) {
        for release in self.futures.drain(self.now) {
            for tid in &release.waiters {
                if let Some(thread) = self.thread_mut(tid) {
                    thread.sleep = None;
                }
            }
            if release.kind == ReleaseKind::TimedOut {
                self.kernel_log(
                    LogLevel::Warn,
                    format!(
                        "Future {} timed out with {} waiters",
                        release.key,
                        release.waiters.len()
                    ),
                );
            }
            self.events.push(ScheduleEvent::FutureReleased {
                waiters: release.waiters.len(),
                key: release.key,
                kind: release.kind,
            });
        }
    }

    fn mark_sunset(&mut self) {
        let live: Vec<Pid> = self
            .processes
            .iter()
            .filter(|entry| entry.killed.is_none())
            .map(|entry| entry.info.pid.clone())
            .collect();
        for pid in live {
            let sunset = self.with_behavior(&pid, "is_sunset", |process, ctx| process.is_sunset(ctx));
            if sunset == Some(true) {
                if let Some(entry) = self.entry_mut(&pid) {
                    entry.killed = Some(ProcessExitReason::Sunset);
                }
            }
        }
    }

    fn doomed_processes(&self) -> Vec<(Pid, ProcessExitReason)> {
        let kill_orphans = self.orphan_policy() == OrphanPolicy::Kill;
        self.processes
            .iter()
            .filter_map(|entry| {
                let info = &entry.info;
                let reason = if let Some(reason) = entry.killed {
                    reason
                } else if kill_orphans
                    && info
                        .ppid
                        .as_ref()
                        .map_or(false, |ppid| !self.parent_exists(ppid))
                {
                    ProcessExitReason::Orphaned
                } else if !info.is_asleep(self.now) && !self.has_threads(&info.pid) {
                    ProcessExitReason::Finished
                } else {
                    return None;
                };
                Some((info.pid.clone(), reason))
            })
            .collect()
    }

    /// Runs `on_exit`, unregisters the process and notifies its parent
    fn remove_process(&mut self, pid: &Pid, reason: ProcessExitReason) {
        self.drop_threads(pid);
        self.with_behavior(pid, "on_exit", |process, ctx| process.on_exit(ctx));
        self.drop_threads(pid);

        let Some(idx) = self.processes.iter().position(|entry| &entry.info.pid == pid) else {
            return;
        };
        let entry = self.processes.remove(idx);
        self.memory.remove(pid);
        self.events.push(ScheduleEvent::ProcessExited {
            pid: pid.clone(),
            reason,
        });
        let level = match reason {
            ProcessExitReason::Finished | ProcessExitReason::Sunset => LogLevel::Info,
            ProcessExitReason::Killed | ProcessExitReason::Orphaned => LogLevel::Warn,
        };
        let message = format!(
            "Process {} {} exited ({:?})",
            pid,
            entry.info.friendly_name(),
            reason
        );
        self.kernel_log(level, message);

        if let Some(ppid) = entry.info.ppid.clone() {
            if self.entry(&ppid).is_some() {
                self.notices.push_back(Notice::ChildExited {
                    ppid,
                    child: entry.info,
                });
            }
        }
    }

    /// Threads of a departing process leave without `on_thread_exit`
    fn drop_threads(&mut self, pid: &Pid) {
        let tids: Vec<Tid> = self.threads_of(pid).map(|thread| thread.tid.clone()).collect();
        for tid in tids {
            self.futures.forget(&tid);
            self.events.push(ScheduleEvent::ThreadExited {
                tid,
                pid: pid.clone(),
                reason: ThreadExitReason::Killed,
            });
        }
        self.threads.retain(|thread| &thread.pid != pid);
    }
}
