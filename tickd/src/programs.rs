//! Demo programs
//!
//! A small process tree that exercises the kernel the way a real workload
//! does:
//!
//! - `init` supervises the tree and restarts its services
//! - `recon` periodically sends a `scout` to a room and awaits its report
//!   through a future
//! - `scout` travels (sleeps) and then fulfils the report future
//! - `empire` expands on a long interval from an idle-priority thread

use core_types::Priority;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tick_kernel::co::Interval;
use tick_kernel::{
    Process, ProcessContext, ProcessError, ProcessInfo, ProcessRegistry, Routine, Step, Thread,
    ThreadContext, ThreadError, ThreadExit,
};

pub const INIT: &str = "init";
pub const RECON: &str = "recon";
pub const SCOUT: &str = "scout";
pub const EMPIRE: &str = "empire";

/// Ticks between two supervision passes of `init`
const SUPERVISE_PERIOD: u64 = 5;
const HEARTBEAT_PERIOD: u64 = 20;

/// Registry with every demo program
pub fn registry() -> ProcessRegistry {
    ProcessRegistry::new()
        .with(INIT, |_| Ok(Box::new(Init)))
        .with(RECON, |options| Ok(Box::new(Recon::new(parse(options)?))))
        .with(SCOUT, |options| Ok(Box::new(Scout::new(parse(options)?))))
        .with(EMPIRE, |options| Ok(Box::new(Empire::new(parse(options)?))))
}

fn parse<T: DeserializeOwned + Default>(options: &Value) -> Result<T, ProcessError> {
    if options.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(options.clone())?)
}

/// Future a scout fulfils when it reaches `room`
pub fn vision_key(room: &str) -> String {
    format!("vision:{}", room)
}

// ============================================================================
// Init
// ============================================================================

/// Root of the tree; keeps its services running
pub struct Init;

#[derive(Debug, Default, Serialize, Deserialize)]
struct InitState {
    heartbeat: Interval,
}

impl Process for Init {
    fn priority(&self) -> Option<Priority> {
        Some(Priority::HIGHEST)
    }

    fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let mut state: InitState = ctx.routine().load()?;

        for name in [RECON, EMPIRE] {
            let running = ctx.children().iter().any(|child| child.name == name);
            if !running {
                let pid = ctx.start_process(name, Value::Null)?;
                ctx.info(format!("Started {} as {}", name, pid));
            }
        }

        let now = ctx.now();
        if state.heartbeat.is_due(now) {
            state.heartbeat.reset(now, HEARTBEAT_PERIOD);
            let children = ctx.children().len();
            let message = format!(
                "{} services, cpu {:.2}/{:.2} ({})",
                children,
                ctx.cpu_used(),
                ctx.cpu_limit(),
                ctx.budget_mode()
            );
            ctx.info(message);
        }

        ctx.routine_mut().store(&state)?;
        ctx.sleep(SUPERVISE_PERIOD);
        Ok(Step::Yield)
    }

    fn on_child_exit(&mut self, ctx: &mut ProcessContext<'_, '_>, child: &ProcessInfo) {
        ctx.warn(format!("Service {} ({}) exited", child.friendly_name(), child.pid));
    }
}

// ============================================================================
// Recon
// ============================================================================

const SURVEY: &str = "survey";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconOptions {
    /// Rooms visited in rotation
    pub rooms: Vec<String>,
    /// Ticks between two surveys
    pub period: u64,
    /// Ticks a scout has to report back
    pub timeout: u64,
}

impl Default for ReconOptions {
    fn default() -> Self {
        Self {
            rooms: vec!["W1N1".to_string(), "W2N1".to_string(), "W1N2".to_string()],
            period: 25,
            timeout: 30,
        }
    }
}

/// Services visibility by sending scouts and collecting their reports
pub struct Recon {
    options: ReconOptions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SurveyState {
    interval: Interval,
    cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending: Option<String>,
}

impl Recon {
    pub fn new(options: ReconOptions) -> Self {
        Self { options }
    }

    fn survey(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let mut state: SurveyState = ctx.routine().load()?;

        let step = loop {
            if let Some(room) = state.pending.clone() {
                match ctx.wait_future(vision_key(&room), Some(self.options.timeout)) {
                    None => break Step::Yield,
                    Some(Ok(report)) => {
                        ctx.memory()["intel"][room.as_str()] = report;
                        ctx.success(format!("Vision on {}", room));
                    }
                    Some(Err(err)) => ctx.warn(format!("Vision request for {} failed: {}", room, err)),
                }
                state.pending = None;
            }

            let now = ctx.now();
            if !state.interval.is_due(now) {
                state.interval.wait(ctx);
                break Step::Yield;
            }
            if self.options.rooms.is_empty() {
                break Step::done();
            }
            let room = self.options.rooms[state.cursor % self.options.rooms.len()].clone();
            state.cursor += 1;
            state.interval.reset(now, self.options.period);

            let scout = ctx.start_process(SCOUT, json!({ "room": room }))?;
            ctx.debug(format!("Scout {} sent to {}", scout, room));
            state.pending = Some(room);
        };

        ctx.routine_mut().store(&state)?;
        Ok(step)
    }
}

impl Process for Recon {
    fn priority(&self) -> Option<Priority> {
        Some(Priority::HIGH)
    }

    fn default_thread_priority(&self) -> Option<Priority> {
        Some(Priority::HIGH)
    }

    fn on_reload(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
        ctx.start_thread(Routine::new(SURVEY), None, "Visibility updates")?;
        Ok(())
    }

    fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let name = ctx.routine().name().to_string();
        match name.as_str() {
            SURVEY => self.survey(ctx),
            _ => Err(ThreadError::UnknownRoutine(name)),
        }
    }

    fn serialize(&self) -> Result<Value, ProcessError> {
        Ok(serde_json::to_value(&self.options)?)
    }
}

// ============================================================================
// Scout
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutOptions {
    pub room: String,
    /// Travel time in ticks; derived from the room name when absent
    pub distance: Option<u64>,
}

/// Travels to a room and reports what it saw
pub struct Scout {
    options: ScoutOptions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TravelState {
    departed: bool,
}

impl Scout {
    pub fn new(options: ScoutOptions) -> Self {
        Self { options }
    }

    /// Between 1 and 5 ticks, stable for a given room
    pub fn distance(&self) -> u64 {
        self.options.distance.unwrap_or_else(|| {
            let sum: u64 = self.options.room.bytes().map(u64::from).sum();
            sum % 5 + 1
        })
    }
}

impl Process for Scout {
    fn priority(&self) -> Option<Priority> {
        Some(Priority::LOW)
    }

    fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let mut state: TravelState = ctx.routine().load()?;
        if !state.departed {
            state.departed = true;
            ctx.routine_mut().store(&state)?;
            ctx.sleep(self.distance());
            return Ok(Step::Yield);
        }

        let report = json!({ "room": self.options.room, "seen": ctx.now() });
        if !ctx.put_future(vision_key(&self.options.room), report.clone()) {
            ctx.debug(format!("{} was already reported this tick", self.options.room));
        }
        Ok(Step::Done(Some(report)))
    }

    /// Nobody is waiting once the sender is gone
    fn is_sunset(&self, ctx: &ProcessContext<'_, '_>) -> bool {
        ctx.parent().is_none()
    }
}

// ============================================================================
// Empire
// ============================================================================

const AUTO_EXPAND: &str = "auto_expand";
const EXPAND: &str = "expand";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmpireOptions {
    /// Ticks between two expansion checks
    pub expansion_freq: u64,
    pub room_limit: usize,
}

impl Default for EmpireOptions {
    fn default() -> Self {
        Self {
            expansion_freq: 50,
            room_limit: 3,
        }
    }
}

/// Claims new rooms on a long interval
pub struct Empire {
    options: EmpireOptions,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExpandState {
    interval: Interval,
}

impl Empire {
    pub fn new(options: EmpireOptions) -> Self {
        Self { options }
    }

    fn claimed(ctx: &ProcessContext<'_, '_>) -> usize {
        ctx.memory_ref()
            .and_then(|memory| memory["claimed"].as_array())
            .map_or(0, Vec::len)
    }

    fn auto_expand(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let mut state: ExpandState = ctx.routine().load()?;
        let now = ctx.now();
        if state.interval.is_due(now) {
            state.interval.reset(now, self.options.expansion_freq);
            if Self::claimed(ctx) < self.options.room_limit {
                ctx.start_thread(Routine::new(EXPAND), Some(Priority::CRITICAL), "Claiming room")?;
            }
        }
        state.interval.wait(ctx);
        ctx.routine_mut().store(&state)?;
        Ok(Step::Yield)
    }

    /// Kept separate from the loop so it can be started by hand
    fn expand(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let claimed = Self::claimed(ctx);
        if claimed >= self.options.room_limit {
            return Err(ThreadError::failed("Already at room limit"));
        }

        let room = format!("E{}N1", claimed + 1);
        let memory = ctx.memory();
        if !memory["claimed"].is_array() {
            memory["claimed"] = json!([]);
        }
        if let Some(rooms) = memory["claimed"].as_array_mut() {
            rooms.push(json!(room));
        }
        ctx.success(format!("Claimed {}", room));
        Step::done_with(&room)
    }
}

impl Process for Empire {
    fn priority(&self) -> Option<Priority> {
        Some(Priority::IDLE)
    }

    fn default_thread_priority(&self) -> Option<Priority> {
        Some(Priority::IDLE)
    }

    fn on_reload(&mut self, ctx: &mut ProcessContext<'_, '_>) -> Result<(), ProcessError> {
        ctx.start_thread(Routine::new(AUTO_EXPAND), None, "Automatic empire expansion")?;
        Ok(())
    }

    fn resume(&mut self, ctx: &mut ThreadContext<'_, '_>) -> Result<Step, ThreadError> {
        let name = ctx.routine().name().to_string();
        match name.as_str() {
            AUTO_EXPAND => self.auto_expand(ctx),
            EXPAND => self.expand(ctx),
            _ => Err(ThreadError::UnknownRoutine(name)),
        }
    }

    fn on_thread_exit(&mut self, ctx: &mut ProcessContext<'_, '_>, _thread: &Thread, exit: &ThreadExit) {
        if let ThreadExit::Failed(failure) = exit {
            ctx.warn(format!("Expansion failed: {}", failure.message));
        }
    }

    fn serialize(&self) -> Result<Value, ProcessError> {
        Ok(serde_json::to_value(&self.options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logger::MemoryLog;
    use storage::{MemoryStore, Store, PROCESS_KEY};
    use tick_kernel::{Kernel, SimHost};

    fn memory_of(store: &MemoryStore, pid: &core_types::Pid) -> Value {
        let raw = store.get(PROCESS_KEY).unwrap();
        serde_json::from_str::<Value>(raw).unwrap()[pid.as_str()].clone()
    }

    #[test]
    fn test_scout_distance_is_stable() {
        let scout = Scout::new(ScoutOptions {
            room: "W1N1".to_string(),
            distance: None,
        });
        assert_eq!(scout.distance(), 4);
        assert_eq!(scout.distance(), scout.distance());

        let fixed = Scout::new(ScoutOptions {
            room: "W1N1".to_string(),
            distance: Some(9),
        });
        assert_eq!(fixed.distance(), 9);
    }

    #[test]
    fn test_options_default_when_null() {
        let options: EmpireOptions = parse(&Value::Null).unwrap();
        assert_eq!(options, EmpireOptions::default());
        let options: ReconOptions = parse(&json!({"period": 3})).unwrap();
        assert_eq!(options.period, 3);
        assert_eq!(options.timeout, 30);
        assert!(parse::<ScoutOptions>(&json!({"room": 5})).is_err());
    }

    #[test]
    fn test_empire_stops_at_room_limit() {
        let host = SimHost::new(50.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let mut store = MemoryStore::new();

        let pid = {
            let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);
            let pid = kernel
                .start_process(EMPIRE, json!({"expansion_freq": 1, "room_limit": 2}), None)
                .unwrap();
            kernel.run();
            kernel.checkpoint(&mut store).unwrap();
            pid
        };
        for _ in 0..6 {
            host.next_tick();
            Kernel::tick(&host, &registry, &mut log, &mut store).unwrap();
        }

        assert_eq!(memory_of(&store, &pid)["claimed"], json!(["E1N1", "E2N1"]));
        assert!(log.contains("Claimed E2N1"));
        assert!(!log.contains("Expansion failed"));
    }

    #[test]
    fn test_recon_collects_scout_reports() {
        let host = SimHost::new(50.0);
        let registry = registry();
        let mut log = MemoryLog::new();
        let mut store = MemoryStore::new();
        let options = json!({"rooms": ["W1N1"], "period": 100});

        let pid = {
            let mut kernel = Kernel::boot(&host, &registry, &mut log, &store);
            let pid = kernel.start_process(RECON, options, None).unwrap();
            kernel.run();
            kernel.checkpoint(&mut store).unwrap();
            pid
        };
        for _ in 0..8 {
            host.next_tick();
            Kernel::tick(&host, &registry, &mut log, &mut store).unwrap();
        }

        // Sent on tick 0, travels 4 ticks from tick 1, reports on tick 5
        let intel = &memory_of(&store, &pid)["intel"];
        assert_eq!(intel["W1N1"], json!({"room": "W1N1", "seen": 5}));
        assert!(log.contains("Vision on W1N1"));
        assert!(store.load(storage::KERNEL_KEY).unwrap().is_some());
    }
}
