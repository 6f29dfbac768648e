use crate::core::registry::lock;
use crate::domain::model::{ActionSpec, LineId};
use crate::domain::ports::{
    ActionLauncher, Direction, Edge, EdgeEvent, EdgeSource, EdgeStream, LineHandle, LineManager,
};
use crate::utils::error::{MonitorError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct SimLine {
    requested: bool,
    direction: Option<Direction>,
    level: bool,
    debounce: Duration,
    exported: bool,
    releases: usize,
    writes: Vec<bool>,
    watchers: Vec<mpsc::UnboundedSender<EdgeEvent>>,
}

#[derive(Debug, Default)]
struct Faults {
    request: HashSet<LineId>,
    direction: HashSet<LineId>,
    write: HashSet<LineId>,
    release: HashSet<LineId>,
    edges: HashSet<LineId>,
}

#[derive(Debug, Default)]
struct BoardState {
    lines: HashMap<LineId, SimLine>,
    invalid: HashSet<LineId>,
    faults: Faults,
}

/// In-memory GPIO bank. Every line number is valid unless marked otherwise.
#[derive(Debug, Default)]
pub struct SimulatedBoard {
    state: Mutex<BoardState>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_invalid(&self, line: LineId) {
        lock(&self.state).invalid.insert(line);
    }

    pub fn fail_request(&self, line: LineId) {
        lock(&self.state).faults.request.insert(line);
    }

    pub fn fail_direction(&self, line: LineId) {
        lock(&self.state).faults.direction.insert(line);
    }

    pub fn fail_write(&self, line: LineId) {
        lock(&self.state).faults.write.insert(line);
    }

    pub fn fail_release(&self, line: LineId) {
        lock(&self.state).faults.release.insert(line);
    }

    pub fn fail_edges(&self, line: LineId) {
        lock(&self.state).faults.edges.insert(line);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).faults = Faults::default();
    }

    /// Drives an input to `level`, emitting an edge stamped `at` if it changed.
    pub fn drive_at(&self, line: LineId, level: bool, at: Instant) {
        let mut state = lock(&self.state);
        let sim = state.lines.entry(line).or_default();
        if sim.level == level {
            return;
        }
        sim.level = level;
        let event = EdgeEvent {
            edge: if level { Edge::Rising } else { Edge::Falling },
            at,
        };
        sim.watchers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn drive(&self, line: LineId, level: bool) {
        self.drive_at(line, level, Instant::now());
    }

    /// Rising then falling edge, both stamped `at`.
    pub fn press_at(&self, line: LineId, at: Instant) {
        self.drive_at(line, true, at);
        self.drive_at(line, false, at);
    }

    pub fn press(&self, line: LineId) {
        self.press_at(line, Instant::now());
    }

    pub fn level(&self, line: LineId) -> Option<bool> {
        lock(&self.state).lines.get(&line).map(|l| l.level)
    }

    pub fn written_levels(&self, line: LineId) -> Vec<bool> {
        lock(&self.state)
            .lines
            .get(&line)
            .map(|l| l.writes.clone())
            .unwrap_or_default()
    }

    pub fn debounce(&self, line: LineId) -> Option<Duration> {
        lock(&self.state).lines.get(&line).map(|l| l.debounce)
    }

    pub fn is_output(&self, line: LineId) -> bool {
        matches!(
            lock(&self.state).lines.get(&line).and_then(|l| l.direction),
            Some(Direction::Output { .. })
        )
    }

    pub fn is_exported(&self, line: LineId) -> bool {
        lock(&self.state)
            .lines
            .get(&line)
            .map(|l| l.exported)
            .unwrap_or(false)
    }

    pub fn requested_lines(&self) -> Vec<LineId> {
        let mut lines: Vec<LineId> = lock(&self.state)
            .lines
            .iter()
            .filter(|(_, l)| l.requested)
            .map(|(id, _)| *id)
            .collect();
        lines.sort();
        lines
    }

    pub fn release_count(&self, line: LineId) -> usize {
        lock(&self.state)
            .lines
            .get(&line)
            .map(|l| l.releases)
            .unwrap_or(0)
    }

    /// Number of live edge streams on `line`.
    pub fn watcher_count(&self, line: LineId) -> usize {
        lock(&self.state)
            .lines
            .get_mut(&line)
            .map(|l| {
                l.watchers.retain(|tx| !tx.is_closed());
                l.watchers.len()
            })
            .unwrap_or(0)
    }

    fn with_requested<T>(
        &self,
        handle: LineHandle,
        f: impl FnOnce(&Faults, &mut SimLine) -> Result<T>,
    ) -> Result<T> {
        let line = handle.line();
        let mut state = lock(&self.state);
        let BoardState { lines, faults, .. } = &mut *state;
        match lines.get_mut(&line) {
            Some(sim) if sim.requested => f(faults, sim),
            _ => Err(MonitorError::NotAcquired { line }),
        }
    }
}

fn injected(line: LineId, what: &str) -> MonitorError {
    MonitorError::LineIo {
        line,
        message: format!("injected {} failure", what),
    }
}

impl LineManager for SimulatedBoard {
    fn is_valid_line(&self, line: LineId) -> bool {
        !lock(&self.state).invalid.contains(&line)
    }

    fn request_line(&self, line: LineId, _consumer: &str) -> Result<LineHandle> {
        let mut state = lock(&self.state);
        if state.invalid.contains(&line) {
            return Err(MonitorError::InvalidLine { line });
        }
        if state.faults.request.contains(&line) {
            return Err(injected(line, "request"));
        }
        let sim = state.lines.entry(line).or_default();
        if sim.requested {
            return Err(MonitorError::AlreadyAcquired { line });
        }
        sim.requested = true;
        Ok(LineHandle::new(line))
    }

    fn set_direction(&self, handle: LineHandle, direction: Direction) -> Result<()> {
        self.with_requested(handle, |faults, sim| {
            if faults.direction.contains(&handle.line()) {
                return Err(injected(handle.line(), "direction"));
            }
            sim.direction = Some(direction);
            if let Direction::Output { initial } = direction {
                sim.level = initial;
            }
            Ok(())
        })
    }

    fn set_debounce(&self, handle: LineHandle, debounce: Duration) -> Result<()> {
        self.with_requested(handle, |_, sim| {
            sim.debounce = debounce;
            Ok(())
        })
    }

    fn read_level(&self, handle: LineHandle) -> Result<bool> {
        self.with_requested(handle, |_, sim| Ok(sim.level))
    }

    fn write_level(&self, handle: LineHandle, level: bool) -> Result<()> {
        self.with_requested(handle, |faults, sim| {
            if faults.write.contains(&handle.line()) {
                return Err(injected(handle.line(), "write"));
            }
            if !matches!(sim.direction, Some(Direction::Output { .. })) {
                return Err(MonitorError::LineIo {
                    line: handle.line(),
                    message: "line is not an output".to_string(),
                });
            }
            sim.level = level;
            sim.writes.push(level);
            Ok(())
        })
    }

    fn export_for_inspection(&self, handle: LineHandle) -> Result<()> {
        self.with_requested(handle, |_, sim| {
            sim.exported = true;
            Ok(())
        })
    }

    fn release_line(&self, handle: LineHandle) -> Result<()> {
        let line = handle.line();
        let mut state = lock(&self.state);
        let fail = state.faults.release.contains(&line);
        let sim = state.lines.entry(line).or_default();
        // The line is gone either way; a failed release only reports it.
        sim.requested = false;
        sim.exported = false;
        sim.direction = None;
        sim.watchers.clear();
        sim.releases += 1;
        if fail {
            return Err(injected(line, "release"));
        }
        Ok(())
    }
}

impl EdgeSource for SimulatedBoard {
    fn edge_stream(&self, handle: LineHandle) -> Result<EdgeStream> {
        self.with_requested(handle, |faults, sim| {
            if faults.edges.contains(&handle.line()) {
                return Err(injected(handle.line(), "edge"));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            sim.watchers.push(tx);
            Ok(EdgeStream {
                events: rx,
                debounce: sim.debounce,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub interpreter: String,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Records launch requests instead of starting processes.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    launches: Mutex<Vec<LaunchRecord>>,
    failing: AtomicBool,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every launch fails (and is not recorded).
    pub fn fail_next(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        lock(&self.launches).clone()
    }
}

impl ActionLauncher for RecordingLauncher {
    fn launch_detached(&self, action: &ActionSpec) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(MonitorError::ActionLaunchFailure {
                path: action.script_path.display().to_string(),
                message: "launcher is set to fail".to_string(),
            });
        }
        tracing::debug!("Would launch {} {:?}", action.interpreter.display(), action.argv());
        lock(&self.launches).push(LaunchRecord {
            interpreter: action.interpreter.display().to_string(),
            argv: action.argv(),
            env: action.env.clone(),
        });
        Ok(())
    }
}
