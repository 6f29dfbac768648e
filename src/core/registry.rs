use crate::domain::model::{ButtonSpec, ChannelId, LedId, LedSpec, LineId, CONSUMER_LABEL};
use crate::domain::ports::{Direction, LineHandle, LineManager, SubscriptionHandle};
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Idle,
    Handling,
}

/// One button line plus its runtime state.
#[derive(Debug)]
pub struct InputChannel {
    spec: ButtonSpec,
    handle: Mutex<Option<LineHandle>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    press_count: AtomicU64,
    last_press: Mutex<Option<DateTime<Utc>>>,
    exclusion: Mutex<()>,
    handling: AtomicBool,
}

/// Held for the duration of one handler invocation.
pub struct HandlingGuard<'a> {
    channel: &'a InputChannel,
    _exclusive: MutexGuard<'a, ()>,
}

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.channel.handling.store(false, Ordering::Release);
    }
}

impl InputChannel {
    fn new(spec: ButtonSpec, handle: LineHandle) -> Self {
        Self {
            spec,
            handle: Mutex::new(Some(handle)),
            subscription: Mutex::new(None),
            press_count: AtomicU64::new(0),
            last_press: Mutex::new(None),
            exclusion: Mutex::new(()),
            handling: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &ButtonSpec {
        &self.spec
    }

    pub fn id(&self) -> ChannelId {
        self.spec.id
    }

    pub fn line(&self) -> LineId {
        self.spec.line
    }

    pub fn handle(&self) -> Option<LineHandle> {
        *lock(&self.handle)
    }

    pub fn is_acquired(&self) -> bool {
        lock(&self.handle).is_some()
    }

    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        *lock(&self.subscription)
    }

    pub(crate) fn attach_subscription(&self, subscription: SubscriptionHandle) {
        *lock(&self.subscription) = Some(subscription);
    }

    pub(crate) fn take_subscription(&self) -> Option<SubscriptionHandle> {
        lock(&self.subscription).take()
    }

    pub fn press_count(&self) -> u64 {
        self.press_count.load(Ordering::Acquire)
    }

    pub fn last_press(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_press)
    }

    /// Returns the updated count.
    pub(crate) fn record_press(&self) -> u64 {
        *lock(&self.last_press) = Some(Utc::now());
        self.press_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Blocks while another invocation for this channel is running.
    pub(crate) fn begin_handling(&self) -> HandlingGuard<'_> {
        let exclusive = lock(&self.exclusion);
        self.handling.store(true, Ordering::Release);
        HandlingGuard {
            channel: self,
            _exclusive: exclusive,
        }
    }

    pub fn state(&self) -> HandlerState {
        if self.handling.load(Ordering::Acquire) {
            HandlerState::Handling
        } else {
            HandlerState::Idle
        }
    }
}

/// One LED line and its cached level.
#[derive(Debug)]
pub struct OutputChannel {
    spec: LedSpec,
    state: Mutex<OutputState>,
}

#[derive(Debug)]
struct OutputState {
    handle: Option<LineHandle>,
    is_on: bool,
}

impl OutputChannel {
    fn new(spec: LedSpec, handle: LineHandle) -> Self {
        Self {
            spec,
            state: Mutex::new(OutputState {
                handle: Some(handle),
                is_on: false,
            }),
        }
    }

    pub fn spec(&self) -> &LedSpec {
        &self.spec
    }

    pub fn id(&self) -> LedId {
        self.spec.id
    }

    pub fn line(&self) -> LineId {
        self.spec.line
    }

    pub fn is_acquired(&self) -> bool {
        lock(&self.state).handle.is_some()
    }

    pub fn is_on(&self) -> bool {
        lock(&self.state).is_on
    }
}

/// Owns every acquired channel and the backend they were acquired from.
pub struct LineRegistry<L: LineManager> {
    lines: Arc<L>,
    claimed: Mutex<HashSet<LineId>>,
    inputs: Mutex<Vec<Arc<InputChannel>>>,
    outputs: Mutex<Vec<Arc<OutputChannel>>>,
}

impl<L: LineManager> LineRegistry<L> {
    pub fn new(lines: Arc<L>) -> Self {
        Self {
            lines,
            claimed: Mutex::new(HashSet::new()),
            inputs: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> &Arc<L> {
        &self.lines
    }

    fn claim(&self, line: LineId) -> Result<()> {
        if !self.lines.is_valid_line(line) {
            return Err(MonitorError::InvalidLine { line });
        }
        if !lock(&self.claimed).insert(line) {
            return Err(MonitorError::AlreadyAcquired { line });
        }
        Ok(())
    }

    fn unclaim(&self, line: LineId) {
        lock(&self.claimed).remove(&line);
    }

    /// Requests the line, runs `configure` on it and hands it back on failure.
    fn request_configured<F>(&self, line: LineId, configure: F) -> Result<LineHandle>
    where
        F: FnOnce(&L, LineHandle) -> Result<()>,
    {
        self.claim(line)?;

        let handle = match self.lines.request_line(line, CONSUMER_LABEL) {
            Ok(handle) => handle,
            Err(e) => {
                self.unclaim(line);
                return Err(MonitorError::AcquisitionFailure {
                    line,
                    message: e.to_string(),
                });
            }
        };

        if let Err(e) = configure(&self.lines, handle) {
            if let Err(release_err) = self.lines.release_line(handle) {
                tracing::warn!("Failed to hand back {} after setup error: {}", line, release_err);
            }
            self.unclaim(line);
            return Err(MonitorError::AcquisitionFailure {
                line,
                message: e.to_string(),
            });
        }

        if let Err(e) = self.lines.export_for_inspection(handle) {
            tracing::warn!("Could not export {} for inspection: {}", line, e);
        }

        Ok(handle)
    }

    pub fn acquire_output(&self, spec: &LedSpec) -> Result<Arc<OutputChannel>> {
        let handle = self.request_configured(spec.line, |lines, handle| {
            lines.set_direction(handle, Direction::Output { initial: false })
        })?;

        let channel = Arc::new(OutputChannel::new(spec.clone(), handle));
        lock(&self.outputs).push(Arc::clone(&channel));
        tracing::debug!("Acquired {} on {}", spec.id, spec.line);
        Ok(channel)
    }

    pub fn acquire_input(&self, spec: &ButtonSpec) -> Result<Arc<InputChannel>> {
        let handle = self.request_configured(spec.line, |lines, handle| {
            lines.set_direction(handle, Direction::Input)?;
            lines.set_debounce(handle, spec.debounce)
        })?;

        let channel = Arc::new(InputChannel::new(spec.clone(), handle));
        lock(&self.inputs).push(Arc::clone(&channel));

        match self.lines.read_level(handle) {
            Ok(level) => tracing::info!(
                button = spec.label,
                line = spec.line.0,
                level = level as u8,
                "The button state is currently {}",
                level as u8
            ),
            Err(e) => tracing::warn!("Could not read {} after acquiring it: {}", spec.line, e),
        }
        Ok(channel)
    }

    /// Drives the first known level onto an LED before any event can touch it.
    pub fn initialize(&self, channel: &OutputChannel, on: bool) -> Result<()> {
        self.set_state(channel, on)?;
        tracing::debug!("{} initialized to {}", channel.id(), if on { "on" } else { "off" });
        Ok(())
    }

    /// Writes the line and the cached level under one lock.
    pub fn set_state(&self, channel: &OutputChannel, on: bool) -> Result<()> {
        let mut state = lock(&channel.state);
        let handle = state.handle.ok_or(MonitorError::NotAcquired {
            line: channel.line(),
        })?;
        self.lines.write_level(handle, on)?;
        state.is_on = on;
        Ok(())
    }

    pub fn get_state(&self, channel: &OutputChannel) -> bool {
        channel.is_on()
    }

    pub fn read_level(&self, channel: &InputChannel) -> Result<bool> {
        let handle = channel.handle().ok_or(MonitorError::NotAcquired {
            line: channel.line(),
        })?;
        self.lines.read_level(handle)
    }

    /// No-op on a channel that is already released.
    pub fn release_input(&self, channel: &InputChannel) -> Result<()> {
        let Some(handle) = lock(&channel.handle).take() else {
            return Ok(());
        };
        if channel.subscription().is_some() {
            tracing::warn!("Releasing {} while it is still subscribed", channel.line());
        }
        lock(&self.inputs).retain(|c| c.id() != channel.id());
        self.finish_release(handle)
    }

    /// No-op on a channel that is already released.
    pub fn release_output(&self, channel: &OutputChannel) -> Result<()> {
        let Some(handle) = lock(&channel.state).handle.take() else {
            return Ok(());
        };
        lock(&self.outputs).retain(|c| c.id() != channel.id());
        self.finish_release(handle)
    }

    fn finish_release(&self, handle: LineHandle) -> Result<()> {
        let line = handle.line();
        self.unclaim(line);
        self.lines
            .release_line(handle)
            .map_err(|e| MonitorError::ReleaseFailure {
                line,
                message: e.to_string(),
            })
    }

    pub fn inputs(&self) -> Vec<Arc<InputChannel>> {
        lock(&self.inputs).clone()
    }

    pub fn outputs(&self) -> Vec<Arc<OutputChannel>> {
        lock(&self.outputs).clone()
    }

    pub fn input(&self, id: ChannelId) -> Option<Arc<InputChannel>> {
        lock(&self.inputs).iter().find(|c| c.id() == id).cloned()
    }

    pub fn output(&self, id: LedId) -> Option<Arc<OutputChannel>> {
        lock(&self.outputs).iter().find(|c| c.id() == id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inputs).is_empty() && lock(&self.outputs).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::SimulatedBoard;
    use crate::domain::model::BoardTable;

    fn registry() -> (Arc<SimulatedBoard>, LineRegistry<SimulatedBoard>) {
        let board = Arc::new(SimulatedBoard::new());
        (Arc::clone(&board), LineRegistry::new(board))
    }

    #[test]
    fn output_round_trip() {
        let (board, registry) = registry();
        let led = BoardTable::reference().leds[0].clone();
        let channel = registry.acquire_output(&led).unwrap();
        assert!(channel.is_acquired());
        assert!(board.is_output(led.line));

        registry.set_state(&channel, true).unwrap();
        assert!(registry.get_state(&channel));
        assert_eq!(board.level(led.line), Some(true));

        registry.set_state(&channel, false).unwrap();
        assert!(!registry.get_state(&channel));
        assert_eq!(board.level(led.line), Some(false));
    }

    #[test]
    fn acquiring_twice_fails() {
        let (_board, registry) = registry();
        let led = BoardTable::reference().leds[0].clone();
        registry.acquire_output(&led).unwrap();
        assert!(matches!(
            registry.acquire_output(&led),
            Err(MonitorError::AlreadyAcquired { .. })
        ));
    }

    #[test]
    fn invalid_line_is_rejected_before_request() {
        let (board, registry) = registry();
        let led = BoardTable::reference().leds[1].clone();
        board.mark_invalid(led.line);
        assert!(matches!(
            registry.acquire_output(&led),
            Err(MonitorError::InvalidLine { .. })
        ));
        assert!(board.requested_lines().is_empty());
    }

    #[test]
    fn input_gets_direction_and_debounce() {
        let (board, registry) = registry();
        let button = BoardTable::reference().buttons[2].clone();
        let channel = registry.acquire_input(&button).unwrap();
        assert!(channel.is_acquired());
        assert_eq!(board.debounce(button.line), Some(button.debounce));
        assert!(board.is_exported(button.line));
        assert_eq!(channel.press_count(), 0);
        assert_eq!(channel.state(), HandlerState::Idle);
    }

    #[test]
    fn failed_configuration_hands_the_line_back() {
        let (board, registry) = registry();
        let button = BoardTable::reference().buttons[0].clone();
        board.fail_direction(button.line);
        assert!(matches!(
            registry.acquire_input(&button),
            Err(MonitorError::AcquisitionFailure { .. })
        ));
        assert!(board.requested_lines().is_empty());
        board.clear_failures();
        assert!(registry.acquire_input(&button).is_ok());
    }

    #[test]
    fn release_is_idempotent() {
        let (board, registry) = registry();
        let led = BoardTable::reference().leds[0].clone();
        let channel = registry.acquire_output(&led).unwrap();
        registry.release_output(&channel).unwrap();
        registry.release_output(&channel).unwrap();
        assert_eq!(board.release_count(led.line), 1);
        assert!(!channel.is_acquired());
        assert!(registry.is_empty());
    }

    #[test]
    fn released_output_cannot_be_written() {
        let (_board, registry) = registry();
        let led = BoardTable::reference().leds[0].clone();
        let channel = registry.acquire_output(&led).unwrap();
        registry.release_output(&channel).unwrap();
        assert!(matches!(
            registry.set_state(&channel, true),
            Err(MonitorError::NotAcquired { .. })
        ));
    }
}
