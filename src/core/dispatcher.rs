use crate::core::registry::{InputChannel, LineRegistry, OutputChannel};
use crate::domain::model::{ActionSpec, BoardTable, ChannelId};
use crate::domain::ports::{ActionLauncher, HandlerOutcome, LineManager};
use crate::utils::error::{MonitorError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything one button touches when it fires.
pub struct Route {
    pub input: Arc<InputChannel>,
    pub output: Arc<OutputChannel>,
    pub target_on: bool,
    pub action: ActionSpec,
}

/// Maps a firing button to its LED write, counter bump and script launch.
pub struct EventDispatcher<L: LineManager, A: ActionLauncher> {
    routes: HashMap<ChannelId, Route>,
    registry: Arc<LineRegistry<L>>,
    launcher: Arc<A>,
}

impl<L: LineManager, A: ActionLauncher> EventDispatcher<L, A> {
    /// Builds the dispatch table from the acquired channels. Every mapping
    /// must have both of its channels acquired.
    pub fn new(table: &BoardTable, registry: Arc<LineRegistry<L>>, launcher: Arc<A>) -> Result<Self> {
        let mut routes = HashMap::with_capacity(table.mappings.len());
        for entry in &table.mappings {
            let input = registry
                .input(entry.button)
                .ok_or_else(|| MonitorError::InvalidTable {
                    message: format!("button {} is not acquired", entry.button),
                })?;
            let output = registry
                .output(entry.led)
                .ok_or_else(|| MonitorError::InvalidTable {
                    message: format!("{} is not acquired", entry.led),
                })?;
            routes.insert(
                entry.button,
                Route {
                    input,
                    output,
                    target_on: entry.target_on,
                    action: entry.action.clone(),
                },
            );
        }

        Ok(Self {
            routes,
            registry,
            launcher,
        })
    }

    pub fn route(&self, channel: ChannelId) -> Option<&Route> {
        self.routes.get(&channel)
    }

    /// Handles one accepted edge. Never fails: every step logs its own error
    /// and the remaining steps still run.
    pub fn dispatch(&self, channel: ChannelId) -> HandlerOutcome {
        let Some(route) = self.routes.get(&channel) else {
            let err = MonitorError::UnknownChannel { channel };
            tracing::warn!("Interrupt ignored: {}", err);
            return HandlerOutcome::Handled;
        };

        let _handling = route.input.begin_handling();
        let label = route.input.spec().label;

        if let Err(e) = self.launcher.launch_detached(&route.action) {
            let err = match e {
                e @ MonitorError::ActionLaunchFailure { .. } => e,
                other => MonitorError::ActionLaunchFailure {
                    path: route.action.script_path.display().to_string(),
                    message: other.to_string(),
                },
            };
            tracing::warn!(button = label, "Action for button {} not started: {}", label, err);
        }

        if let Err(e) = self.registry.set_state(&route.output, route.target_on) {
            tracing::warn!(
                button = label,
                "Could not switch {} {}: {}",
                route.output.id(),
                if route.target_on { "on" } else { "off" },
                e
            );
        }

        let presses = route.input.record_press();

        match self.registry.read_level(&route.input) {
            Ok(level) => tracing::info!(
                button = label,
                line = route.input.line().0,
                level = level as u8,
                presses,
                "Interrupt! (button {} state is {})",
                label,
                level as u8
            ),
            Err(e) => tracing::warn!(
                button = label,
                presses,
                "Interrupt! (button {} state unreadable: {})",
                label,
                e
            ),
        }

        HandlerOutcome::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::{RecordingLauncher, SimulatedBoard};

    fn dispatcher() -> (
        Arc<SimulatedBoard>,
        Arc<RecordingLauncher>,
        EventDispatcher<SimulatedBoard, RecordingLauncher>,
    ) {
        let table = BoardTable::reference();
        let board = Arc::new(SimulatedBoard::new());
        let registry = Arc::new(LineRegistry::new(Arc::clone(&board)));
        for led in &table.leds {
            let channel = registry.acquire_output(led).unwrap();
            registry.initialize(&channel, false).unwrap();
        }
        for button in &table.buttons {
            registry.acquire_input(button).unwrap();
        }
        let launcher = Arc::new(RecordingLauncher::new());
        let dispatcher = EventDispatcher::new(&table, registry, Arc::clone(&launcher)).unwrap();
        (board, launcher, dispatcher)
    }

    #[test]
    fn sets_absolute_target_instead_of_toggling() {
        let (board, _launcher, dispatcher) = dispatcher();
        dispatcher.dispatch(ChannelId(1));
        dispatcher.dispatch(ChannelId(1));
        assert_eq!(board.level(crate::domain::model::LineId(21)), Some(true));
        dispatcher.dispatch(ChannelId(0));
        assert_eq!(board.level(crate::domain::model::LineId(21)), Some(false));
        assert!(!dispatcher.route(ChannelId(0)).unwrap().output.is_on());
    }

    #[test]
    fn unknown_channel_is_acknowledged_and_ignored() {
        let (_board, launcher, dispatcher) = dispatcher();
        assert_eq!(dispatcher.dispatch(ChannelId(42)), HandlerOutcome::Handled);
        assert!(launcher.launches().is_empty());
    }

    #[test]
    fn launch_failure_does_not_skip_led_or_counter() {
        let (board, launcher, dispatcher) = dispatcher();
        launcher.fail_next(true);
        dispatcher.dispatch(ChannelId(3));
        let route = dispatcher.route(ChannelId(3)).unwrap();
        assert_eq!(route.input.press_count(), 1);
        assert!(route.output.is_on());
        assert_eq!(board.level(crate::domain::model::LineId(26)), Some(true));
    }

    #[test]
    fn led_write_failure_still_counts_the_press() {
        let (board, launcher, dispatcher) = dispatcher();
        board.fail_write(crate::domain::model::LineId(26));
        dispatcher.dispatch(ChannelId(3));
        let route = dispatcher.route(ChannelId(3)).unwrap();
        assert_eq!(route.input.press_count(), 1);
        assert!(!route.output.is_on());
        assert_eq!(launcher.launches().len(), 1);
    }
}
