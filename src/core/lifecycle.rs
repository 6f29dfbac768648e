use crate::core::dispatcher::EventDispatcher;
use crate::core::registry::{InputChannel, LineRegistry, OutputChannel};
use crate::domain::model::{BoardTable, ChannelId, LineId};
use crate::domain::ports::{ActionLauncher, Edge, EdgeCallback, EdgeNotifier, LineManager};
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

enum Acquired {
    Output(Arc<OutputChannel>),
    Input(Arc<InputChannel>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ButtonStatus {
    pub id: u8,
    pub label: String,
    pub line: u32,
    /// `None` when the line could not be read.
    pub level: Option<bool>,
    pub presses: u64,
    pub last_press: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedStatus {
    pub id: u8,
    pub line: u32,
    pub on: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub taken_at: DateTime<Utc>,
    pub buttons: Vec<ButtonStatus>,
    pub leds: Vec<LedStatus>,
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    /// State right before the lines were released; `None` if nothing was active.
    pub final_status: Option<StatusSnapshot>,
    pub released_lines: Vec<LineId>,
    pub failures: Vec<MonitorError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives setup and teardown of every line on the board.
pub struct Lifecycle<L: LineManager, N: EdgeNotifier, A: ActionLauncher> {
    table: BoardTable,
    registry: Arc<LineRegistry<L>>,
    notifier: Arc<N>,
    launcher: Arc<A>,
    dispatcher: Option<Arc<EventDispatcher<L, A>>>,
    acquired: Vec<Acquired>,
}

fn as_acquisition_failure(line: LineId, err: MonitorError) -> MonitorError {
    match err {
        e @ MonitorError::AcquisitionFailure { .. } => e,
        other => MonitorError::AcquisitionFailure {
            line,
            message: other.to_string(),
        },
    }
}

impl<L: LineManager, N: EdgeNotifier, A: ActionLauncher> Lifecycle<L, N, A> {
    pub fn new(table: BoardTable, lines: Arc<L>, notifier: Arc<N>, launcher: Arc<A>) -> Self {
        Self {
            table,
            registry: Arc::new(LineRegistry::new(lines)),
            notifier,
            launcher,
            dispatcher: None,
            acquired: Vec::new(),
        }
    }

    pub fn table(&self) -> &BoardTable {
        &self.table
    }

    pub fn registry(&self) -> &Arc<LineRegistry<L>> {
        &self.registry
    }

    pub fn dispatcher(&self) -> Option<&Arc<EventDispatcher<L, A>>> {
        self.dispatcher.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.dispatcher.is_some()
    }

    pub fn press_count(&self, button: ChannelId) -> Option<u64> {
        self.registry.input(button).map(|c| c.press_count())
    }

    /// Checks the table and every LED line without touching any hardware.
    pub fn validate(&self) -> Result<()> {
        self.table
            .check_consistency()
            .map_err(|message| MonitorError::InvalidTable { message })?;

        let lines = self.registry.lines();
        for led in &self.table.leds {
            if !lines.is_valid_line(led.line) {
                tracing::error!("Invalid LED GPIO {} ({})", led.line, led.id);
                return Err(MonitorError::InvalidConfiguration {
                    line: led.line,
                    reason: format!("{} is not a usable line on this host", led.id),
                });
            }
        }
        Ok(())
    }

    /// Brings the board up. On failure every line taken so far is handed back
    /// before the error is returned.
    pub async fn setup(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(MonitorError::ConfigError {
                message: "setup called while already active".to_string(),
            });
        }

        tracing::info!("Initializing button/LED monitor");
        self.validate()?;

        if let Err(e) = self.acquire_all().await {
            tracing::error!("Setup failed, rolling back: {}", e);
            self.rollback().await;
            return Err(e);
        }

        tracing::info!(
            buttons = self.table.buttons.len(),
            leds = self.table.leds.len(),
            "Button/LED monitor active"
        );
        Ok(())
    }

    async fn acquire_all(&mut self) -> Result<()> {
        for led in &self.table.leds {
            let channel = self
                .registry
                .acquire_output(led)
                .map_err(|e| as_acquisition_failure(led.line, e))?;
            self.acquired.push(Acquired::Output(Arc::clone(&channel)));
            self.registry
                .initialize(&channel, false)
                .map_err(|e| as_acquisition_failure(led.line, e))?;
        }

        for button in &self.table.buttons {
            let channel = self
                .registry
                .acquire_input(button)
                .map_err(|e| as_acquisition_failure(button.line, e))?;
            self.acquired.push(Acquired::Input(channel));
        }

        let dispatcher = Arc::new(EventDispatcher::new(
            &self.table,
            Arc::clone(&self.registry),
            Arc::clone(&self.launcher),
        )?);

        for input in self.registry.inputs() {
            self.subscribe(&input, &dispatcher).await?;
        }

        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    async fn subscribe(
        &self,
        input: &Arc<InputChannel>,
        dispatcher: &Arc<EventDispatcher<L, A>>,
    ) -> Result<()> {
        let line = input.line();
        let handle = input.handle().ok_or(MonitorError::NotAcquired { line })?;
        let subscription_failure = |e: MonitorError| match e {
            e @ MonitorError::SubscriptionFailure { .. } => e,
            other => MonitorError::SubscriptionFailure {
                line,
                message: other.to_string(),
            },
        };

        let source = self
            .notifier
            .map_line_to_event_source(handle)
            .map_err(subscription_failure)?;
        tracing::info!("The button {} is mapped to event source {}", input.spec().label, source.0);

        let target = Arc::clone(dispatcher);
        let channel = input.id();
        let callback: EdgeCallback = Arc::new(move |_source| target.dispatch(channel));

        let subscription = self
            .notifier
            .subscribe(source, Edge::Rising, callback)
            .await
            .map_err(subscription_failure)?;
        input.attach_subscription(subscription);
        Ok(())
    }

    async fn rollback(&mut self) {
        self.dispatcher = None;
        while let Some(entry) = self.acquired.pop() {
            let result = match entry {
                Acquired::Input(input) => {
                    if let Some(subscription) = input.take_subscription() {
                        self.notifier.unsubscribe(subscription).await;
                    }
                    self.registry.release_input(&input)
                }
                Acquired::Output(output) => self.registry.release_output(&output),
            };
            if let Err(e) = result {
                tracing::warn!("Rollback: {}", e);
            }
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let buttons = self
            .registry
            .inputs()
            .iter()
            .map(|input| ButtonStatus {
                id: input.id().0,
                label: input.spec().label.to_string(),
                line: input.line().0,
                level: self.registry.read_level(input).ok(),
                presses: input.press_count(),
                last_press: input.last_press(),
            })
            .collect();
        let leds = self
            .registry
            .outputs()
            .iter()
            .map(|output| LedStatus {
                id: output.id().0,
                line: output.line().0,
                on: output.is_on(),
            })
            .collect();

        StatusSnapshot {
            taken_at: Utc::now(),
            buttons,
            leds,
        }
    }

    /// Releases everything. Keeps going past failures and is a no-op when
    /// nothing is held.
    pub async fn teardown(&mut self) -> TeardownReport {
        if self.acquired.is_empty() {
            tracing::debug!("Teardown: nothing to release");
            return TeardownReport::default();
        }

        let mut report = TeardownReport::default();
        let status = self.snapshot();
        for button in &status.buttons {
            match button.level {
                Some(level) => tracing::info!(
                    button = %button.label,
                    "The button {} state is currently: {}",
                    button.label,
                    level as u8
                ),
                None => tracing::info!(
                    button = %button.label,
                    "The button {} state is currently: unknown",
                    button.label
                ),
            }
        }
        for button in &status.buttons {
            tracing::info!(
                button = %button.label,
                presses = button.presses,
                "The button {} was pressed {} times",
                button.label,
                button.presses
            );
        }
        report.final_status = Some(status);

        // No handler may run once the LEDs are switched off.
        self.dispatcher = None;
        let inputs: Vec<Arc<InputChannel>> = self
            .acquired
            .iter()
            .filter_map(|a| match a {
                Acquired::Input(input) => Some(Arc::clone(input)),
                Acquired::Output(_) => None,
            })
            .collect();
        let outputs: Vec<Arc<OutputChannel>> = self
            .acquired
            .iter()
            .filter_map(|a| match a {
                Acquired::Output(output) => Some(Arc::clone(output)),
                Acquired::Input(_) => None,
            })
            .collect();

        for input in &inputs {
            if let Some(subscription) = input.take_subscription() {
                self.notifier.unsubscribe(subscription).await;
            }
        }

        for output in &outputs {
            if let Err(e) = self.registry.set_state(output, false) {
                tracing::warn!("Teardown: could not switch {} off: {}", output.id(), e);
                report.failures.push(MonitorError::ReleaseFailure {
                    line: output.line(),
                    message: e.to_string(),
                });
            }
        }

        for input in &inputs {
            self.release_into(&mut report, input.line(), self.registry.release_input(input));
        }
        for output in &outputs {
            self.release_into(&mut report, output.line(), self.registry.release_output(output));
        }

        self.acquired.clear();
        tracing::info!(
            released = report.released_lines.len(),
            failures = report.failures.len(),
            "Goodbye from the button/LED monitor"
        );
        report
    }

    fn release_into(&self, report: &mut TeardownReport, line: LineId, result: Result<()>) {
        match result {
            Ok(()) => report.released_lines.push(line),
            Err(e) => {
                tracing::warn!("Teardown: {}", e);
                report.failures.push(e);
            }
        }
    }
}
