use crate::domain::model::{ActionSpec, LineId};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Token for a line that has been requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineHandle {
    line: LineId,
}

impl LineHandle {
    pub fn new(line: LineId) -> Self {
        Self { line }
    }

    pub fn line(&self) -> LineId {
        self.line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    /// Output with the level driven right after the switch.
    Output { initial: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub edge: Edge,
    pub at: Instant,
}

/// Raw transitions of one input line plus the debounce configured on it.
#[derive(Debug)]
pub struct EdgeStream {
    pub events: mpsc::UnboundedReceiver<EdgeEvent>,
    pub debounce: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventSourceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// What a handler reports back to the notification layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
}

pub type EdgeCallback = Arc<dyn Fn(EventSourceId) -> HandlerOutcome + Send + Sync>;

pub trait LineManager: Send + Sync + 'static {
    fn is_valid_line(&self, line: LineId) -> bool;
    fn request_line(&self, line: LineId, consumer: &str) -> Result<LineHandle>;
    fn set_direction(&self, handle: LineHandle, direction: Direction) -> Result<()>;
    fn set_debounce(&self, handle: LineHandle, debounce: Duration) -> Result<()>;
    fn read_level(&self, handle: LineHandle) -> Result<bool>;
    fn write_level(&self, handle: LineHandle, level: bool) -> Result<()>;
    fn export_for_inspection(&self, handle: LineHandle) -> Result<()>;
    fn release_line(&self, handle: LineHandle) -> Result<()>;
}

/// Hardware side of edge detection; feeds the notification layer.
pub trait EdgeSource: Send + Sync + 'static {
    fn edge_stream(&self, handle: LineHandle) -> Result<EdgeStream>;
}

#[async_trait]
pub trait EdgeNotifier: Send + Sync + 'static {
    fn map_line_to_event_source(&self, handle: LineHandle) -> Result<EventSourceId>;

    async fn subscribe(
        &self,
        source: EventSourceId,
        edge: Edge,
        callback: EdgeCallback,
    ) -> Result<SubscriptionHandle>;

    /// Returns once no callback for `subscription` is running or can still run.
    /// Unknown or already removed handles are a no-op.
    async fn unsubscribe(&self, subscription: SubscriptionHandle);
}

pub trait ActionLauncher: Send + Sync + 'static {
    /// Starts the action without waiting for it.
    fn launch_detached(&self, action: &ActionSpec) -> Result<()>;
}
